fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    std::env::set_var("PROTOC", protoc);
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .protoc_arg("--experimental_allow_proto3_optional")
        .compile(&["proto/transfer.proto"], &["proto"])?;
    println!("cargo:rerun-if-changed=proto/transfer.proto");
    Ok(())
}
