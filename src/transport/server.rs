// ABOUTME: Sender-side gRPC service exposing tables to code-authenticated receivers
// ABOUTME: Each request opens its own read-only SQLite connection on the blocking pool

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::Interceptor;
use tonic::{transport::Server, Request, Response, Status};

use super::transfer_proto::transfer_server::{Transfer, TransferServer};
use super::transfer_proto::{
    AttachRequest, AttachResponse, DetachRequest, DetachResponse, FetchRecordsRequest,
    FetchRecordsResponse, GetCountRequest, GetCountResponse, GetSchemaRequest, GetSchemaResponse,
    ListTablesRequest, ListTablesResponse,
};
use super::{error_to_status, AUTHORIZATION_HEADER, AUTHORIZATION_SCHEME};
use crate::export::DataExporter;
use crate::schema::{DenyList, SchemaInspector};
use crate::session::{ReceiverIdentity, ReceiverInfo, SessionRegistry};

/// What the sender exposes.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub db_path: PathBuf,
    pub deny_list: DenyList,
}

/// A running sender. Dropping the handle stops the server.
pub struct SenderHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl Drop for SenderHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl SenderHandle {
    /// Bind `addr` (port 0 picks a free port) and start serving on the
    /// current tokio runtime.
    pub async fn bind(
        addr: SocketAddr,
        registry: SessionRegistry,
        config: SenderConfig,
    ) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind tcp listener on {}", addr))?;
        let addr = listener
            .local_addr()
            .context("failed to read bound address")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let service = SenderService::new(config, registry.clone());
        let interceptor = CodeInterceptor { registry };

        let task = tokio::spawn(async move {
            Server::builder()
                .add_service(TransferServer::with_interceptor(service, interceptor))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .context("grpc server exited with error")?;
            Ok(())
        });

        tracing::info!("Sender listening on {}", addr);

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL a receiver can connect to.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting requests and wait for the server task to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.context("sender task panicked")??;
        }
        tracing::info!("Sender on {} stopped", self.addr);
        Ok(())
    }
}

/// Session code of the authenticated request, set by the interceptor.
#[derive(Debug, Clone)]
struct SessionCode(String);

#[derive(Clone)]
struct CodeInterceptor {
    registry: SessionRegistry,
}

impl Interceptor for CodeInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let header = request
            .metadata()
            .get(AUTHORIZATION_HEADER)
            .ok_or_else(|| Status::unauthenticated("missing authorization header"))?;
        let code = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix(AUTHORIZATION_SCHEME))
            .map(|rest| rest.trim().to_string())
            .ok_or_else(|| Status::unauthenticated("malformed authorization header"))?;

        self.registry.validate(&code).map_err(error_to_status)?;
        request.extensions_mut().insert(SessionCode(code));
        Ok(request)
    }
}

struct SenderService {
    db_path: Arc<PathBuf>,
    deny_list: DenyList,
    registry: SessionRegistry,
}

impl SenderService {
    fn new(config: SenderConfig, registry: SessionRegistry) -> Self {
        Self {
            db_path: Arc::new(config.db_path),
            deny_list: config.deny_list,
            registry,
        }
    }

    /// Run `op` against a fresh read-only connection on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> Result<T, Status>
    where
        F: FnOnce(&Connection, DenyList) -> crate::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.db_path.clone();
        let deny_list = self.deny_list.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_read_only(&path)?;
            op(&conn, deny_list)
        })
        .await
        .map_err(|err| Status::internal(format!("store task failed: {}", err)))?
        .map_err(error_to_status)
    }
}

fn open_read_only(path: &Path) -> crate::error::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

fn session_code<T>(request: &Request<T>) -> Result<String, Status> {
    request
        .extensions()
        .get::<SessionCode>()
        .map(|code| code.0.clone())
        .ok_or_else(|| Status::unauthenticated("request was not authenticated"))
}

#[tonic::async_trait]
impl Transfer for SenderService {
    async fn attach(
        &self,
        request: Request<AttachRequest>,
    ) -> Result<Response<AttachResponse>, Status> {
        let code = session_code(&request)?;
        let ip = request.remote_addr().map(|addr| addr.ip().to_string());
        let user_agent = request
            .metadata()
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let identity = request
            .into_inner()
            .receiver
            .map(|r| ReceiverIdentity {
                name: r.name,
                email: r.email,
                project: r.project,
                site_url: r.site_url,
            })
            .unwrap_or_default();

        let receiver = ReceiverInfo::new(identity, ip, user_agent);
        let receiver_id = receiver.id.clone();
        let session = self
            .registry
            .validate_and_attach(&code, receiver)
            .map_err(error_to_status)?;

        Ok(Response::new(AttachResponse {
            receiver_id,
            session_status: session.status.as_str().to_string(),
        }))
    }

    async fn detach(
        &self,
        request: Request<DetachRequest>,
    ) -> Result<Response<DetachResponse>, Status> {
        let code = session_code(&request)?;
        let receiver_id = request.into_inner().receiver_id;
        self.registry.detach(&code, &receiver_id);
        Ok(Response::new(DetachResponse {}))
    }

    async fn list_tables(
        &self,
        _: Request<ListTablesRequest>,
    ) -> Result<Response<ListTablesResponse>, Status> {
        let tables = self
            .with_store(|conn, deny_list| SchemaInspector::new(conn, deny_list).list_tables())
            .await?;
        Ok(Response::new(ListTablesResponse {
            tables: tables.into_iter().map(Into::into).collect(),
        }))
    }

    async fn get_schema(
        &self,
        request: Request<GetSchemaRequest>,
    ) -> Result<Response<GetSchemaResponse>, Status> {
        let table = request.into_inner().table;
        let schema = self
            .with_store(move |conn, deny_list| {
                SchemaInspector::new(conn, deny_list).get_schema(&table)
            })
            .await?;
        Ok(Response::new(schema.into()))
    }

    async fn get_count(
        &self,
        request: Request<GetCountRequest>,
    ) -> Result<Response<GetCountResponse>, Status> {
        let table = request.into_inner().table;
        let count = self
            .with_store(move |conn, deny_list| {
                SchemaInspector::new(conn, deny_list).get_count(&table)
            })
            .await?;
        Ok(Response::new(GetCountResponse { count }))
    }

    async fn fetch_records(
        &self,
        request: Request<FetchRecordsRequest>,
    ) -> Result<Response<FetchRecordsResponse>, Status> {
        let FetchRecordsRequest {
            table,
            limit,
            offset,
        } = request.into_inner();

        let batch = self
            .with_store(move |conn, deny_list| {
                let batch = DataExporter::new(conn, deny_list).export_records(&table, limit, offset)?;
                tracing::debug!(
                    "Served {} rows of '{}' from offset {}",
                    batch.len(),
                    table,
                    offset
                );
                Ok(serde_json::to_vec(&batch)?)
            })
            .await?;
        Ok(Response::new(FetchRecordsResponse { batch }))
    }
}
