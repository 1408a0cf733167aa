// ABOUTME: gRPC transport between sender and receiver instances
// ABOUTME: Maps TransferError to gRPC status codes and converts wire messages to domain types

pub mod client;
pub mod server;

pub use client::{
    Client, ConnectOptions, ConnectionState, PageProgress, TransferAllOptions, TransferOptions,
};
pub use server::{SenderConfig, SenderHandle};

use tonic::{Code, Status};

use crate::error::TransferError;
use crate::schema::{ColumnDef, TableInfo, TableSchema};

pub mod transfer_proto {
    tonic::include_proto!("tablemirror");
}

/// Metadata key carrying the session code.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Scheme prefix of the authorization value: `Code <code>`.
pub const AUTHORIZATION_SCHEME: &str = "Code";

/// Status returned by the sender for a failed operation.
pub fn error_to_status(err: TransferError) -> Status {
    match err {
        TransferError::InvalidCode => Status::unauthenticated(err.to_string()),
        TransferError::SessionClosed => Status::permission_denied(err.to_string()),
        TransferError::ConnectionTimeout => Status::deadline_exceeded(err.to_string()),
        TransferError::Disconnected(reason) => Status::unavailable(reason),
        TransferError::TableNotFound(table) => Status::not_found(table),
        TransferError::InvalidIdentifier(reason) => Status::invalid_argument(reason),
        TransferError::Storage(reason) => Status::internal(reason),
        TransferError::Protocol(reason) => Status::data_loss(reason),
    }
}

/// Error seen by the receiver for a failed call.
///
/// The sender never answers with `Unknown` or `Cancelled` itself, so those
/// come from the channel and count as a disconnect.
pub fn status_to_error(status: Status) -> TransferError {
    let message = status.message().to_string();
    match status.code() {
        Code::Unauthenticated => TransferError::InvalidCode,
        Code::PermissionDenied => TransferError::SessionClosed,
        Code::DeadlineExceeded => TransferError::ConnectionTimeout,
        Code::NotFound => TransferError::TableNotFound(message),
        Code::InvalidArgument => TransferError::InvalidIdentifier(message),
        Code::Internal => TransferError::Storage(message),
        Code::Unavailable | Code::Unknown | Code::Cancelled => {
            if message.is_empty() {
                TransferError::Disconnected(status.code().description().to_string())
            } else {
                TransferError::Disconnected(message)
            }
        }
        other => TransferError::Protocol(format!("{}: {}", other.description(), message)),
    }
}

impl From<TableInfo> for transfer_proto::TableEntry {
    fn from(info: TableInfo) -> Self {
        Self {
            name: info.name,
            estimated_count: info.estimated_count,
        }
    }
}

impl From<transfer_proto::TableEntry> for TableInfo {
    fn from(entry: transfer_proto::TableEntry) -> Self {
        Self {
            name: entry.name,
            estimated_count: entry.estimated_count,
        }
    }
}

impl From<TableSchema> for transfer_proto::GetSchemaResponse {
    fn from(schema: TableSchema) -> Self {
        Self {
            table: schema.table,
            columns: schema
                .columns
                .into_iter()
                .map(|c| transfer_proto::ColumnDef {
                    name: c.name,
                    data_type: c.data_type,
                    nullable: c.nullable,
                    default_value: c.default,
                })
                .collect(),
            primary_key: schema.primary_key,
        }
    }
}

impl From<transfer_proto::GetSchemaResponse> for TableSchema {
    fn from(resp: transfer_proto::GetSchemaResponse) -> Self {
        Self {
            table: resp.table,
            columns: resp
                .columns
                .into_iter()
                .map(|c| ColumnDef {
                    name: c.name,
                    data_type: c.data_type,
                    nullable: c.nullable,
                    default: c.default_value,
                })
                .collect(),
            primary_key: resp.primary_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_is_symmetric() {
        let errors = vec![
            TransferError::InvalidCode,
            TransferError::SessionClosed,
            TransferError::ConnectionTimeout,
            TransferError::Disconnected("sender went away".to_string()),
            TransferError::TableNotFound("users".to_string()),
            TransferError::InvalidIdentifier("bad name".to_string()),
            TransferError::Storage("disk I/O error".to_string()),
        ];

        for err in errors {
            assert_eq!(status_to_error(error_to_status(err.clone())), err);
        }
    }

    #[test]
    fn test_channel_failures_are_disconnects() {
        let err = status_to_error(Status::unknown("transport error"));
        assert_eq!(err, TransferError::Disconnected("transport error".to_string()));

        let err = status_to_error(Status::unavailable(""));
        assert!(matches!(err, TransferError::Disconnected(reason) if !reason.is_empty()));
    }

    #[test]
    fn test_schema_round_trips_through_proto() {
        let schema = TableSchema {
            table: "users".to_string(),
            columns: vec![ColumnDef {
                name: "email".to_string(),
                data_type: "TEXT".to_string(),
                nullable: true,
                default: Some("'none'".to_string()),
            }],
            primary_key: vec![],
        };

        let wire = transfer_proto::GetSchemaResponse::from(schema.clone());
        assert_eq!(TableSchema::from(wire), schema);
    }
}
