// ABOUTME: Library root for table-mirror
// ABOUTME: Peer-to-peer table transfer between two instances over a code-authenticated session

pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod schema;
pub mod session;
pub mod transport;
pub mod utils;
pub mod worker;

pub use error::{Result, TransferError};
pub use export::{DataExporter, Record, RecordBatch};
pub use import::{ConflictStrategy, DataImporter, RecordError, TransferResult};
pub use schema::{ColumnDef, DenyList, SchemaInspector, TableInfo, TableSchema};
pub use session::{Direction, ReceiverIdentity, ReceiverInfo, Session, SessionRegistry};
pub use transport::{Client, ConnectOptions, SenderConfig, SenderHandle};
pub use worker::{ImportJob, ImportWorker};
