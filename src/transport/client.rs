// ABOUTME: Receiver-side client: connects with a session code and pulls tables page by page
// ABOUTME: Tracks connection state; a channel failure closes the client for every later call

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use rusqlite::Connection;
use serde_json::Value as JsonValue;
use tonic::codegen::InterceptedService;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};

use super::transfer_proto::transfer_client::TransferClient;
use super::transfer_proto::{
    self, AttachRequest, DetachRequest, FetchRecordsRequest, GetCountRequest,
    GetSchemaRequest, ListTablesRequest,
};
use super::{status_to_error, AUTHORIZATION_HEADER, AUTHORIZATION_SCHEME};
use crate::config::TransferDefaults;
use crate::error::{Result, TransferError};
use crate::export::RecordBatch;
use crate::import::{ConflictStrategy, DataImporter, TransferResult};
use crate::schema::{SchemaInspector, TableInfo, TableSchema};
use crate::session::{is_well_formed_code, ReceiverIdentity};
use crate::utils::validate_identifier;

/// Upper bound on the best-effort detach call made by `disconnect`.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Transferring,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Transferring => "transferring",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bound on connecting and on every later call.
    pub timeout: Duration,
    pub receiver: ReceiverIdentity,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            receiver: ReceiverIdentity::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub strategy: ConflictStrategy,
    pub batch_size: u32,
    pub create_missing_tables: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions::from(&TransferDefaults::default())
    }
}

impl From<&TransferDefaults> for TransferOptions {
    fn from(defaults: &TransferDefaults) -> Self {
        Self {
            strategy: defaults.strategy,
            batch_size: defaults.batch_size,
            create_missing_tables: defaults.create_missing_tables,
        }
    }
}

/// Options for pulling several tables in one run.
#[derive(Debug, Clone, Default)]
pub struct TransferAllOptions {
    /// Tables to pull; `None` means every table the sender lists.
    pub tables: Option<Vec<String>>,
    /// Per-table strategy overrides.
    pub strategies: HashMap<String, ConflictStrategy>,
    /// Strategy, batch size and table creation for tables without an override.
    pub defaults: TransferOptions,
}

impl TransferAllOptions {
    fn options_for(&self, table: &str) -> TransferOptions {
        TransferOptions {
            strategy: self
                .strategies
                .get(table)
                .copied()
                .unwrap_or(self.defaults.strategy),
            ..self.defaults
        }
    }
}

/// Reported after each imported page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageProgress {
    pub table: String,
    /// 1-based page number.
    pub page: u32,
    /// Offset of the first row in this page.
    pub offset: u64,
    /// Rows in this page.
    pub rows: usize,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: usize,
}

#[derive(Clone)]
struct CodeHeader {
    header: MetadataValue<Ascii>,
}

impl Interceptor for CodeHeader {
    fn call(&mut self, mut req: Request<()>) -> std::result::Result<Request<()>, Status> {
        req.metadata_mut()
            .insert(AUTHORIZATION_HEADER, self.header.clone());
        Ok(req)
    }
}

type AuthedClient = TransferClient<InterceptedService<Channel, CodeHeader>>;

/// A receiver's connection to one sender session.
///
/// Calls are issued one at a time. Each is bounded by the connect timeout: a
/// timeout leaves the client usable, a channel failure closes it for good.
pub struct Client {
    inner: AuthedClient,
    url: String,
    timeout: Duration,
    receiver_id: String,
    state: ConnectionState,
    closed: Option<String>,
}

impl Client {
    /// Connect to the sender at `url` and attach to the session behind `code`.
    pub async fn connect(url: &str, code: &str, options: ConnectOptions) -> Result<Client> {
        if !is_well_formed_code(code) {
            return Err(TransferError::InvalidCode);
        }

        let parsed = url::Url::parse(url)
            .map_err(|e| TransferError::Disconnected(format!("invalid sender url '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransferError::Disconnected(format!(
                "unsupported sender url scheme '{}'",
                parsed.scheme()
            )));
        }

        let header = MetadataValue::try_from(format!("{} {}", AUTHORIZATION_SCHEME, code))
            .map_err(|_| TransferError::InvalidCode)?;

        let endpoint = Endpoint::from_shared(url.to_string())
            .and_then(|e| e.user_agent(format!("table-mirror/{}", env!("CARGO_PKG_VERSION"))))
            .map_err(|e| TransferError::Disconnected(error_chain(&e)))?
            .connect_timeout(options.timeout);

        tracing::info!("Connecting to sender at {}", url);

        let channel = match tokio::time::timeout(options.timeout, endpoint.connect()).await {
            Err(_) => return Err(TransferError::ConnectionTimeout),
            Ok(Err(e)) => {
                return Err(TransferError::Disconnected(format!(
                    "failed to connect to {}: {}",
                    url,
                    error_chain(&e)
                )))
            }
            Ok(Ok(channel)) => channel,
        };

        let mut client = Client {
            inner: TransferClient::with_interceptor(channel, CodeHeader { header }),
            url: url.to_string(),
            timeout: options.timeout,
            receiver_id: String::new(),
            state: ConnectionState::Connecting,
            closed: None,
        };

        let identity = options.receiver;
        let request = AttachRequest {
            receiver: Some(transfer_proto::ReceiverIdentity {
                name: identity.name,
                email: identity.email,
                project: identity.project,
                site_url: identity.site_url,
            }),
        };
        let response = client
            .call(move |mut c| async move { c.attach(request).await })
            .await?;

        client.receiver_id = response.receiver_id;
        client.state = ConnectionState::Connected;
        tracing::info!(
            "Attached to session as receiver {} (session {})",
            client.receiver_id,
            response.session_status
        );
        Ok(client)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub async fn list_tables(&mut self) -> Result<Vec<TableInfo>> {
        let response = self
            .call(|mut c| async move { c.list_tables(ListTablesRequest {}).await })
            .await?;
        Ok(response.tables.into_iter().map(Into::into).collect())
    }

    pub async fn get_schema(&mut self, table: &str) -> Result<TableSchema> {
        validate_identifier(table)?;
        let request = GetSchemaRequest {
            table: table.to_string(),
        };
        let response = self
            .call(move |mut c| async move { c.get_schema(request).await })
            .await?;
        Ok(response.into())
    }

    pub async fn get_count(&mut self, table: &str) -> Result<u64> {
        validate_identifier(table)?;
        let request = GetCountRequest {
            table: table.to_string(),
        };
        let response = self
            .call(move |mut c| async move { c.get_count(request).await })
            .await?;
        Ok(response.count)
    }

    pub async fn fetch_records(&mut self, table: &str, limit: u32, offset: u64) -> Result<RecordBatch> {
        validate_identifier(table)?;
        let request = FetchRecordsRequest {
            table: table.to_string(),
            limit,
            offset,
        };
        let response = self
            .call(move |mut c| async move { c.fetch_records(request).await })
            .await?;
        let batch: RecordBatch = serde_json::from_slice(&response.batch)?;
        Ok(batch)
    }

    /// Pull `table` into `local`. See `transfer_with_progress`.
    pub async fn transfer(
        &mut self,
        local: &mut Connection,
        table: &str,
        options: &TransferOptions,
    ) -> Result<TransferResult> {
        self.transfer_with_progress(local, table, options, |_| {})
            .await
    }

    /// Pull `table` into `local`, calling `progress` after each page.
    ///
    /// A missing local table is created from the sender's schema when
    /// `create_missing_tables` is set; otherwise the call fails with
    /// `TableNotFound` before any page is fetched. Pages already imported stay
    /// imported if a later page fails. Every run starts again at offset 0.
    pub async fn transfer_with_progress<F>(
        &mut self,
        local: &mut Connection,
        table: &str,
        options: &TransferOptions,
        mut progress: F,
    ) -> Result<TransferResult>
    where
        F: FnMut(&PageProgress),
    {
        validate_identifier(table)?;
        self.ensure_local_table(local, table, options.create_missing_tables)
            .await?;

        tracing::info!(
            "Transferring '{}' (strategy: {}, batch size: {})",
            table,
            options.strategy,
            options.batch_size
        );

        self.state = ConnectionState::Transferring;
        let outcome = self
            .pull_pages(local, table, options, &mut progress)
            .await;
        if self.closed.is_none() {
            self.state = ConnectionState::Connected;
        }

        match &outcome {
            Ok(result) => tracing::info!(
                "Transferred '{}': created={} updated={} skipped={} errors={}",
                table,
                result.created,
                result.updated,
                result.skipped,
                result.errors.len()
            ),
            Err(err) => tracing::warn!("Transfer of '{}' failed: {}", table, err),
        }
        outcome
    }

    /// Pull several tables one after another.
    ///
    /// Every table gets its own entry; a failing table never stops the rest.
    /// Only failing to list the sender's tables fails the whole call.
    pub async fn transfer_all(
        &mut self,
        local: &mut Connection,
        options: &TransferAllOptions,
    ) -> Result<BTreeMap<String, Result<TransferResult>>> {
        let tables = match &options.tables {
            Some(tables) => tables.clone(),
            None => self
                .list_tables()
                .await?
                .into_iter()
                .map(|t| t.name)
                .collect(),
        };

        let mut results = BTreeMap::new();
        for table in tables {
            let table_options = options.options_for(&table);
            let outcome = self.transfer(local, &table, &table_options).await;
            results.insert(table, outcome);
        }

        let failed = results.values().filter(|r| r.is_err()).count();
        tracing::info!(
            "Transferred {} tables ({} failed)",
            results.len() - failed,
            failed
        );
        Ok(results)
    }

    /// Detach from the session. Always succeeds locally; the remote detach is
    /// best effort.
    pub async fn disconnect(&mut self) {
        if self.closed.is_none() {
            let request = DetachRequest {
                receiver_id: self.receiver_id.clone(),
            };
            let mut inner = self.inner.clone();
            let detach = tokio::time::timeout(
                self.timeout.min(DISCONNECT_TIMEOUT),
                inner.detach(request),
            )
            .await;
            if !matches!(detach, Ok(Ok(_))) {
                tracing::debug!("Remote detach did not complete; closing locally");
            }
            self.closed = Some("disconnected by receiver".to_string());
        }
        self.state = ConnectionState::Disconnected;
        tracing::info!("Disconnected from {}", self.url);
    }

    async fn ensure_local_table(
        &mut self,
        local: &mut Connection,
        table: &str,
        create_missing: bool,
    ) -> Result<()> {
        let exists = SchemaInspector::local(local).table_exists(table)?;
        if exists {
            return Ok(());
        }
        if !create_missing {
            return Err(TransferError::TableNotFound(table.to_string()));
        }

        let schema = self.get_schema(table).await?;
        DataImporter::new(local).create_table(table, &schema)?;
        Ok(())
    }

    async fn pull_pages<F>(
        &mut self,
        local: &mut Connection,
        table: &str,
        options: &TransferOptions,
        progress: &mut F,
    ) -> Result<TransferResult>
    where
        F: FnMut(&PageProgress),
    {
        let limit = options.batch_size.max(1);
        let mut total = TransferResult::default();
        let mut offset = 0u64;
        let mut page = 0u32;

        loop {
            let batch = self.fetch_records(table, limit, offset).await?;
            let rows = batch.len();
            let has_more = batch.has_more;
            let next_offset = batch.next_offset();

            let records: Vec<JsonValue> = batch.records.into_iter().map(JsonValue::Object).collect();
            let imported = DataImporter::new(local).import_records(table, records, options.strategy)?;
            total.merge(imported);
            page += 1;

            progress(&PageProgress {
                table: table.to_string(),
                page,
                offset,
                rows,
                created: total.created,
                updated: total.updated,
                skipped: total.skipped,
                errors: total.errors.len(),
            });

            if !has_more || rows == 0 {
                break;
            }
            offset = next_offset;
        }

        Ok(total)
    }

    /// Issue one call under the client timeout and translate failures.
    async fn call<T, F, Fut>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(AuthedClient) -> Fut,
        Fut: Future<Output = std::result::Result<Response<T>, Status>>,
    {
        if let Some(reason) = &self.closed {
            return Err(TransferError::Disconnected(reason.clone()));
        }

        match tokio::time::timeout(self.timeout, op(self.inner.clone())).await {
            Err(_) => {
                tracing::warn!("Call to {} timed out after {:?}", self.url, self.timeout);
                Err(TransferError::ConnectionTimeout)
            }
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => {
                let err = status_to_error(status);
                if let TransferError::Disconnected(reason) = &err {
                    tracing::warn!("Connection to {} closed: {}", self.url, reason);
                    self.closed = Some(reason.clone());
                    self.state = ConnectionState::Disconnected;
                }
                Err(err)
            }
        }
    }
}

/// Render an error with its sources, since transport errors hide the cause.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_table_strategy_overrides_default() {
        let mut options = TransferAllOptions {
            tables: None,
            strategies: HashMap::new(),
            defaults: TransferOptions {
                strategy: ConflictStrategy::Skip,
                batch_size: 50,
                create_missing_tables: true,
            },
        };
        options
            .strategies
            .insert("users".to_string(), ConflictStrategy::Merge);

        let users = options.options_for("users");
        assert_eq!(users.strategy, ConflictStrategy::Merge);
        assert_eq!(users.batch_size, 50);
        assert!(users.create_missing_tables);
        assert_eq!(options.options_for("posts").strategy, ConflictStrategy::Skip);
    }

    #[test]
    fn test_transfer_options_follow_config_defaults() {
        let options = TransferOptions::default();
        assert_eq!(options.strategy, ConflictStrategy::Skip);
        assert_eq!(options.batch_size, 500);
        assert!(!options.create_missing_tables);
    }

    #[tokio::test]
    async fn test_malformed_code_is_rejected_before_connecting() {
        let err = Client::connect("http://127.0.0.1:1", "not-a-code", ConnectOptions::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err, TransferError::InvalidCode);
    }

    #[tokio::test]
    async fn test_unsupported_url_scheme() {
        let err = Client::connect("ftp://127.0.0.1:1", "ABCDEFGH", ConnectOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransferError::Disconnected(_)));
    }

    #[tokio::test]
    async fn test_unreachable_sender_is_disconnected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let options = ConnectOptions {
            timeout: Duration::from_secs(2),
            ..ConnectOptions::default()
        };
        let err = Client::connect(&format!("http://{}", addr), "ABCDEFGH", options)
            .await
            .err()
            .unwrap();
        assert!(
            matches!(
                err,
                TransferError::Disconnected(_) | TransferError::ConnectionTimeout
            ),
            "{err:?}"
        );
    }
}
