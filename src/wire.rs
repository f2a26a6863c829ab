use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;
use ulid::Ulid;

use crate::auth::ShareItAuthSource;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::limits::MAX_PAGE_SIZE;
use crate::model::*;
use crate::observability;
use crate::pager::OffsetCursor;
use crate::sql::{self, Command};

pub struct ShareItHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ShareItQueryParser>,
}

impl ShareItHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ShareItQueryParser),
        }
    }

    /// The caller is whoever the connection authenticated as.
    fn caller<C: ClientInfo>(client: &C) -> PgWireResult<Ulid> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        Ulid::from_string(&user).map_err(|_| {
            user_error("28000", format!("user {user:?} is not a valid user id"))
        })
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(client, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command<C: ClientInfo>(
        &self,
        client: &C,
        cmd: Command,
    ) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser { id, name, email } => {
                engine
                    .register_user(id, name, email)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertItem {
                id,
                name,
                description,
                available,
            } => {
                let owner = Self::caller(client)?;
                engine
                    .add_item(id, owner, name, description, available)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::SetItemAvailability { item_id, available } => {
                let owner = Self::caller(client)?;
                engine
                    .set_item_available(item_id, owner, available)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::InsertBooking {
                id,
                item_id,
                start,
                end,
            } => {
                let booker = Self::caller(client)?;
                engine
                    .create_booking(id, booker, item_id, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::DecideBooking {
                booking_id,
                approved,
            } => {
                let owner = Self::caller(client)?;
                engine
                    .decide_booking(booking_id, owner, Decision::from_approved(approved))
                    .await
                    .map_err(engine_err)?;
                Ok(inserted())
            }
            Command::SelectBooking { id } => {
                let caller = Self::caller(client)?;
                let booking = engine.read_booking(id, caller).map_err(engine_err)?;
                booking_rows(vec![booking])
            }
            Command::SelectBookings {
                role,
                state,
                from,
                size,
            } => {
                let caller = Self::caller(client)?;
                if size.is_some_and(|s| s > MAX_PAGE_SIZE) {
                    return Err(engine_err(EngineError::LimitExceeded("page size too large")));
                }
                let cursor = OffsetCursor::of_offset(from, size, None)
                    .map_err(|e| engine_err(e.into()))?;
                let bookings = engine
                    .list_by_state(caller, role, state.as_deref(), &cursor)
                    .map_err(engine_err)?;
                booking_rows(bookings)
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn booking_schema() -> Vec<FieldInfo> {
    let text = |name: &str| FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text);
    let int8 = |name: &str| FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text);
    vec![
        text("id"),
        text("item_id"),
        text("booker_id"),
        int8("start"),
        int8("end"),
        text("status"),
    ]
}

fn booking_rows(bookings: Vec<Booking>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.item_id.to_string())?;
            encoder.encode_field(&b.booker_id.to_string())?;
            encoder.encode_field(&b.span.start)?;
            encoder.encode_field(&b.span.end)?;
            encoder.encode_field(&b.status.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn returns_bookings(sql: &str) -> bool {
    sql.trim_start().to_uppercase().starts_with("SELECT")
}

#[async_trait]
impl SimpleQueryHandler for ShareItHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ShareItQueryParser;

#[async_trait]
impl QueryParser for ShareItQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        if returns_bookings(stmt) {
            Ok(booking_schema())
        } else {
            Ok(vec![])
        }
    }
}

#[async_trait]
impl ExtendedQueryHandler for ShareItHandler {
    type Statement = String;
    type QueryParser = ShareItQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        let fields = if returns_bookings(&target.statement) {
            booking_schema()
        } else {
            vec![]
        };
        Ok(DescribeStatementResponse::new(param_types, fields))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        if returns_bookings(&target.statement.statement) {
            Ok(DescribePortalResponse::new(booking_schema()))
        } else {
            Ok(DescribePortalResponse::new(vec![]))
        }
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let values: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &values)
}

/// One pass over the statement text, so `$N` inside a bound value stays literal.
/// Placeholders with no bound value are left as written.
fn substitute(sql: &str, values: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let bytes = sql.as_bytes();
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let value = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| values.get(n));
        if let Some(value) = value {
            result.push_str(&sql[copied..i]);
            match value {
                Some(text) => {
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                None => result.push_str("NULL"),
            }
            copied = end;
        }
        i = end.max(i + 1);
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ShareItFactory {
    handler: Arc<ShareItHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ShareItAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ShareItFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ShareItAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ShareItHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ShareItFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(ShareItFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match (e, e.kind()) {
        (EngineError::AlreadyExists(_), _) => "23505",
        (_, ErrorKind::NotFound) => "P0002",
        (_, ErrorKind::BadRequest) => "22023",
        _ => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    debug!("request refused: {e}");
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
