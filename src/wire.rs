use std::fmt::Debug;
use std::sync::Arc;

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
use ulid::Ulid;

use crate::auth::CharterAuthSource;
use crate::engine::{Decision, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct CharterHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CharterQueryParser>,
}

impl CharterHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CharterQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.dispatch(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertBus { id, name, plate_no, capacity } => {
                engine
                    .register_bus(id, name, plate_no, capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBus { id, name, plate_no, capacity } => {
                engine
                    .update_bus(id, name, plate_no, capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SetBusStatus { id, enabled } => {
                engine.set_bus_status(id, enabled).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RetireBus { id } => {
                engine.retire_bus(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::RestoreBus { id } => {
                engine.restore_bus(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectBuses { retired } => {
                let buses = match retired {
                    Some(true) => engine.list_retired_buses().await,
                    _ => engine.list_active_buses().await,
                };
                let schema = Arc::new(bus_schema());
                let rows: Vec<PgWireResult<_>> = buses
                    .into_iter()
                    .map(|bus| encode_bus(&schema, &bus))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertReservation { draft } => {
                engine.submit_reservation(draft).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::ApproveReservation { id, driver, bus } => {
                engine
                    .decide_reservation(id, Decision::Approve { driver, bus })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RejectReservation { id, notes } => {
                engine
                    .decide_reservation(id, Decision::Reject { notes })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::CancelReservation { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectReservations { bus_id, id } => {
                let reservations = if let Some(rid) = id {
                    vec![engine.get_reservation(rid).await.map_err(engine_err)?]
                } else if let Some(bid) = bus_id {
                    engine.list_reservations(bid).await.map_err(engine_err)?
                } else {
                    engine.list_all_reservations().await
                };
                let schema = Arc::new(reservation_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .into_iter()
                    .map(|r| {
                        let owner = engine.bus_for_reservation(&r.id);
                        encode_reservation(&schema, owner, &r)
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { bus_id, date, return_date } => {
                let report = engine
                    .check_availability(bus_id, date, return_date)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let conflicts_json = serde_json::to_string(&report.conflicts)
                    .unwrap_or_else(|_| "[]".to_string());

                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&report.bus_id.to_string())?;
                encoder.encode_field(&report.window.start.to_string())?;
                encoder.encode_field(&report.window.end.to_string())?;
                encoder.encode_field(&if report.available { "t" } else { "f" })?;
                encoder.encode_field(&conflicts_json)?;
                encoder.encode_field(&report.message)?;
                let rows = vec![Ok(encoder.take_row())];

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let bus_id_str = channel.strip_prefix("bus_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected bus_{{id}})"),
                    )))
                })?;
                let _bus_id = Ulid::from_string(bus_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn bus_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        varchar("plate_no"),
        FieldInfo::new("capacity".into(), None, None, Type::INT4, FieldFormat::Text),
        varchar("status"),
        FieldInfo::new("retired".into(), None, None, Type::BOOL, FieldFormat::Text),
        varchar("retired_at"),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("bus_id"),
        varchar("requester_id"),
        varchar("driver_id"),
        varchar("purpose"),
        varchar("destination"),
        varchar("departure_date"),
        varchar("departure_time"),
        varchar("return_date"),
        varchar("return_time"),
        FieldInfo::new("passengers".into(), None, None, Type::INT4, FieldFormat::Text),
        varchar("status"),
        varchar("created_at"),
        varchar("decided_at"),
        varchar("notes"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        varchar("bus_id"),
        varchar("start_date"),
        varchar("end_date"),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
        varchar("conflicts"),
        varchar("message"),
    ]
}

fn encode_bus(
    schema: &Arc<Vec<FieldInfo>>,
    bus: &BusInfo,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&bus.id.to_string())?;
    encoder.encode_field(&bus.name)?;
    encoder.encode_field(&bus.plate_no)?;
    encoder.encode_field(&(bus.capacity as i32))?;
    encoder.encode_field(&if bus.enabled { "enabled" } else { "disabled" })?;
    // Postgres text format for booleans
    encoder.encode_field(&if bus.retired_at.is_some() { "t" } else { "f" })?;
    encoder.encode_field(&bus.retired_at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()))?;
    Ok(encoder.take_row())
}

fn encode_reservation(
    schema: &Arc<Vec<FieldInfo>>,
    bus_id: Option<Ulid>,
    r: &Reservation,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&bus_id.map(|b| b.to_string()))?;
    encoder.encode_field(&r.requester.to_string())?;
    encoder.encode_field(&r.driver.map(|d| d.to_string()))?;
    encoder.encode_field(&r.purpose)?;
    encoder.encode_field(&r.destination)?;
    encoder.encode_field(&r.departure_date.to_string())?;
    encoder.encode_field(&r.departure_time.format("%H:%M:%S").to_string())?;
    encoder.encode_field(&r.return_date.to_string())?;
    encoder.encode_field(&r.return_time.format("%H:%M:%S").to_string())?;
    encoder.encode_field(&(r.passengers as i32))?;
    encoder.encode_field(&r.status.as_str())?;
    encoder.encode_field(&r.created_at.format("%Y-%m-%d %H:%M:%S").to_string())?;
    encoder.encode_field(&r.decided_at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()))?;
    encoder.encode_field(&r.notes)?;
    Ok(encoder.take_row())
}

#[async_trait]
impl SimpleQueryHandler for CharterHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CharterQueryParser;

#[async_trait]
impl QueryParser for CharterQueryParser {
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
        Ok(select_schema(stmt).unwrap_or_default())
    }
}

/// Schema for a SELECT statement, judged textually — enough for Describe.
fn select_schema(stmt: &str) -> Option<Vec<FieldInfo>> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return None;
    }
    if upper.contains("AVAILABILITY") {
        Some(availability_schema())
    } else if upper.contains("RESERVATIONS") {
        Some(reservation_schema())
    } else if upper.contains("BUSES") {
        Some(bus_schema())
    } else {
        None
    }
}

#[async_trait]
impl ExtendedQueryHandler for CharterHandler {
    type Statement = String;
    type QueryParser = CharterQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(
            param_types,
            select_schema(&target.statement).unwrap_or_default(),
        ))
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
        Ok(DescribePortalResponse::new(
            select_schema(&target.statement.statement).unwrap_or_default(),
        ))
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Connection entry point ───────────────────────────────────────

pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(CharterFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CharterFactory {
    handler: Arc<CharterHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CharterAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CharterFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = CharterAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CharterHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CharterFactory {
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

// ── Error mapping ────────────────────────────────────────────────

/// Engine errors cross the wire as SQLSTATE + structured JSON detail where
/// the caller needs more than prose (validation reasons, conflict windows,
/// blocking ids).
fn engine_err(e: EngineError) -> PgWireError {
    let (code, message) = match &e {
        EngineError::NotFound(_) => ("P0002", e.to_string()),
        EngineError::AlreadyExists(_) => ("42710", e.to_string()),
        EngineError::Validation(reasons) => (
            "23514",
            serde_json::to_string(reasons).unwrap_or_else(|_| e.to_string()),
        ),
        EngineError::Conflict(windows) => (
            "23P01",
            serde_json::to_string(windows).unwrap_or_else(|_| e.to_string()),
        ),
        EngineError::Lifecycle { .. } => ("55000", e.to_string()),
        EngineError::StateTransition { .. } => ("55000", e.to_string()),
        EngineError::RetireBlocked { blocking, .. } => (
            "55006",
            serde_json::to_string(
                &blocking.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
            )
            .unwrap_or_else(|_| e.to_string()),
        ),
        EngineError::LimitExceeded(_) => ("54000", e.to_string()),
        EngineError::WalError(_) => ("58030", e.to_string()),
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
