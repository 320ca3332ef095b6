use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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

use crate::auth::SlotbookAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::timegrid::format_time_of_day;

pub struct SlotbookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<SlotbookQueryParser>,
}

impl SlotbookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(SlotbookQueryParser),
        }
    }

    async fn run(&self, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }

    async fn execute_command(&self, cmd: Command) -> Result<Response, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertProvider { id, timezone, name } => {
                engine.create_provider(id, timezone, name).await?;
                Ok(inserted())
            }
            Command::InsertService(new) => {
                engine.create_service(new).await?;
                Ok(inserted())
            }
            Command::ArchiveService { id } => {
                engine.archive_service(id).await?;
                Ok(updated())
            }
            Command::DeleteService { id } => {
                engine.delete_service(id).await?;
                Ok(deleted())
            }
            Command::InsertClient(new) => {
                engine.create_client(new).await?;
                Ok(inserted())
            }
            Command::DeleteClient { id, reason } => {
                engine.delete_client(id, reason).await?;
                Ok(deleted())
            }
            Command::InsertAvailability {
                id,
                provider_id,
                weekday,
                span,
            } => {
                engine.add_availability(id, provider_id, weekday, span).await?;
                Ok(inserted())
            }
            Command::DeleteAvailability { id } => {
                engine.remove_availability(id).await?;
                Ok(deleted())
            }
            Command::InsertBreak {
                id,
                provider_id,
                weekday,
                span,
            } => {
                engine.add_break(id, provider_id, weekday, span).await?;
                Ok(inserted())
            }
            Command::DeleteBreak { id } => {
                engine.remove_break(id).await?;
                Ok(deleted())
            }
            Command::InsertException {
                id,
                provider_id,
                date,
                span,
                is_available,
            } => {
                engine
                    .add_exception(id, provider_id, date, span, is_available)
                    .await?;
                Ok(inserted())
            }
            Command::DeleteException { id } => {
                engine.remove_exception(id).await?;
                Ok(deleted())
            }
            Command::InsertBooking(req) => {
                engine.request_booking(req).await?;
                Ok(inserted())
            }
            Command::CancelBooking { id, reason } => {
                engine.cancel_booking(id, reason).await?;
                Ok(updated())
            }
            Command::CompleteBooking { id } => {
                engine.complete_booking(id).await?;
                Ok(updated())
            }
            Command::InsertPayment(new) => {
                engine.record_payment(new).await?;
                Ok(inserted())
            }
            Command::SelectOpenSlots {
                provider_id,
                service_id,
                from,
                to,
            } => {
                let slots = engine
                    .get_open_slots(provider_id, service_id, from, to)
                    .await?;
                let rows = slots
                    .iter()
                    .map(|slot| (slot.provider_id, slot.date, slot.span));
                rows_response(SelectTable::OpenSlots, rows, encode_span_row)
            }
            Command::SelectOpenIntervals { provider_id, date } => {
                let spans = engine.get_open_intervals(provider_id, date).await?;
                let rows = spans.iter().map(|span| (provider_id, date, *span));
                rows_response(SelectTable::OpenIntervals, rows, encode_span_row)
            }
            Command::SelectBookings { provider_id, date } => {
                let bookings = engine.list_bookings(provider_id, date).await?;
                rows_response(SelectTable::Bookings, bookings.iter(), encode_booking)
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await?;
                rows_response(SelectTable::Bookings, std::iter::once(&booking), encode_booking)
            }
            Command::SelectBookingByRef { booking_ref } => {
                let booking = engine.get_booking_by_ref(&booking_ref).await?;
                rows_response(SelectTable::Bookings, std::iter::once(&booking), encode_booking)
            }
            Command::SelectProviders => {
                let providers = engine.list_providers().await;
                rows_response(SelectTable::Providers, providers.iter(), |enc, p| {
                    enc.encode_field(&p.id.to_string())?;
                    enc.encode_field(&p.name)?;
                    enc.encode_field(&p.timezone)
                })
            }
            Command::SelectServices => {
                let services = engine.list_services();
                rows_response(SelectTable::Services, services.iter(), |enc, s| {
                    enc.encode_field(&s.id.to_string())?;
                    enc.encode_field(&s.name)?;
                    enc.encode_field(&i32::from(s.duration_minutes))?;
                    enc.encode_field(&s.price)?;
                    enc.encode_field(&s.provider_id.map(|p| p.to_string()))?;
                    enc.encode_field(&s.archived)?;
                    enc.encode_field(&s.deleted_at.is_some())
                })
            }
            Command::SelectClients => {
                let clients = engine.list_clients();
                rows_response(SelectTable::Clients, clients.iter(), |enc, c| {
                    enc.encode_field(&c.id.to_string())?;
                    enc.encode_field(&c.name)?;
                    enc.encode_field(&c.email)?;
                    enc.encode_field(&c.phone)?;
                    enc.encode_field(&c.deleted_at.is_some())
                })
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn updated() -> Response {
    Response::Execution(Tag::new("UPDATE").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

fn encode_span_row(
    enc: &mut DataRowEncoder,
    row: &(ulid::Ulid, chrono::NaiveDate, Span),
) -> PgWireResult<()> {
    let (provider_id, date, span) = row;
    enc.encode_field(&provider_id.to_string())?;
    enc.encode_field(&date.to_string())?;
    enc.encode_field(&format_time_of_day(span.start))?;
    enc.encode_field(&format_time_of_day(span.end))
}

fn encode_booking(enc: &mut DataRowEncoder, b: &&Booking) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.booking_ref)?;
    enc.encode_field(&b.provider_id.to_string())?;
    enc.encode_field(&b.service_id.to_string())?;
    enc.encode_field(&b.client_id.to_string())?;
    enc.encode_field(&b.date.to_string())?;
    enc.encode_field(&format_time_of_day(b.span.start))?;
    enc.encode_field(&format_time_of_day(b.span.end))?;
    enc.encode_field(&b.status.as_str().to_string())?;
    enc.encode_field(&b.cancel_reason)?;
    enc.encode_field(&b.notes)?;
    enc.encode_field(&b.group_count.map(i64::from))?;
    enc.encode_field(&b.payment_status.map(|s| s.as_str().to_string()))?;
    enc.encode_field(&b.payment_amount)
}

fn rows_response<T, I, F>(table: SelectTable, items: I, encode: F) -> Result<Response, EngineError>
where
    I: IntoIterator<Item = T>,
    F: Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
{
    let schema = Arc::new(table.schema());
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, &item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    )))
}

// ── Result schemas ───────────────────────────────────────────────

/// Tables a SELECT can read, each with a fixed result shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectTable {
    OpenSlots,
    OpenIntervals,
    Bookings,
    Providers,
    Services,
    Clients,
}

impl SelectTable {
    /// Table named after `FROM` in a SELECT, found without a full parse so
    /// statements with unbound `$n` placeholders can be described.
    fn from_sql(sql: &str) -> Option<Self> {
        let mut words = sql.split_whitespace();
        if !words.next()?.eq_ignore_ascii_case("select") {
            return None;
        }
        let table = words
            .skip_while(|w| !w.eq_ignore_ascii_case("from"))
            .nth(1)?
            .trim_end_matches(';')
            .trim_matches('"')
            .to_lowercase();
        match table.as_str() {
            "open_slots" => Some(SelectTable::OpenSlots),
            "open_intervals" => Some(SelectTable::OpenIntervals),
            "bookings" => Some(SelectTable::Bookings),
            "providers" => Some(SelectTable::Providers),
            "services" => Some(SelectTable::Services),
            "clients" => Some(SelectTable::Clients),
            _ => None,
        }
    }

    fn schema(self) -> Vec<FieldInfo> {
        let columns: &[(&str, Type)] = match self {
            SelectTable::OpenSlots | SelectTable::OpenIntervals => &[
                ("provider_id", Type::VARCHAR),
                ("date", Type::VARCHAR),
                ("start_time", Type::VARCHAR),
                ("end_time", Type::VARCHAR),
            ],
            SelectTable::Bookings => &[
                ("id", Type::VARCHAR),
                ("booking_ref", Type::VARCHAR),
                ("provider_id", Type::VARCHAR),
                ("service_id", Type::VARCHAR),
                ("client_id", Type::VARCHAR),
                ("date", Type::VARCHAR),
                ("start_time", Type::VARCHAR),
                ("end_time", Type::VARCHAR),
                ("status", Type::VARCHAR),
                ("cancel_reason", Type::VARCHAR),
                ("notes", Type::VARCHAR),
                ("group_count", Type::INT8),
                ("payment_status", Type::VARCHAR),
                ("payment_amount", Type::INT8),
            ],
            SelectTable::Providers => &[
                ("id", Type::VARCHAR),
                ("name", Type::VARCHAR),
                ("timezone", Type::VARCHAR),
            ],
            SelectTable::Services => &[
                ("id", Type::VARCHAR),
                ("name", Type::VARCHAR),
                ("duration_minutes", Type::INT4),
                ("price", Type::INT8),
                ("provider_id", Type::VARCHAR),
                ("archived", Type::BOOL),
                ("deleted", Type::BOOL),
            ],
            SelectTable::Clients => &[
                ("id", Type::VARCHAR),
                ("name", Type::VARCHAR),
                ("email", Type::VARCHAR),
                ("phone", Type::VARCHAR),
                ("deleted", Type::BOOL),
            ],
        };
        columns
            .iter()
            .map(|(name, ty)| {
                FieldInfo::new((*name).into(), None, None, ty.clone(), FieldFormat::Text)
            })
            .collect()
    }
}

fn result_schema(sql: &str) -> Vec<FieldInfo> {
    SelectTable::from_sql(sql).map_or_else(Vec::new, SelectTable::schema)
}

#[async_trait]
impl SimpleQueryHandler for SlotbookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmds = sql::parse_sql_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            responses.push(self.run(cmd).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotbookQueryParser;

#[async_trait]
impl QueryParser for SlotbookQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotbookHandler {
    type Statement = String;
    type QueryParser = SlotbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(cmd).await
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside string literals, as (byte range, N), in order.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start..end].parse::<usize>() {
                    found.push((i..end, n));
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    substitute_text_params(&portal.statement.statement, &portal.parameters)
}

// One pass over the statement text; bound values are never rescanned.
fn substitute_text_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|idx| params.get(idx)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotbookFactory {
    handler: Arc<SlotbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SlotbookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SlotbookFactory {
    pub fn new(engine: Arc<Engine>, auth_source: SlotbookAuthSource) -> Self {
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotbookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotbookFactory {
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
    auth: SlotbookAuthSource,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SlotbookFactory::new(engine, auth));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE a client can branch on for each engine failure.
pub fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidTime(_) => "22007",
        EngineError::Validation(_) | EngineError::ProviderUnresolved(_) => "22023",
        EngineError::SlotUnavailable { .. } => "P0001",
        EngineError::SlotTooShort { .. } => "P0002",
        EngineError::ConcurrencyConflict(_) => "40001",
        EngineError::NotFound(..) | EngineError::RefNotFound(_) => "02000",
        EngineError::AlreadyExists(..) => "23505",
        EngineError::AlreadyCancelled(_)
        | EngineError::InvalidTransition { .. }
        | EngineError::ServiceUnavailable(_)
        | EngineError::ClientUnavailable(_) => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

pub fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::InvalidTime(_) => "22007",
        SqlError::UnknownTable(_) => "42P01",
        _ => "42601",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        engine_sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sql_sqlstate(&e).into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::UnavailableReason;
    use crate::timegrid::TimeError;

    #[test]
    fn select_table_from_sql() {
        assert_eq!(
            SelectTable::from_sql("SELECT * FROM open_slots WHERE provider_id = $1"),
            Some(SelectTable::OpenSlots)
        );
        assert_eq!(
            SelectTable::from_sql("select id, status from Bookings where id = $1"),
            Some(SelectTable::Bookings)
        );
        assert_eq!(SelectTable::from_sql("SELECT * FROM clients;"), Some(SelectTable::Clients));
        assert_eq!(SelectTable::from_sql("INSERT INTO bookings VALUES ($1)"), None);
        assert_eq!(SelectTable::from_sql("SELECT * FROM nowhere"), None);
    }

    #[test]
    fn schemas_match_encoders() {
        assert_eq!(SelectTable::OpenSlots.schema().len(), 4);
        assert_eq!(SelectTable::Bookings.schema().len(), 14);
        assert_eq!(SelectTable::Providers.schema().len(), 3);
        assert_eq!(SelectTable::Services.schema().len(), 7);
        assert_eq!(SelectTable::Clients.schema().len(), 5);
    }

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM bookings"), 0);
        assert_eq!(count_params("VALUES ($1, $2, $10)"), 10);
        assert_eq!(count_params("WHERE a = $3 AND b = $1"), 3);
    }

    #[test]
    fn substitute_quotes_and_nulls() {
        let params = vec![Some(b"O'Brien".to_vec()), None];
        let sql = substitute_text_params("VALUES ($1, $2)", &params);
        assert_eq!(sql, "VALUES ('O''Brien', NULL)");
    }

    #[test]
    fn substitute_double_digit_placeholders() {
        let params: Vec<Option<Vec<u8>>> = (1..=10).map(|i| Some(i.to_string().into_bytes())).collect();
        let sql = substitute_text_params("$1 $10", &params);
        assert_eq!(sql, "'1' '10'");
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let id = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
        let params = vec![Some(id.as_bytes().to_vec()), Some(b"ref $1".to_vec())];
        let sql = substitute_text_params(
            "SELECT * FROM bookings WHERE booking_ref = $2 AND id = $1",
            &params,
        );
        assert_eq!(
            sql,
            format!("SELECT * FROM bookings WHERE booking_ref = 'ref $1' AND id = '{id}'")
        );
    }

    #[test]
    fn placeholders_inside_literals_are_text() {
        let params = vec![Some(b"x".to_vec())];
        assert_eq!(count_params("VALUES ('$2', $1)"), 1);
        assert_eq!(
            substitute_text_params("VALUES ('$1 it''s', $1, $3)", &params),
            "VALUES ('$1 it''s', 'x', $3)"
        );
    }

    #[test]
    fn sqlstate_codes_are_stable() {
        let span = Span::new(600, 630);
        assert_eq!(
            engine_sqlstate(&EngineError::unavailable(UnavailableReason::BookingConflict, span)),
            "P0001"
        );
        assert_eq!(
            engine_sqlstate(&EngineError::SlotTooShort { required: 30, available: 15 }),
            "P0002"
        );
        assert_eq!(
            engine_sqlstate(&EngineError::InvalidTime(TimeError::InvalidTimeFormat("9".into()))),
            "22007"
        );
        assert_eq!(engine_sqlstate(&EngineError::RefNotFound("BK".into())), "02000");
        assert_eq!(engine_sqlstate(&EngineError::LimitExceeded("x")), "54000");
        assert_eq!(sql_sqlstate(&SqlError::Empty), "42601");
        assert_eq!(
            sql_sqlstate(&SqlError::InvalidTime(TimeError::InvalidDate("x".into()))),
            "22007"
        );
    }
}
