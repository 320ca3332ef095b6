use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::timegrid::{TimeError, parse_date, parse_span};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProvider {
        id: Ulid,
        timezone: String,
        name: Option<String>,
    },
    InsertService(NewService),
    ArchiveService {
        id: Ulid,
    },
    DeleteService {
        id: Ulid,
    },
    InsertClient(NewClient),
    DeleteClient {
        id: Ulid,
        reason: Option<String>,
    },
    InsertAvailability {
        id: Ulid,
        provider_id: Ulid,
        weekday: u8,
        span: Span,
    },
    DeleteAvailability {
        id: Ulid,
    },
    InsertBreak {
        id: Ulid,
        provider_id: Ulid,
        weekday: u8,
        span: Span,
    },
    DeleteBreak {
        id: Ulid,
    },
    InsertException {
        id: Ulid,
        provider_id: Ulid,
        date: NaiveDate,
        span: Option<Span>,
        is_available: bool,
    },
    DeleteException {
        id: Ulid,
    },
    InsertBooking(BookingRequest),
    CancelBooking {
        id: Ulid,
        reason: Option<String>,
    },
    CompleteBooking {
        id: Ulid,
    },
    InsertPayment(NewPayment),
    SelectOpenSlots {
        provider_id: Ulid,
        service_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    SelectOpenIntervals {
        provider_id: Ulid,
        date: NaiveDate,
    },
    SelectBookings {
        provider_id: Ulid,
        date: Option<NaiveDate>,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookingByRef {
        booking_ref: String,
    },
    SelectProviders,
    SelectServices,
    SelectClients,
}

/// Parse a single statement. Extra statements after the first are ignored.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmts = parse_statements(sql)?;
    parse_statement(&stmts[0])
}

/// Parse every `;`-separated statement, as sent by a simple query.
pub fn parse_sql_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    parse_statements(sql)?.iter().map(parse_statement).collect()
}

fn parse_statements(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts)
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn require(table: &'static str, values: &[Expr], min: usize, max: usize) -> Result<(), SqlError> {
    if values.len() < min || values.len() > max {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

/// Value at `idx`, treating a missing trailing column as NULL.
fn optional(values: &[Expr], idx: usize) -> Option<&Expr> {
    values.get(idx).filter(|e| !is_null(e))
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "providers" => {
            require("providers", &values, 2, 3)?;
            Ok(Command::InsertProvider {
                id: parse_ulid_expr(&values[0])?,
                timezone: parse_string(&values[1])?,
                name: optional(&values, 2).map(parse_string).transpose()?,
            })
        }
        "services" => {
            require("services", &values, 3, 5)?;
            Ok(Command::InsertService(NewService {
                id: parse_ulid_expr(&values[0])?,
                name: parse_string(&values[1])?,
                duration_minutes: parse_u16(&values[2])?,
                price: optional(&values, 3).map(parse_i64_expr).transpose()?,
                provider_id: optional(&values, 4).map(parse_ulid_expr).transpose()?,
            }))
        }
        "clients" => {
            require("clients", &values, 3, 4)?;
            Ok(Command::InsertClient(NewClient {
                id: parse_ulid_expr(&values[0])?,
                name: parse_string(&values[1])?,
                email: parse_string(&values[2])?,
                phone: optional(&values, 3).map(parse_string).transpose()?,
            }))
        }
        "availability" | "breaks" => {
            require("availability", &values, 5, 5)?;
            let id = parse_ulid_expr(&values[0])?;
            let provider_id = parse_ulid_expr(&values[1])?;
            let weekday = parse_weekday(&values[2])?;
            let span = parse_span_exprs(&values[3], &values[4])?;
            if table == "availability" {
                Ok(Command::InsertAvailability { id, provider_id, weekday, span })
            } else {
                Ok(Command::InsertBreak { id, provider_id, weekday, span })
            }
        }
        "availability_exceptions" => {
            let (span, is_available) = match values.len() {
                4 => (None, parse_bool(&values[3])?),
                6 => {
                    let span = match (optional(&values, 3), optional(&values, 4)) {
                        (None, None) => None,
                        (Some(start), Some(end)) => Some(parse_span_exprs(start, end)?),
                        _ => {
                            return Err(SqlError::Parse(
                                "exception needs both start_time and end_time or neither".into(),
                            ));
                        }
                    };
                    (span, parse_bool(&values[5])?)
                }
                n => return Err(SqlError::WrongArity("availability_exceptions", 6, n)),
            };
            Ok(Command::InsertException {
                id: parse_ulid_expr(&values[0])?,
                provider_id: parse_ulid_expr(&values[1])?,
                date: parse_date_expr(&values[2])?,
                span,
                is_available,
            })
        }
        "bookings" => {
            require("bookings", &values, 6, 11)?;
            Ok(Command::InsertBooking(BookingRequest {
                id: parse_ulid_expr(&values[0])?,
                service_id: parse_ulid_expr(&values[1])?,
                client_id: parse_ulid_expr(&values[2])?,
                date: parse_date_expr(&values[3])?,
                span: parse_span_exprs(&values[4], &values[5])?,
                provider_id: optional(&values, 6).map(parse_ulid_expr).transpose()?,
                booking_ref: optional(&values, 7).map(parse_string).transpose()?,
                notes: optional(&values, 8).map(parse_string).transpose()?,
                group_count: optional(&values, 9).map(parse_u32).transpose()?,
                payment_option: optional(&values, 10).map(parse_string).transpose()?,
            }))
        }
        "payments" => {
            require("payments", &values, 4, 5)?;
            let status = parse_string(&values[3])?;
            Ok(Command::InsertPayment(NewPayment {
                id: parse_ulid_expr(&values[0])?,
                booking_id: parse_ulid_expr(&values[1])?,
                amount: parse_i64_expr(&values[2])?,
                status: PaymentStatus::parse(&status)
                    .ok_or_else(|| SqlError::Parse(format!("bad payment status: {status}")))?,
                link: optional(&values, 4).map(parse_string).transpose()?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut set = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &assignment.value));
    }
    let column = |name: &str| set.iter().find(|(c, _)| c == name).map(|(_, v)| *v);

    match table.as_str() {
        "bookings" => {
            let status = column("status").ok_or(SqlError::MissingFilter("status"))?;
            let status = parse_string(status)?;
            match BookingStatus::parse(&status) {
                Some(BookingStatus::Cancelled) => {
                    let reason = column("cancel_reason")
                        .filter(|e| !is_null(e))
                        .map(parse_string)
                        .transpose()?;
                    Ok(Command::CancelBooking { id, reason })
                }
                Some(BookingStatus::Completed) => Ok(Command::CompleteBooking { id }),
                _ => Err(SqlError::Unsupported(format!(
                    "bookings can only be set to cancelled or completed, not {status}"
                ))),
            }
        }
        "services" => {
            let archived = column("archived").ok_or(SqlError::MissingFilter("archived"))?;
            if parse_bool(archived)? {
                Ok(Command::ArchiveService { id })
            } else {
                Err(SqlError::Unsupported("services cannot be unarchived".into()))
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "availability" => Ok(Command::DeleteAvailability { id }),
        "breaks" => Ok(Command::DeleteBreak { id }),
        "availability_exceptions" => Ok(Command::DeleteException { id }),
        "services" => Ok(Command::DeleteService { id }),
        "clients" => Ok(Command::DeleteClient { id, reason: None }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column filters collected from an AND chain of comparisons.
#[derive(Default)]
struct Filters<'a> {
    eq: Vec<(String, &'a Expr)>,
    gte: Vec<(String, &'a Expr)>,
    lte: Vec<(String, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(expr: &'a Expr, out: &mut Self) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => Self::collect(inner, out),
            Expr::BinaryOp { left, op, right } => {
                let target = match op {
                    ast::BinaryOperator::And => {
                        Self::collect(left, out)?;
                        return Self::collect(right, out);
                    }
                    ast::BinaryOperator::Eq => &mut out.eq,
                    ast::BinaryOperator::GtEq => &mut out.gte,
                    ast::BinaryOperator::LtEq => &mut out.lte,
                    _ => return Err(SqlError::Unsupported(format!("operator {op}"))),
                };
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                target.push((column, right.as_ref()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
        }
    }

    fn find(list: &[(String, &'a Expr)], column: &str) -> Option<&'a Expr> {
        list.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        Self::find(&self.eq, column)
    }

    fn gte(&self, column: &str) -> Option<&'a Expr> {
        Self::find(&self.gte, column)
    }

    fn lte(&self, column: &str) -> Option<&'a Expr> {
        Self::find(&self.lte, column)
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        Filters::collect(selection, &mut filters)?;
    }
    let ulid_filter = |column: &'static str| -> Result<Ulid, SqlError> {
        filters
            .eq(column)
            .ok_or(SqlError::MissingFilter(column))
            .and_then(parse_ulid_expr)
    };

    match table.as_str() {
        "open_slots" => {
            let (from, to) = match filters.eq("date") {
                Some(date) => {
                    let date = parse_date_expr(date)?;
                    (date, date)
                }
                None => (
                    parse_date_expr(filters.gte("date").ok_or(SqlError::MissingFilter("date"))?)?,
                    parse_date_expr(filters.lte("date").ok_or(SqlError::MissingFilter("date"))?)?,
                ),
            };
            Ok(Command::SelectOpenSlots {
                provider_id: ulid_filter("provider_id")?,
                service_id: ulid_filter("service_id")?,
                from,
                to,
            })
        }
        "open_intervals" => Ok(Command::SelectOpenIntervals {
            provider_id: ulid_filter("provider_id")?,
            date: parse_date_expr(filters.eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
        }),
        "bookings" => {
            if let Some(id) = filters.eq("id") {
                return Ok(Command::SelectBooking { id: parse_ulid_expr(id)? });
            }
            if let Some(booking_ref) = filters.eq("booking_ref") {
                return Ok(Command::SelectBookingByRef {
                    booking_ref: parse_string(booking_ref)?,
                });
            }
            Ok(Command::SelectBookings {
                provider_id: ulid_filter("provider_id")?,
                date: filters.eq("date").map(parse_date_expr).transpose()?,
            })
        }
        "providers" => Ok(Command::SelectProviders),
        "services" => Ok(Command::SelectServices),
        "clients" => Ok(Command::SelectClients),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64_expr(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_weekday(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    match u8::try_from(v) {
        Ok(day) if day <= 6 => Ok(day),
        Ok(day) => Err(SqlError::InvalidTime(TimeError::InvalidWeekday(day))),
        Err(_) => Err(SqlError::Parse(format!("bad weekday: {v}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date(&parse_string(expr)?).map_err(SqlError::InvalidTime)
}

fn parse_span_exprs(start: &Expr, end: &Expr) -> Result<Span, SqlError> {
    parse_span(&parse_string(start)?, &parse_string(end)?).map_err(SqlError::InvalidTime)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    InvalidTime(TimeError),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidTime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parse_insert_provider() {
        let sql = format!("INSERT INTO providers (id, timezone, name) VALUES ('{ID}', 'America/New_York', 'Dr. Lee')");
        match parse_sql(&sql).unwrap() {
            Command::InsertProvider { id, timezone, name } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(timezone, "America/New_York");
                assert_eq!(name.as_deref(), Some("Dr. Lee"));
            }
            cmd => panic!("expected InsertProvider, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_provider_without_name() {
        let sql = format!("INSERT INTO providers (id, timezone) VALUES ('{ID}', 'UTC')");
        match parse_sql(&sql).unwrap() {
            Command::InsertProvider { name, .. } => assert_eq!(name, None),
            cmd => panic!("expected InsertProvider, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_service_with_nulls() {
        let sql = format!("INSERT INTO services VALUES ('{ID}', 'Checkup', 30, NULL, '{OTHER}')");
        match parse_sql(&sql).unwrap() {
            Command::InsertService(s) => {
                assert_eq!(s.name, "Checkup");
                assert_eq!(s.duration_minutes, 30);
                assert_eq!(s.price, None);
                assert_eq!(s.provider_id.map(|p| p.to_string()).as_deref(), Some(OTHER));
            }
            cmd => panic!("expected InsertService, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_client() {
        let sql = format!("INSERT INTO clients VALUES ('{ID}', 'Ada', 'ada@example.com')");
        match parse_sql(&sql).unwrap() {
            Command::InsertClient(c) => {
                assert_eq!(c.email, "ada@example.com");
                assert_eq!(c.phone, None);
            }
            cmd => panic!("expected InsertClient, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_availability_and_break() {
        let sql = format!("INSERT INTO availability VALUES ('{ID}', '{OTHER}', 1, '09:00', '17:00')");
        match parse_sql(&sql).unwrap() {
            Command::InsertAvailability { weekday, span, .. } => {
                assert_eq!(weekday, 1);
                assert_eq!(span, Span::new(540, 1020));
            }
            cmd => panic!("expected InsertAvailability, got {cmd:?}"),
        }

        let sql = format!("INSERT INTO breaks VALUES ('{ID}', '{OTHER}', 0, '22:00', '24:00')");
        match parse_sql(&sql).unwrap() {
            Command::InsertBreak { weekday, span, .. } => {
                assert_eq!(weekday, 0);
                assert_eq!(span, Span::new(1320, 1440));
            }
            cmd => panic!("expected InsertBreak, got {cmd:?}"),
        }
    }

    #[test]
    fn availability_rejects_bad_times() {
        let sql = format!("INSERT INTO availability VALUES ('{ID}', '{OTHER}', 1, '9:00', '17:00')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::InvalidTime(TimeError::InvalidTimeFormat(_)))
        ));

        let sql = format!("INSERT INTO availability VALUES ('{ID}', '{OTHER}', 1, '17:00', '09:00')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::InvalidTime(TimeError::InvalidInterval { .. }))
        ));

        let sql = format!("INSERT INTO availability VALUES ('{ID}', '{OTHER}', 7, '09:00', '17:00')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::InvalidTime(TimeError::InvalidWeekday(7)))
        ));
    }

    #[test]
    fn parse_insert_exception_forms() {
        let sql = format!(
            "INSERT INTO availability_exceptions VALUES ('{ID}', '{OTHER}', '2030-06-03', '10:00', '11:00', false)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertException { date: d, span, is_available, .. } => {
                assert_eq!(d, date("2030-06-03"));
                assert_eq!(span, Some(Span::new(600, 660)));
                assert!(!is_available);
            }
            cmd => panic!("expected InsertException, got {cmd:?}"),
        }

        let sql = format!(
            "INSERT INTO availability_exceptions VALUES ('{ID}', '{OTHER}', '2030-06-03', NULL, NULL, true)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertException { span, is_available, .. } => {
                assert_eq!(span, None);
                assert!(is_available);
            }
            cmd => panic!("expected InsertException, got {cmd:?}"),
        }

        let sql = format!(
            "INSERT INTO availability_exceptions VALUES ('{ID}', '{OTHER}', '2030-06-03', false)"
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertException { span: None, is_available: false, .. }
        ));

        let sql = format!(
            "INSERT INTO availability_exceptions VALUES ('{ID}', '{OTHER}', '2030-06-03', '10:00', NULL, false)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_booking_minimal() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{ID}', '{OTHER}', '{OTHER}', '2030-06-03', '10:00', '10:30')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(req) => {
                assert_eq!(req.id.to_string(), ID);
                assert_eq!(req.date, date("2030-06-03"));
                assert_eq!(req.span, Span::new(600, 630));
                assert_eq!(req.provider_id, None);
                assert_eq!(req.booking_ref, None);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_full() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{ID}', '{OTHER}', '{OTHER}', '2030-06-03', '10:00', '10:30', \
             NULL, 'BK-42', 'first visit', 2, 'card')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(req) => {
                assert_eq!(req.provider_id, None);
                assert_eq!(req.booking_ref.as_deref(), Some("BK-42"));
                assert_eq!(req.notes.as_deref(), Some("first visit"));
                assert_eq!(req.group_count, Some(2));
                assert_eq!(req.payment_option.as_deref(), Some("card"));
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_arity() {
        let sql = format!("INSERT INTO bookings VALUES ('{ID}', '{OTHER}', '{OTHER}', '2030-06-03', '10:00')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("bookings", 6, 5))));
    }

    #[test]
    fn parse_insert_payment() {
        let sql = format!("INSERT INTO payments VALUES ('{ID}', '{OTHER}', 4500, 'paid')");
        match parse_sql(&sql).unwrap() {
            Command::InsertPayment(p) => {
                assert_eq!(p.amount, 4500);
                assert_eq!(p.status, PaymentStatus::Paid);
                assert_eq!(p.link, None);
            }
            cmd => panic!("expected InsertPayment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_cancel_and_complete() {
        let sql = format!(
            "UPDATE bookings SET status = 'cancelled', cancel_reason = 'sick' WHERE id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::CancelBooking { id, reason } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(reason.as_deref(), Some("sick"));
            }
            cmd => panic!("expected CancelBooking, got {cmd:?}"),
        }

        let sql = format!("UPDATE bookings SET status = 'completed' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::CompleteBooking { .. }));

        let sql = format!("UPDATE bookings SET status = 'confirmed' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_archive_service() {
        let sql = format!("UPDATE services SET archived = true WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::ArchiveService { .. }));
    }

    #[test]
    fn update_requires_id() {
        let sql = "UPDATE bookings SET status = 'cancelled'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_deletes() {
        let cases = [
            ("availability", "DeleteAvailability"),
            ("breaks", "DeleteBreak"),
            ("availability_exceptions", "DeleteException"),
            ("services", "DeleteService"),
            ("clients", "DeleteClient"),
        ];
        for (table, expected) in cases {
            let sql = format!("DELETE FROM {table} WHERE id = '{ID}'");
            let cmd = parse_sql(&sql).unwrap();
            assert!(format!("{cmd:?}").starts_with(expected), "{table}: {cmd:?}");
        }
    }

    #[test]
    fn parse_select_open_slots_range() {
        let sql = format!(
            "SELECT * FROM open_slots WHERE provider_id = '{ID}' AND service_id = '{OTHER}' \
             AND date >= '2030-06-03' AND date <= '2030-06-10'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectOpenSlots { from, to, .. } => {
                assert_eq!(from, date("2030-06-03"));
                assert_eq!(to, date("2030-06-10"));
            }
            cmd => panic!("expected SelectOpenSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_open_slots_single_date() {
        let sql = format!(
            "SELECT * FROM open_slots WHERE provider_id = '{ID}' AND service_id = '{OTHER}' AND date = '2030-06-03'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectOpenSlots { from, to, .. } => {
                assert_eq!(from, to);
            }
            cmd => panic!("expected SelectOpenSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn open_slots_requires_filters() {
        let sql = format!("SELECT * FROM open_slots WHERE provider_id = '{ID}' AND date = '2030-06-03'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("service_id"))));
    }

    #[test]
    fn parse_select_bookings_variants() {
        let sql = format!("SELECT * FROM bookings WHERE provider_id = '{ID}' AND date = '2030-06-03'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings { date: Some(_), .. }
        ));

        let sql = format!("SELECT * FROM bookings WHERE provider_id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectBookings { date: None, .. }));

        let sql = format!("SELECT * FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectBooking { .. }));

        let sql = "SELECT * FROM bookings WHERE booking_ref = 'BK-42'";
        match parse_sql(sql).unwrap() {
            Command::SelectBookingByRef { booking_ref } => assert_eq!(booking_ref, "BK-42"),
            cmd => panic!("expected SelectBookingByRef, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_open_intervals() {
        let sql = format!("SELECT * FROM open_intervals WHERE provider_id = '{ID}' AND date = '2030-06-03'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectOpenIntervals { .. }));
    }

    #[test]
    fn parse_select_lists() {
        assert_eq!(parse_sql("SELECT * FROM providers").unwrap(), Command::SelectProviders);
        assert_eq!(parse_sql("SELECT * FROM services").unwrap(), Command::SelectServices);
        assert_eq!(parse_sql("SELECT * FROM clients").unwrap(), Command::SelectClients);
    }

    #[test]
    fn bad_date_is_time_error() {
        let sql = format!("SELECT * FROM open_intervals WHERE provider_id = '{ID}' AND date = '2030-13-01'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::InvalidTime(TimeError::InvalidDate(_)))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_multi_row_insert_unsupported() {
        let sql = format!("INSERT INTO clients VALUES ('{ID}', 'A', 'a@x.io'), ('{OTHER}', 'B', 'b@x.io')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_batch_of_statements() {
        let sql = format!(
            "INSERT INTO providers VALUES ('{ID}', 'UTC'); SELECT * FROM providers;"
        );
        let cmds = parse_sql_batch(&sql).unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], Command::InsertProvider { .. }));
        assert_eq!(cmds[1], Command::SelectProviders);
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
