use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::ReservationDraft;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBus {
        id: Ulid,
        name: String,
        plate_no: String,
        capacity: u32,
    },
    UpdateBus {
        id: Ulid,
        name: String,
        plate_no: String,
        capacity: u32,
    },
    SetBusStatus {
        id: Ulid,
        enabled: bool,
    },
    /// `DELETE FROM buses` — a soft retire, never a hard delete.
    RetireBus {
        id: Ulid,
    },
    RestoreBus {
        id: Ulid,
    },
    SelectBuses {
        retired: Option<bool>,
    },
    InsertReservation {
        draft: ReservationDraft,
    },
    ApproveReservation {
        id: Ulid,
        driver: Option<Ulid>,
        bus: Option<Ulid>,
    },
    RejectReservation {
        id: Ulid,
        notes: String,
    },
    CancelReservation {
        id: Ulid,
    },
    SelectReservations {
        bus_id: Option<Ulid>,
        id: Option<Ulid>,
    },
    SelectAvailability {
        bus_id: Ulid,
        date: NaiveDate,
        return_date: Option<NaiveDate>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "buses" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("buses", 4, values.len()));
            }
            Ok(Command::InsertBus {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                plate_no: parse_string(&values[2])?,
                capacity: parse_u32(&values[3])?,
            })
        }
        "reservations" => {
            // (id, requester_id, bus_id, purpose, destination,
            //  departure_date, departure_time, return_date, return_time,
            //  passengers) — NULL marks an absent field so the admission
            //  policy can report it.
            if values.len() < 10 {
                return Err(SqlError::WrongArity("reservations", 10, values.len()));
            }
            let draft = ReservationDraft {
                id: parse_ulid(&values[0])?,
                requester: parse_ulid(&values[1])?,
                bus_id: parse_ulid_or_null(&values[2])?,
                purpose: parse_string_or_null(&values[3])?,
                destination: parse_string_or_null(&values[4])?,
                departure_date: parse_date_or_null(&values[5])?,
                departure_time: parse_time_or_null(&values[6])?,
                return_date: parse_date_or_null(&values[7])?,
                return_time: parse_time_or_null(&values[8])?,
                passengers: parse_u32_or_null(&values[9])?,
            };
            Ok(Command::InsertReservation { draft })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = assignment_column(a).ok_or_else(|| {
            SqlError::Parse("unsupported assignment target in UPDATE".into())
        })?;
        set.push((col, &a.value));
    }

    match table.as_str() {
        "buses" => parse_bus_update(id, &set),
        "reservations" => parse_reservation_update(id, &set),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_bus_update(id: Ulid, set: &[(String, &Expr)]) -> Result<Command, SqlError> {
    if let [(col, value)] = set {
        match col.as_str() {
            "status" => {
                let status = parse_string(*value)?;
                let enabled = match status.as_str() {
                    "enabled" => true,
                    "disabled" => false,
                    other => {
                        return Err(SqlError::Parse(format!(
                            "bus status must be 'enabled' or 'disabled', got '{other}'"
                        )))
                    }
                };
                return Ok(Command::SetBusStatus { id, enabled });
            }
            "retired" => {
                return if parse_bool(*value)? {
                    Ok(Command::RetireBus { id })
                } else {
                    Ok(Command::RestoreBus { id })
                };
            }
            _ => {}
        }
    }

    // Full field edit: all three columns required.
    let mut name = None;
    let mut plate_no = None;
    let mut capacity = None;
    for (col, value) in set {
        match col.as_str() {
            "name" => name = Some(parse_string(value)?),
            "plate_no" => plate_no = Some(parse_string(value)?),
            "capacity" => capacity = Some(parse_u32(value)?),
            other => {
                return Err(SqlError::Parse(format!("unknown buses column: {other}")))
            }
        }
    }
    match (name, plate_no, capacity) {
        (Some(name), Some(plate_no), Some(capacity)) => {
            Ok(Command::UpdateBus { id, name, plate_no, capacity })
        }
        _ => Err(SqlError::Parse(
            "bus edit requires name, plate_no and capacity".into(),
        )),
    }
}

fn parse_reservation_update(id: Ulid, set: &[(String, &Expr)]) -> Result<Command, SqlError> {
    let mut status = None;
    let mut driver = None;
    let mut bus = None;
    let mut notes = None;
    for (col, value) in set {
        match col.as_str() {
            "status" => status = Some(parse_string(value)?),
            "driver_id" => driver = parse_ulid_or_null(value)?,
            "bus_id" => bus = parse_ulid_or_null(value)?,
            "notes" => notes = parse_string_or_null(value)?,
            other => {
                return Err(SqlError::Parse(format!(
                    "unknown reservations column: {other}"
                )))
            }
        }
    }

    match status.as_deref() {
        Some("approved") => Ok(Command::ApproveReservation { id, driver, bus }),
        Some("rejected") => Ok(Command::RejectReservation {
            id,
            notes: notes.unwrap_or_default(),
        }),
        Some("cancelled") => Ok(Command::CancelReservation { id }),
        Some(other) => Err(SqlError::Parse(format!(
            "reservation status must be 'approved', 'rejected' or 'cancelled', got '{other}'"
        ))),
        None => Err(SqlError::MissingFilter("status")),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "buses" => {
            let id = extract_where_id(&delete.selection)?;
            Ok(Command::RetireBus { id })
        }
        "reservations" => Err(SqlError::Unsupported(
            "reservations are never deleted; UPDATE status = 'cancelled' instead".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
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

    match table.as_str() {
        "buses" => {
            let mut retired = None;
            if let Some(selection) = &select.selection {
                extract_bus_filters(selection, &mut retired)?;
            }
            Ok(Command::SelectBuses { retired })
        }
        "reservations" => {
            let mut bus_id = None;
            let mut id = None;
            if let Some(selection) = &select.selection {
                extract_reservation_filters(selection, &mut bus_id, &mut id)?;
            }
            Ok(Command::SelectReservations { bus_id, id })
        }
        "availability" => {
            let (mut bus_id, mut date, mut return_date) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut bus_id, &mut date, &mut return_date)?;
            }
            Ok(Command::SelectAvailability {
                bus_id: bus_id.ok_or(SqlError::MissingFilter("bus_id"))?,
                date: date.ok_or(SqlError::MissingFilter("date"))?,
                return_date,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_bus_filters(expr: &Expr, retired: &mut Option<bool>) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_bus_filters(left, retired)?;
                extract_bus_filters(right, retired)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("retired") {
                    *retired = Some(parse_bool(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn extract_reservation_filters(
    expr: &Expr,
    bus_id: &mut Option<Ulid>,
    id: &mut Option<Ulid>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_reservation_filters(left, bus_id, id)?;
                extract_reservation_filters(right, bus_id, id)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("bus_id") => *bus_id = Some(parse_ulid(right)?),
                Some("id") => *id = Some(parse_ulid(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

fn extract_availability_filters(
    expr: &Expr,
    bus_id: &mut Option<Ulid>,
    date: &mut Option<NaiveDate>,
    return_date: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, bus_id, date, return_date)?;
                extract_availability_filters(right, bus_id, date, return_date)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("bus_id") => *bus_id = Some(parse_ulid(right)?),
                Some("date") => *date = Some(parse_date(right)?),
                Some("return_date") => *return_date = parse_date_or_null(right)?,
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
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

fn assignment_column(a: &ast::Assignment) -> Option<String> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
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
                parse_ulid(right)
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
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

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_date(expr).map(Some),
    }
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time '{s}': {e}")))
}

fn parse_time_or_null(expr: &Expr) -> Result<Option<NaiveTime>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_time(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
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
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_u32(expr).map(Some),
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

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
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
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const U: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_bus() {
        let sql = format!(
            "INSERT INTO buses (id, name, plate_no, capacity) VALUES ('{U}', 'Bus 1', 'ABC-123', 30)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBus { id, name, plate_no, capacity } => {
                assert_eq!(id.to_string(), U);
                assert_eq!(name, "Bus 1");
                assert_eq!(plate_no, "ABC-123");
                assert_eq!(capacity, 30);
            }
            _ => panic!("expected InsertBus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_bus_short_arity_errors() {
        let sql = format!("INSERT INTO buses (id) VALUES ('{U}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("buses", 4, 1))
        ));
    }

    #[test]
    fn parse_update_bus_fields() {
        let sql = format!(
            "UPDATE buses SET name = 'Bus 1B', plate_no = 'XYZ-987', capacity = 25 WHERE id = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateBus { name, plate_no, capacity, .. } => {
                assert_eq!(name, "Bus 1B");
                assert_eq!(plate_no, "XYZ-987");
                assert_eq!(capacity, 25);
            }
            _ => panic!("expected UpdateBus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_set_bus_status() {
        let sql = format!("UPDATE buses SET status = 'disabled' WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::SetBusStatus { enabled: false, .. }));

        let sql = format!("UPDATE buses SET status = 'enabled' WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::SetBusStatus { enabled: true, .. }));
    }

    #[test]
    fn parse_bad_bus_status_errors() {
        let sql = format!("UPDATE buses SET status = 'broken' WHERE id = '{U}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_retire_via_delete() {
        let sql = format!("DELETE FROM buses WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::RetireBus { .. }));
    }

    #[test]
    fn parse_restore_via_update() {
        let sql = format!("UPDATE buses SET retired = false WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::RestoreBus { .. }));

        let sql = format!("UPDATE buses SET retired = true WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::RetireBus { .. }));
    }

    #[test]
    fn parse_select_buses() {
        let cmd = parse_sql("SELECT * FROM buses").unwrap();
        assert!(matches!(cmd, Command::SelectBuses { retired: None }));

        let cmd = parse_sql("SELECT * FROM buses WHERE retired = true").unwrap();
        assert!(matches!(cmd, Command::SelectBuses { retired: Some(true) }));
    }

    #[test]
    fn parse_insert_reservation_full() {
        let sql = format!(
            "INSERT INTO reservations (id, requester_id, bus_id, purpose, destination, \
             departure_date, departure_time, return_date, return_time, passengers) \
             VALUES ('{U}', '{U}', '{U}', 'field trip', 'museum', \
             '2024-07-10', '08:00', '2024-07-12', '17:30', 15)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertReservation { draft } => {
                assert_eq!(draft.purpose.as_deref(), Some("field trip"));
                assert_eq!(
                    draft.departure_date,
                    NaiveDate::from_ymd_opt(2024, 7, 10)
                );
                assert_eq!(
                    draft.departure_time,
                    NaiveTime::from_hms_opt(8, 0, 0)
                );
                assert_eq!(
                    draft.return_time,
                    NaiveTime::from_hms_opt(17, 30, 0)
                );
                assert_eq!(draft.passengers, Some(15));
            }
            _ => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_with_nulls() {
        let sql = format!(
            "INSERT INTO reservations (id, requester_id, bus_id, purpose, destination, \
             departure_date, departure_time, return_date, return_time, passengers) \
             VALUES ('{U}', '{U}', NULL, NULL, 'museum', '2024-07-10', NULL, NULL, NULL, NULL)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertReservation { draft } => {
                assert!(draft.bus_id.is_none());
                assert!(draft.purpose.is_none());
                assert!(draft.departure_time.is_none());
                assert!(draft.return_date.is_none());
                assert!(draft.passengers.is_none());
            }
            _ => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_approve_with_driver_and_bus() {
        let sql = format!(
            "UPDATE reservations SET status = 'approved', driver_id = '{U}', bus_id = '{U}' WHERE id = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::ApproveReservation { driver, bus, .. } => {
                assert!(driver.is_some());
                assert!(bus.is_some());
            }
            _ => panic!("expected ApproveReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_approve_bare() {
        let sql = format!("UPDATE reservations SET status = 'approved' WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(
            cmd,
            Command::ApproveReservation { driver: None, bus: None, .. }
        ));
    }

    #[test]
    fn parse_reject_with_notes() {
        let sql = format!(
            "UPDATE reservations SET status = 'rejected', notes = 'no driver available' WHERE id = '{U}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::RejectReservation { notes, .. } => {
                assert_eq!(notes, "no driver available");
            }
            _ => panic!("expected RejectReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_cancel() {
        let sql = format!("UPDATE reservations SET status = 'cancelled' WHERE id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::CancelReservation { .. }));
    }

    #[test]
    fn parse_delete_reservation_refused() {
        let sql = format!("DELETE FROM reservations WHERE id = '{U}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_reservations_by_bus() {
        let sql = format!("SELECT * FROM reservations WHERE bus_id = '{U}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectReservations { bus_id, id } => {
                assert!(bus_id.is_some());
                assert!(id.is_none());
            }
            _ => panic!("expected SelectReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_round_trip() {
        let sql = format!(
            "SELECT * FROM availability WHERE bus_id = '{U}' AND date = '2024-07-10' AND return_date = '2024-07-12'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability { date, return_date, .. } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 7, 10).unwrap());
                assert_eq!(return_date, NaiveDate::from_ymd_opt(2024, 7, 12));
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_single_day() {
        let sql = format!("SELECT * FROM availability WHERE bus_id = '{U}' AND date = '2024-07-10'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability { return_date, .. } => {
                assert!(return_date.is_none());
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_date_errors() {
        let sql = format!("SELECT * FROM availability WHERE bus_id = '{U}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("date"))
        ));
    }

    #[test]
    fn parse_listen() {
        let sql = format!("LISTEN bus_{U}");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::Listen { channel } => {
                assert_eq!(channel, format!("bus_{U}"));
            }
            _ => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO drivers (id) VALUES ('{U}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_bad_date_errors() {
        let sql = format!(
            "SELECT * FROM availability WHERE bus_id = '{U}' AND date = '07/10/2024'"
        );
        assert!(parse_sql(&sql).is_err());
    }
}
