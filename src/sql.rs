use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::Role;
use crate::model::*;

/// Parsed command from SQL input.
///
/// Commands carry no caller identity; the wire layer supplies it from the
/// connection's startup `user`.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        name: String,
        email: String,
    },
    InsertItem {
        id: Ulid,
        name: String,
        description: String,
        available: bool,
    },
    SetItemAvailability {
        item_id: Ulid,
        available: bool,
    },
    InsertBooking {
        id: Ulid,
        item_id: Ulid,
        start: Ms,
        end: Ms,
    },
    DecideBooking {
        booking_id: Ulid,
        approved: bool,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookings {
        role: Role,
        state: Option<String>,
        from: Option<i64>,
        size: Option<i64>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let arity = |expected: usize| {
        if values.len() < expected {
            Err(SqlError::WrongArity(table_label(&table), expected, values.len()))
        } else {
            Ok(())
        }
    };

    match table.as_str() {
        "users" => {
            arity(3)?;
            Ok(Command::InsertUser {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                email: parse_string(&values[2])?,
            })
        }
        "items" => {
            arity(2)?;
            let description = match values.get(2) {
                Some(v) => parse_string_or_null(v)?.unwrap_or_default(),
                None => String::new(),
            };
            let available = match values.get(3) {
                Some(v) => parse_bool(v)?,
                None => true,
            };
            Ok(Command::InsertItem {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                description,
                available,
            })
        }
        "item_availability" => {
            arity(2)?;
            Ok(Command::SetItemAvailability {
                item_id: parse_ulid(&values[0])?,
                available: parse_bool(&values[1])?,
            })
        }
        "bookings" => {
            arity(4)?;
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                item_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
            })
        }
        "approvals" => {
            arity(2)?;
            Ok(Command::DecideBooking {
                booking_id: parse_ulid(&values[0])?,
                approved: parse_bool(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn table_label(table: &str) -> &'static str {
    match table {
        "users" => "users",
        "items" => "items",
        "item_availability" => "item_availability",
        "bookings" => "bookings",
        "approvals" => "approvals",
        _ => "table",
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
    let role = match table.as_str() {
        "bookings" => Role::Booker,
        "owner_bookings" => Role::Owner,
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let mut filters = ListFilters::default();
    if let Some(selection) = &select.selection {
        extract_list_filters(selection, &mut filters)?;
    }

    if let Some(id) = filters.id {
        if role == Role::Owner {
            return Err(SqlError::Unsupported("id filter on owner_bookings".into()));
        }
        return Ok(Command::SelectBooking { id });
    }
    Ok(Command::SelectBookings {
        role,
        state: filters.state,
        from: filters.from,
        size: filters.size,
    })
}

#[derive(Default)]
struct ListFilters {
    id: Option<Ulid>,
    state: Option<String>,
    from: Option<i64>,
    size: Option<i64>,
}

fn extract_list_filters(expr: &Expr, filters: &mut ListFilters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_list_filters(left, filters)?;
            extract_list_filters(right, filters)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => match expr_column_name(left).as_deref() {
            Some("id") => {
                filters.id = Some(parse_ulid_expr(right)?);
                Ok(())
            }
            Some("state") => {
                filters.state = parse_string_or_null(right)?;
                Ok(())
            }
            Some("from") => {
                filters.from = Some(parse_i64_expr(right)?);
                Ok(())
            }
            Some("size") => {
                filters.size = Some(parse_i64_expr(right)?);
                Ok(())
            }
            Some(col) => Err(SqlError::UnknownColumn(col.to_string())),
            None => Err(SqlError::Parse(format!("expected column, got {left}"))),
        },
        Expr::Nested(inner) => extract_list_filters(inner, filters),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
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
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
        }
    }
}

impl std::error::Error for SqlError {}
