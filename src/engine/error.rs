use ulid::Ulid;

use crate::model::{BookingStatus, Span};
use crate::pager::PagerError;

use super::queries::StateFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    User,
    Item,
    Booking,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::User => f.write_str("user"),
            Entity::Item => f.write_str("item"),
            Entity::Booking => f.write_str("booking"),
        }
    }
}

/// Why a request was refused as malformed or not allowed in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    EmptySpan { start: i64, end: i64 },
    ItemUnavailable(Ulid),
    Reserved { item_id: Ulid, span: Span },
    NotWaiting(BookingStatus),
    Elapsed { end: i64, now: i64 },
    UnknownState(String),
    InvalidPage(PagerError),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::EmptySpan { start, end } => {
                write!(f, "booking start {start} must be before end {end}")
            }
            Rejection::ItemUnavailable(id) => write!(f, "item {id} is not available"),
            Rejection::Reserved { item_id, span } => write!(
                f,
                "item {item_id} is already reserved within [{}, {})",
                span.start, span.end
            ),
            Rejection::NotWaiting(status) => {
                write!(f, "booking already decided: status is {status}")
            }
            Rejection::Elapsed { end, now } => {
                write!(f, "booking ended at {end}, cannot decide at {now}")
            }
            Rejection::UnknownState(token) => write!(f, "Unknown state: {token}"),
            Rejection::InvalidPage(e) => write!(f, "{e}"),
        }
    }
}

/// Coarse category the boundary maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Conflict,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    /// Missing entity, or one the caller is not allowed to see.
    NotFound(Entity, Ulid),
    /// A list query matched no bookings.
    NoBookings(StateFilter),
    BadRequest(Rejection),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(..) | EngineError::NoBookings(_) => ErrorKind::NotFound,
            EngineError::BadRequest(_) | EngineError::LimitExceeded(_) => ErrorKind::BadRequest,
            EngineError::AlreadyExists(_) => ErrorKind::Conflict,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl From<Rejection> for EngineError {
    fn from(r: Rejection) -> Self {
        EngineError::BadRequest(r)
    }
}

impl From<PagerError> for EngineError {
    fn from(e: PagerError) -> Self {
        EngineError::BadRequest(Rejection::InvalidPage(e))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::NoBookings(state) => write!(f, "no bookings found for state {state}"),
            EngineError::BadRequest(r) => write!(f, "bad request: {r}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
