use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    #[cfg(test)]
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` for an empty or inverted interval.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    pub fn ended_by(&self, t: Ms) -> bool {
        self.end <= t
    }

    pub fn starts_after(&self, t: Ms) -> bool {
        self.start > t
    }
}

/// Lifecycle of a booking.
///
/// `Waiting` is decided exactly once, into `Approved` or `Rejected`. `Canceled`
/// is part of the persisted vocabulary but nothing transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Waiting,
    Approved,
    Rejected,
    Canceled,
}

impl BookingStatus {
    /// The only transition table: `Waiting -> {Approved, Rejected}`.
    ///
    /// Targets are expressed through [`Decision`], so no caller can ask for a
    /// move into `Waiting` or `Canceled`.
    pub fn decide(self, decision: Decision) -> Option<BookingStatus> {
        match self {
            BookingStatus::Waiting => Some(decision.outcome()),
            BookingStatus::Approved | BookingStatus::Rejected | BookingStatus::Canceled => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Waiting => "WAITING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner's verdict on a waiting booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            Decision::Approve
        } else {
            Decision::Reject
        }
    }

    pub fn outcome(self) -> BookingStatus {
        match self {
            Decision::Approve => BookingStatus::Approved,
            Decision::Reject => BookingStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub description: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub item_id: Ulid,
    pub booker_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
}

impl Booking {
    pub fn is_approved(&self) -> bool {
        self.status == BookingStatus::Approved
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        name: String,
        email: String,
    },
    ItemAdded {
        id: Ulid,
        owner_id: Ulid,
        name: String,
        description: String,
        available: bool,
    },
    ItemAvailabilityChanged {
        id: Ulid,
        available: bool,
    },
    BookingRequested {
        id: Ulid,
        item_id: Ulid,
        booker_id: Ulid,
        span: Span,
    },
    BookingDecided {
        id: Ulid,
        item_id: Ulid,
        status: BookingStatus,
    },
}
