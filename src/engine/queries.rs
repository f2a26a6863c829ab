use std::str::FromStr;

use ulid::Ulid;

use crate::model::*;
use crate::pager::{Direction, OffsetCursor, Sort, SortKey};

use super::access::AuthorizationAsNotFound;
use super::error::{Entity, Rejection};
use super::store::{BookingStore, Role, StateQuery};
use super::{Engine, EngineError};

/// Category of bookings a list query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StateFilter {
    #[default]
    All,
    Current,
    Past,
    Future,
    Waiting,
    Rejected,
}

impl StateFilter {
    /// Absent or blank token means `All`; anything unrecognized is a
    /// `BadRequest`, never silently widened to `All`.
    pub fn parse(token: Option<&str>) -> Result<Self, Rejection> {
        match token.map(str::trim) {
            None | Some("") => Ok(StateFilter::All),
            Some(t) => t.parse(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateFilter::All => "ALL",
            StateFilter::Current => "CURRENT",
            StateFilter::Past => "PAST",
            StateFilter::Future => "FUTURE",
            StateFilter::Waiting => "WAITING",
            StateFilter::Rejected => "REJECTED",
        }
    }

    /// Resolve time-relative filters against `now`.
    pub fn query(&self, now: Ms) -> StateQuery {
        match self {
            StateFilter::All => StateQuery::All,
            StateFilter::Current => StateQuery::Current(now),
            StateFilter::Past => StateQuery::Past(now),
            StateFilter::Future => StateQuery::Future(now),
            StateFilter::Waiting => StateQuery::Status(BookingStatus::Waiting),
            StateFilter::Rejected => StateQuery::Status(BookingStatus::Rejected),
        }
    }
}

impl FromStr for StateFilter {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(StateFilter::All),
            "CURRENT" => Ok(StateFilter::Current),
            "PAST" => Ok(StateFilter::Past),
            "FUTURE" => Ok(StateFilter::Future),
            "WAITING" => Ok(StateFilter::Waiting),
            "REJECTED" => Ok(StateFilter::Rejected),
            _ => Err(Rejection::UnknownState(s.to_string())),
        }
    }
}

impl std::fmt::Display for StateFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every list query is newest-first.
pub fn newest_first() -> Sort {
    Sort::by(SortKey::Start, Direction::Desc).then(SortKey::Id, Direction::Desc)
}

/// What an owner sees about an item's approved bookings around "now".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemBookingSummary {
    /// Latest approved booking that has started.
    pub last: Option<Booking>,
    /// Earliest approved booking that has not started yet.
    pub next: Option<Booking>,
}

impl<S: BookingStore> Engine<S> {
    /// List bookings of `subject` in `role` matching the `state` token.
    pub fn list_by_state(
        &self,
        subject: Ulid,
        role: Role,
        state: Option<&str>,
        cursor: &OffsetCursor,
    ) -> Result<Vec<Booking>, EngineError> {
        let filter = StateFilter::parse(state)?;
        self.list_by_filter(subject, role, filter, cursor)
    }

    /// An empty page is reported as `NoBookings` rather than an empty list.
    pub fn list_by_filter(
        &self,
        subject: Ulid,
        role: Role,
        filter: StateFilter,
        cursor: &OffsetCursor,
    ) -> Result<Vec<Booking>, EngineError> {
        if self.store.find_user(&subject).is_none() {
            return Err(EngineError::NotFound(Entity::User, subject));
        }
        let cursor = cursor.with_sort(newest_first());
        let rows = self
            .store
            .find_bookings(&subject, role, filter.query(self.now()), &cursor);
        if rows.is_empty() {
            return Err(EngineError::NoBookings(filter));
        }
        Ok(rows)
    }

    /// Last and next approved bookings of an item, shown only to its owner.
    pub fn item_booking_summary(
        &self,
        item_id: Ulid,
        caller_id: Ulid,
    ) -> Result<ItemBookingSummary, EngineError> {
        let item = self
            .store
            .find_item(&item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;
        if AuthorizationAsNotFound::require_owner(&item, caller_id, Entity::Item, item_id).is_err() {
            return Ok(ItemBookingSummary::default());
        }
        let now = self.now();
        let approved: Vec<Booking> = self
            .store
            .bookings_for_item(&item_id)
            .into_iter()
            .filter(Booking::is_approved)
            .collect();
        let last = approved
            .iter()
            .filter(|b| b.span.start <= now)
            .max_by_key(|b| b.span.start)
            .cloned();
        let next = approved
            .iter()
            .filter(|b| b.span.starts_after(now))
            .min_by_key(|b| b.span.start)
            .cloned();
        Ok(ItemBookingSummary { last, next })
    }

    /// True once `user_id` has finished an approved booking of `item_id`.
    pub fn has_completed_booking(&self, user_id: Ulid, item_id: Ulid) -> bool {
        let now = self.now();
        self.store
            .bookings_for_item(&item_id)
            .iter()
            .any(|b| b.booker_id == user_id && b.is_approved() && b.span.ended_by(now))
    }
}
