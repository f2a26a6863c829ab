use std::cmp::Ordering;

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;
use crate::pager::{Direction, OffsetCursor, SortKey, SortOrder};

/// Which side of a booking a list query is asked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Bookings the subject requested.
    Booker,
    /// Bookings on items the subject owns.
    Owner,
}

/// Row filter for the paginated booking queries, already resolved against "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateQuery {
    All,
    /// `start <= now < end`
    Current(Ms),
    /// `end <= now`
    Past(Ms),
    /// `start > now`
    Future(Ms),
    Status(BookingStatus),
}

impl StateQuery {
    pub fn matches(&self, booking: &Booking) -> bool {
        match *self {
            StateQuery::All => true,
            StateQuery::Current(now) => booking.span.contains_instant(now),
            StateQuery::Past(now) => booking.span.ended_by(now),
            StateQuery::Future(now) => booking.span.starts_after(now),
            StateQuery::Status(status) => booking.status == status,
        }
    }
}

/// Storage the booking core runs against.
///
/// Lookups return `Option`; turning absence into an error is the caller's
/// decision. Implementations must make `save_*` visible to every subsequent
/// read on any thread. Atomicity of check-then-write sequences is provided
/// by the engine's per-item serialization, not by the store.
pub trait BookingStore: Send + Sync {
    fn find_user(&self, id: &Ulid) -> Option<User>;
    fn find_item(&self, id: &Ulid) -> Option<Item>;
    fn find_booking(&self, id: &Ulid) -> Option<Booking>;

    /// Number of APPROVED bookings on `item_id` overlapping `span`.
    fn count_approved_overlapping(&self, item_id: &Ulid, span: &Span) -> usize;

    /// Bookings of `subject` (as booker or as item owner) matching `query`,
    /// ordered by the cursor's sort and cut to the cursor's window.
    fn find_bookings(
        &self,
        subject: &Ulid,
        role: Role,
        query: StateQuery,
        cursor: &OffsetCursor,
    ) -> Vec<Booking>;

    fn bookings_for_item(&self, item_id: &Ulid) -> Vec<Booking>;

    fn save_user(&self, user: User) -> User;
    fn save_item(&self, item: Item) -> Item;
    /// Insert or update.
    fn save_booking(&self, booking: Booking) -> Booking;

    fn users(&self) -> Vec<User>;
    fn items(&self) -> Vec<Item>;
    fn bookings(&self) -> Vec<Booking>;
}

pub struct InMemoryStore {
    users: DashMap<Ulid, User>,
    items: DashMap<Ulid, Item>,
    bookings: DashMap<Ulid, Booking>,
    /// item id → `(start, booking id)`, sorted by start.
    item_bookings: DashMap<Ulid, Vec<(Ms, Ulid)>>,
    /// booker id → booking ids
    booker_bookings: DashMap<Ulid, Vec<Ulid>>,
    /// owner id → item ids
    owner_items: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            items: DashMap::new(),
            bookings: DashMap::new(),
            item_bookings: DashMap::new(),
            booker_bookings: DashMap::new(),
            owner_items: DashMap::new(),
        }
    }

    fn booking_ids_for_item(&self, item_id: &Ulid) -> Vec<Ulid> {
        self.item_bookings
            .get(item_id)
            .map(|e| e.value().iter().map(|(_, id)| *id).collect())
            .unwrap_or_default()
    }

    fn candidate_ids(&self, subject: &Ulid, role: Role) -> Vec<Ulid> {
        match role {
            Role::Booker => self
                .booker_bookings
                .get(subject)
                .map(|e| e.value().clone())
                .unwrap_or_default(),
            Role::Owner => {
                let item_ids = self
                    .owner_items
                    .get(subject)
                    .map(|e| e.value().clone())
                    .unwrap_or_default();
                item_ids
                    .iter()
                    .flat_map(|item_id| self.booking_ids_for_item(item_id))
                    .collect()
            }
        }
    }

    fn index_new_booking(&self, booking: &Booking) {
        let mut slots = self.item_bookings.entry(booking.item_id).or_default();
        let pos = slots
            .binary_search_by_key(&booking.span.start, |(start, _)| *start)
            .unwrap_or_else(|e| e);
        slots.insert(pos, (booking.span.start, booking.id));
        drop(slots);
        self.booker_bookings
            .entry(booking.booker_id)
            .or_default()
            .push(booking.id);
    }

    fn unindex_booking(&self, booking: &Booking) {
        if let Some(mut slots) = self.item_bookings.get_mut(&booking.item_id) {
            slots.retain(|(_, id)| *id != booking.id);
        }
        if let Some(mut ids) = self.booker_bookings.get_mut(&booking.booker_id) {
            ids.retain(|id| *id != booking.id);
        }
    }
}

fn compare_by(a: &Booking, b: &Booking, orders: &[SortOrder]) -> Ordering {
    for order in orders {
        let ord = match order.key {
            SortKey::Id => a.id.cmp(&b.id),
            SortKey::Start => a.span.start.cmp(&b.span.start),
            SortKey::End => a.span.end.cmp(&b.span.end),
        };
        let ord = match order.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl BookingStore for InMemoryStore {
    fn find_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    fn find_item(&self, id: &Ulid) -> Option<Item> {
        self.items.get(id).map(|e| e.value().clone())
    }

    fn find_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    fn count_approved_overlapping(&self, item_id: &Ulid, span: &Span) -> usize {
        let Some(slots) = self.item_bookings.get(item_id) else {
            return 0;
        };
        // Everything at index >= right_bound starts at or after span.end → can't overlap.
        let right_bound = slots.partition_point(|(start, _)| *start < span.end);
        slots[..right_bound]
            .iter()
            .filter_map(|(_, id)| self.bookings.get(id))
            .filter(|b| b.is_approved() && b.span.overlaps(span))
            .count()
    }

    fn find_bookings(
        &self,
        subject: &Ulid,
        role: Role,
        query: StateQuery,
        cursor: &OffsetCursor,
    ) -> Vec<Booking> {
        let mut rows: Vec<Booking> = self
            .candidate_ids(subject, role)
            .iter()
            .filter_map(|id| self.find_booking(id))
            .filter(|b| query.matches(b))
            .collect();
        // Id order first so "unsorted" is still deterministic; the stable sort keeps it as tie-break.
        rows.sort_by_key(|b| b.id);
        if !cursor.sort().is_unsorted() {
            rows.sort_by(|a, b| compare_by(a, b, cursor.sort().orders()));
        }
        cursor.window(rows.into_iter()).collect()
    }

    fn bookings_for_item(&self, item_id: &Ulid) -> Vec<Booking> {
        self.booking_ids_for_item(item_id)
            .iter()
            .filter_map(|id| self.find_booking(id))
            .collect()
    }

    fn save_user(&self, user: User) -> User {
        self.users.insert(user.id, user.clone());
        user
    }

    fn save_item(&self, item: Item) -> Item {
        let previous = self.items.insert(item.id, item.clone());
        match previous {
            Some(old) if old.owner_id == item.owner_id => {}
            Some(old) => {
                if let Some(mut ids) = self.owner_items.get_mut(&old.owner_id) {
                    ids.retain(|id| *id != item.id);
                }
                self.owner_items.entry(item.owner_id).or_default().push(item.id);
            }
            None => self.owner_items.entry(item.owner_id).or_default().push(item.id),
        }
        item
    }

    fn save_booking(&self, booking: Booking) -> Booking {
        let previous = self.bookings.insert(booking.id, booking.clone());
        // Status changes keep the index; a moved row is re-indexed.
        match previous {
            Some(old)
                if old.item_id == booking.item_id
                    && old.booker_id == booking.booker_id
                    && old.span.start == booking.span.start => {}
            Some(old) => {
                self.unindex_booking(&old);
                self.index_new_booking(&booking);
            }
            None => self.index_new_booking(&booking),
        }
        booking
    }

    fn users(&self) -> Vec<User> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    fn items(&self) -> Vec<Item> {
        self.items.iter().map(|e| e.value().clone()).collect()
    }

    fn bookings(&self) -> Vec<Booking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }
}
