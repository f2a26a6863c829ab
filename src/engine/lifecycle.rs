use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::access::AuthorizationAsNotFound;
use super::conflict::{check_no_conflict, validate_span};
use super::error::{Entity, Rejection};
use super::store::BookingStore;
use super::{Engine, EngineError};

impl<S: BookingStore> Engine<S> {
    /// Request `[start, end)` on `item_id` for `booker_id`. The new booking
    /// starts out `Waiting`.
    ///
    /// Only approved bookings count as conflicts here; overlapping waiting
    /// requests are allowed and sorted out at approval time.
    pub async fn create_booking(
        &self,
        id: Ulid,
        booker_id: Ulid,
        item_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Booking, EngineError> {
        let span = validate_span(start, end)?;
        // An unknown item has no bookings, so the conflict check would pass
        // and the lookup below would fail anyway.
        let lock = self
            .item_lock(&item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;
        let _guard = lock.lock().await;

        check_no_conflict(&self.store, &item_id, &span)?;
        let item = self
            .store
            .find_item(&item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;
        AuthorizationAsNotFound::forbid_self_booking(&item, booker_id)?;
        if !item.available {
            return Err(Rejection::ItemUnavailable(item_id).into());
        }
        if self.store.find_user(&booker_id).is_none() {
            return Err(EngineError::NotFound(Entity::User, booker_id));
        }
        let _claim = self.claim_id(Entity::Booking, id, |store, id| {
            store.find_booking(id).is_some()
        })?;

        let event = Event::BookingRequested {
            id,
            item_id,
            booker_id,
            span,
        };
        self.persist_and_apply(event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!("booking {id} requested on item {item_id} by {booker_id}");
        Ok(Booking {
            id,
            item_id,
            booker_id,
            span,
            status: BookingStatus::Waiting,
        })
    }

    /// The owner's one-time verdict on a waiting booking.
    ///
    /// Approval re-runs the conflict check under the item lock, so of two
    /// overlapping requests only the first approved one can win.
    pub async fn decide_booking(
        &self,
        booking_id: Ulid,
        caller_id: Ulid,
        decision: Decision,
    ) -> Result<Booking, EngineError> {
        let item_id = self
            .store
            .find_booking(&booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?
            .item_id;
        let lock = self
            .item_lock(&item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent decision may have landed.
        let mut booking = self
            .store
            .find_booking(&booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        let item = self
            .store
            .find_item(&item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;
        AuthorizationAsNotFound::require_owner(&item, caller_id, Entity::Booking, booking_id)?;

        let next = booking
            .status
            .decide(decision)
            .ok_or(Rejection::NotWaiting(booking.status))?;
        if !item.available {
            return Err(Rejection::ItemUnavailable(item_id).into());
        }
        let now = self.now();
        if booking.span.end <= now {
            return Err(Rejection::Elapsed {
                end: booking.span.end,
                now,
            }
            .into());
        }
        if decision == Decision::Approve {
            if let Err(e) = check_no_conflict(&self.store, &item_id, &booking.span) {
                debug!("approval of {booking_id} refused: {e}");
                return Err(e);
            }
        }

        let event = Event::BookingDecided {
            id: booking_id,
            item_id,
            status: next,
        };
        self.persist_and_apply(event).await?;
        metrics::counter!(crate::observability::BOOKINGS_DECIDED_TOTAL, "status" => next.as_str())
            .increment(1);
        info!("booking {booking_id} {next} by owner {caller_id}");
        booking.status = next;
        Ok(booking)
    }

    /// Fetch a booking visible to `caller_id` (its booker or the item owner).
    pub fn read_booking(&self, booking_id: Ulid, caller_id: Ulid) -> Result<Booking, EngineError> {
        let booking = self
            .store
            .find_booking(&booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        // A booking whose item vanished is visible to nobody.
        let item = self
            .store
            .find_item(&booking.item_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        AuthorizationAsNotFound::require_party(&booking, &item, caller_id)?;
        Ok(booking)
    }
}
