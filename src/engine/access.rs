use ulid::Ulid;

use crate::model::{Booking, Item};

use super::error::Entity;
use super::EngineError;

/// Authorization failures on bookings and items are reported as `NotFound`.
///
/// A caller who is not a party to a booking (or not the owner of an item)
/// gets the same answer as for an id that does not exist, so ids cannot be
/// probed for existence or state.
pub struct AuthorizationAsNotFound;

impl AuthorizationAsNotFound {
    pub fn require(allowed: bool, entity: Entity, id: Ulid) -> Result<(), EngineError> {
        if allowed {
            Ok(())
        } else {
            Err(EngineError::NotFound(entity, id))
        }
    }

    pub fn require_owner(item: &Item, caller: Ulid, entity: Entity, id: Ulid) -> Result<(), EngineError> {
        Self::require(item.owner_id == caller, entity, id)
    }

    /// Booker and item owner may see a booking; nobody else.
    pub fn require_party(booking: &Booking, item: &Item, caller: Ulid) -> Result<(), EngineError> {
        Self::require(
            booking.booker_id == caller || item.owner_id == caller,
            Entity::Booking,
            booking.id,
        )
    }

    /// Owners may not book their own items; the item is hidden from them.
    pub fn forbid_self_booking(item: &Item, booker: Ulid) -> Result<(), EngineError> {
        Self::require(item.owner_id != booker, Entity::Item, item.id)
    }
}
