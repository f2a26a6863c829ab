use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::access::AuthorizationAsNotFound;
use super::error::Entity;
use super::store::BookingStore;
use super::{Engine, EngineError};

impl<S: BookingStore> Engine<S> {
    pub async fn register_user(
        &self,
        id: Ulid,
        name: String,
        email: String,
    ) -> Result<User, EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        let _claim = self.claim_id(Entity::User, id, |store, id| store.find_user(id).is_some())?;
        let event = Event::UserRegistered {
            id,
            name: name.clone(),
            email: email.clone(),
        };
        self.persist_and_apply(event).await?;
        info!("user {id} registered");
        Ok(User { id, name, email })
    }

    pub async fn add_item(
        &self,
        id: Ulid,
        owner_id: Ulid,
        name: String,
        description: String,
        available: bool,
    ) -> Result<Item, EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("item name too long"));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("item description too long"));
        }
        if self.store.find_user(&owner_id).is_none() {
            return Err(EngineError::NotFound(Entity::User, owner_id));
        }
        let _claim = self.claim_id(Entity::Item, id, |store, id| store.find_item(id).is_some())?;
        let event = Event::ItemAdded {
            id,
            owner_id,
            name: name.clone(),
            description: description.clone(),
            available,
        };
        self.persist_and_apply(event).await?;
        info!("item {id} added by {owner_id}");
        Ok(Item {
            id,
            owner_id,
            name,
            description,
            available,
        })
    }

    /// Owner-only toggle. Serialized with booking decisions on the same item.
    pub async fn set_item_available(
        &self,
        item_id: Ulid,
        caller_id: Ulid,
        available: bool,
    ) -> Result<Item, EngineError> {
        let lock = self
            .item_lock(&item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;
        let _guard = lock.lock().await;
        let mut item = self
            .store
            .find_item(&item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id))?;
        AuthorizationAsNotFound::require_owner(&item, caller_id, Entity::Item, item_id)?;
        if item.available == available {
            return Ok(item);
        }
        let event = Event::ItemAvailabilityChanged {
            id: item_id,
            available,
        };
        self.persist_and_apply(event).await?;
        item.available = available;
        Ok(item)
    }
}
