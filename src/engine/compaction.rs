use tokio::sync::oneshot;

use crate::model::*;

use super::store::BookingStore;
use super::{Engine, EngineError, WalCommand};

impl<S: BookingStore> Engine<S> {
    /// The minimal event sequence that rebuilds the current store.
    fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for user in self.store.users() {
            events.push(Event::UserRegistered {
                id: user.id,
                name: user.name,
                email: user.email,
            });
        }
        for item in self.store.items() {
            events.push(Event::ItemAdded {
                id: item.id,
                owner_id: item.owner_id,
                name: item.name,
                description: item.description,
                available: item.available,
            });
        }
        let mut bookings = self.store.bookings();
        bookings.sort_by_key(|b| b.id);
        for booking in bookings {
            events.push(Event::BookingRequested {
                id: booking.id,
                item_id: booking.item_id,
                booker_id: booking.booker_id,
                span: booking.span,
            });
            if booking.status != BookingStatus::Waiting {
                events.push(Event::BookingDecided {
                    id: booking.id,
                    item_id: booking.item_id,
                    status: booking.status,
                });
            }
        }
        events
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.snapshot_events();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
