mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{
    DayOverlay, apply_exceptions, day_overlay, merge_overlapping, normalize, resolve_recurring,
    subtract_intervals, union_intervals,
};
pub use conflict::{active_booking_spans, enumerate_slots, free_intervals, validate_candidate};
pub use error::{EngineError, UnavailableReason};
pub use store::{InMemoryStore, RecordClaim};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::limits::MIN_SLOT_GRANULARITY_MINUTES;
use crate::model::*;
use crate::timegrid::parse_timezone;
use crate::wal::{Wal, WalHandle};

pub type SharedProviderState = Arc<RwLock<ProviderState>>;

/// Tunables for slot enumeration and the booking commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub slot_granularity: Minute,
    /// Extra attempts after a commit-time race before giving up.
    pub commit_retries: u32,
    /// First backoff; doubles per retry.
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_granularity: 15,
            commit_retries: 2,
            retry_backoff: Duration::from_millis(5),
        }
    }
}

pub struct Engine {
    pub store: InMemoryStore,
    wal: WalHandle,
    config: EngineConfig,
    /// Writers hold it shared from before their first provider lock until the
    /// event is applied; compaction holds it exclusively while it snapshots.
    compaction_gate: RwLock<()>,
}

impl Engine {
    /// Replay the log at `wal_path`, then start the writer task. Needs a tokio runtime.
    pub fn new(wal_path: PathBuf, config: EngineConfig) -> io::Result<Self> {
        if config.slot_granularity < MIN_SLOT_GRANULARITY_MINUTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "slot granularity must be at least one minute",
            ));
        }
        let events = Wal::replay(&wal_path)?;
        let wal = WalHandle::spawn(Wal::open(&wal_path)?);
        let engine = Self {
            store: InMemoryStore::new(),
            wal,
            config,
            compaction_gate: RwLock::new(()),
        };

        for event in &events {
            engine.replay_event(event)?;
        }
        tracing::info!(
            events = events.len(),
            providers = engine.store.provider_count(),
            "replayed log"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Sole owner during replay, so try_write never contends. Blocking lock calls
    // are off limits here since this can run inside an async context.
    fn replay_event(&self, event: &Event) -> io::Result<()> {
        if let Event::ProviderCreated(provider) = event {
            let tz = parse_timezone(&provider.timezone)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            let state = ProviderState::new(provider.clone(), tz);
            self.store
                .insert_provider(provider.id, Arc::new(RwLock::new(state)));
            return Ok(());
        }
        match event.provider_id() {
            Some(provider_id) => {
                let Some(ps) = self.store.provider(&provider_id) else {
                    tracing::warn!(%provider_id, "log event for unknown provider, skipped");
                    return Ok(());
                };
                let mut guard = ps.try_write().map_err(|_| {
                    io::Error::other("provider state locked during replay")
                })?;
                self.store.apply_to_provider(&mut guard, event);
            }
            None => self.store.apply_record_event(event),
        }
        Ok(())
    }

    pub(super) async fn write_permit(&self) -> RwLockReadGuard<'_, ()> {
        self.compaction_gate.read().await
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal
            .append(event.clone())
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably log a record-level event, then apply it.
    pub(super) async fn persist_record(&self, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.store.apply_record_event(&event);
        Ok(())
    }

    /// Durably log a provider event, then apply it. Caller holds the write lock.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut ProviderState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_to_provider(ps, event);
        Ok(())
    }

    pub fn get_provider(&self, id: &Ulid) -> Result<SharedProviderState, EngineError> {
        self.store
            .provider(id)
            .ok_or(EngineError::NotFound("provider", *id))
    }

    /// Entity id → owning provider's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        kind: &'static str,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ProviderState>, EngineError> {
        let provider_id = self
            .store
            .provider_for_entity(entity_id)
            .ok_or(EngineError::NotFound(kind, *entity_id))?;
        let ps = self.get_provider(&provider_id)?;
        Ok(ps.write_owned().await)
    }

    /// Rewrite the log as the events that recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.compaction_gate.write().await;
        let events = self.snapshot_events().await;
        self.wal
            .compact(events)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }

    async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for ps in self.store.providers() {
            let guard = ps.read().await;
            events.push(Event::ProviderCreated(guard.provider.clone()));
        }
        for service in self.store.services() {
            events.push(Event::ServiceCreated(service));
        }
        for client in self.store.clients() {
            events.push(Event::ClientCreated(client));
        }
        for ps in self.store.providers() {
            let guard = ps.read().await;
            events.extend(guard.availabilities.iter().cloned().map(Event::AvailabilityAdded));
            events.extend(guard.breaks.iter().cloned().map(Event::BreakAdded));
            events.extend(
                guard
                    .exceptions
                    .values()
                    .flatten()
                    .cloned()
                    .map(Event::ExceptionAdded),
            );
            events.extend(guard.all_bookings().cloned().map(Event::BookingConfirmed));
            events.extend(guard.payments.values().map(|payment| Event::PaymentRecorded {
                provider_id: guard.id(),
                payment: payment.clone(),
            }));
        }
        events
    }
}
