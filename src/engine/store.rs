use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::SharedProviderState;

/// Cross-provider records and the unique indexes the engine enforces.
pub struct InMemoryStore {
    providers: DashMap<Ulid, SharedProviderState>,
    services: DashMap<Ulid, Service>,
    clients: DashMap<Ulid, Client>,
    /// Lower-cased email → client.
    client_emails: DashMap<String, Ulid>,
    booking_refs: DashMap<String, Ulid>,
    /// Provider-owned row (availability, break, exception, booking) → provider.
    entity_to_provider: DashMap<Ulid, Ulid>,
    /// Record ids with a create in flight.
    creating: DashMap<Ulid, ()>,
}

/// Exclusive right to create the record `id`. Released on drop.
pub struct RecordClaim<'a> {
    creating: &'a DashMap<Ulid, ()>,
    id: Ulid,
}

impl Drop for RecordClaim<'_> {
    fn drop(&mut self) {
        self.creating.remove(&self.id);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            services: DashMap::new(),
            clients: DashMap::new(),
            client_emails: DashMap::new(),
            booking_refs: DashMap::new(),
            entity_to_provider: DashMap::new(),
            creating: DashMap::new(),
        }
    }

    /// Claim `id` for a record create. `None` while another create of the
    /// same id holds it.
    pub fn claim_record_id(&self, id: Ulid) -> Option<RecordClaim<'_>> {
        match self.creating.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(RecordClaim {
                    creating: &self.creating,
                    id,
                })
            }
        }
    }

    // ── Providers ────────────────────────────────────────────

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn contains_provider(&self, id: &Ulid) -> bool {
        self.providers.contains_key(id)
    }

    pub fn provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    pub fn insert_provider(&self, id: Ulid, state: SharedProviderState) {
        self.providers.insert(id, state);
    }

    pub fn providers(&self) -> Vec<SharedProviderState> {
        self.providers.iter().map(|e| e.value().clone()).collect()
    }

    // ── Services ─────────────────────────────────────────────

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn services(&self) -> Vec<Service> {
        self.services.iter().map(|e| e.value().clone()).collect()
    }

    // ── Clients ──────────────────────────────────────────────

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, id: &Ulid) -> Option<Client> {
        self.clients.get(id).map(|e| e.value().clone())
    }

    pub fn clients(&self) -> Vec<Client> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    /// Claim `email` for `client_id`. Returns false if another client holds it.
    pub fn reserve_email(&self, email: &str, client_id: Ulid) -> bool {
        reserve(&self.client_emails, email.to_lowercase(), client_id)
    }

    pub fn release_email(&self, email: &str, client_id: Ulid) {
        self.client_emails
            .remove_if(&email.to_lowercase(), |_, holder| *holder == client_id);
    }

    // ── Booking refs ─────────────────────────────────────────

    pub fn reserve_booking_ref(&self, booking_ref: &str, booking_id: Ulid) -> bool {
        reserve(&self.booking_refs, booking_ref.to_string(), booking_id)
    }

    pub fn release_booking_ref(&self, booking_ref: &str, booking_id: Ulid) {
        self.booking_refs
            .remove_if(booking_ref, |_, holder| *holder == booking_id);
    }

    pub fn booking_by_ref(&self, booking_ref: &str) -> Option<Ulid> {
        self.booking_refs.get(booking_ref).map(|e| *e.value())
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn provider_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_provider.get(entity_id).map(|e| *e.value())
    }

    pub fn map_entity(&self, entity_id: Ulid, provider_id: Ulid) {
        self.entity_to_provider.insert(entity_id, provider_id);
    }

    pub fn unmap_entity(&self, entity_id: &Ulid) {
        self.entity_to_provider.remove(entity_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a record-level event (services and clients).
    /// Provider-scoped events go through `apply_to_provider` under the provider lock.
    pub fn apply_record_event(&self, event: &Event) {
        match event {
            Event::ServiceCreated(service) => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceArchived { id } => {
                if let Some(mut service) = self.services.get_mut(id) {
                    service.archived = true;
                }
            }
            Event::ServiceDeleted { id, at } => {
                if let Some(mut service) = self.services.get_mut(id) {
                    service.deleted_at = Some(*at);
                }
            }
            Event::ClientCreated(client) => {
                // soft-deleted clients give their email back
                if client.deleted_at.is_none() {
                    self.client_emails
                        .insert(client.email.to_lowercase(), client.id);
                }
                self.clients.insert(client.id, client.clone());
            }
            Event::ClientDeleted { id, at, reason } => {
                let Some(mut client) = self.clients.get_mut(id) else {
                    return;
                };
                client.deleted_at = Some(*at);
                client.delete_reason = reason.clone();
                client.updated_at = *at;
                let email = client.email.clone();
                drop(client);
                self.release_email(&email, *id);
            }
            _ => {}
        }
    }

    /// Apply a provider-scoped event. Caller holds the provider's write lock.
    pub fn apply_to_provider(&self, ps: &mut ProviderState, event: &Event) {
        match event {
            Event::AvailabilityAdded(row) => {
                self.map_entity(row.id, row.provider_id);
                ps.insert_availability(row.clone());
            }
            Event::AvailabilityRemoved { id, .. } => {
                ps.remove_availability(*id);
                self.unmap_entity(id);
            }
            Event::BreakAdded(row) => {
                self.map_entity(row.id, row.provider_id);
                ps.insert_break(row.clone());
            }
            Event::BreakRemoved { id, .. } => {
                ps.remove_break(*id);
                self.unmap_entity(id);
            }
            Event::ExceptionAdded(row) => {
                self.map_entity(row.id, row.provider_id);
                ps.insert_exception(row.clone());
            }
            Event::ExceptionRemoved { id, .. } => {
                ps.remove_exception(*id);
                self.unmap_entity(id);
            }
            Event::BookingConfirmed(booking) => {
                self.map_entity(booking.id, booking.provider_id);
                self.booking_refs
                    .insert(booking.booking_ref.clone(), booking.id);
                ps.insert_booking(booking.clone());
            }
            Event::BookingCancelled { id, at, reason, .. } => {
                ps.update_booking(id, |b| {
                    b.status = BookingStatus::Cancelled;
                    b.deleted_at = Some(*at);
                    b.cancel_reason = reason.clone();
                    b.updated_at = *at;
                });
            }
            Event::BookingCompleted { id, at, .. } => {
                ps.update_booking(id, |b| {
                    b.status = BookingStatus::Completed;
                    b.updated_at = *at;
                });
            }
            Event::PaymentRecorded { payment, .. } => {
                ps.update_booking(&payment.booking_id, |b| {
                    b.payment_status = Some(payment.status);
                    b.payment_amount = Some(payment.amount);
                    b.payment_date = Some(payment.created_at);
                    b.updated_at = b.updated_at.max(payment.created_at);
                });
                ps.payments.insert(payment.booking_id, payment.clone());
            }
            _ => {}
        }
    }
}

fn reserve(index: &DashMap<String, Ulid>, key: String, id: Ulid) -> bool {
    match index.entry(key) {
        Entry::Occupied(existing) => *existing.get() == id,
        Entry::Vacant(slot) => {
            slot.insert(id);
            true
        }
    }
}
