use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_QUERY_DAYS;
use crate::model::*;

use super::availability::day_overlay;
use super::conflict::{cutoff_for, enumerate_slots, free_intervals};
use super::{Engine, EngineError};

impl Engine {
    /// Bookable slots of the service's length for every date in `from..=to`.
    ///
    /// Read-only. The result can go stale as soon as the read lock drops;
    /// `request_booking` re-validates.
    pub async fn get_open_slots(
        &self,
        provider_id: Ulid,
        service_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OpenSlot>, EngineError> {
        if to < from {
            return Err(EngineError::Validation(format!(
                "date range ends before it starts: {from}..{to}"
            )));
        }
        if (to - from).num_days() >= MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("date range too wide"));
        }
        let service = self
            .store
            .service(&service_id)
            .ok_or(EngineError::NotFound("service", service_id))?;
        if !service.is_bookable() {
            return Err(EngineError::ServiceUnavailable(service_id));
        }
        if let Some(bound) = service.provider_id
            && bound != provider_id
        {
            return Err(EngineError::Validation(format!(
                "service {service_id} belongs to provider {bound}"
            )));
        }

        let ps = self.get_provider(&provider_id)?;
        let guard = ps.read().await;
        let granularity = self.config().slot_granularity;
        let mut slots = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let not_before = cutoff_for(guard.tz, date);
            let overlay = day_overlay(&guard, date);
            let free = free_intervals(&overlay.open, guard.bookings_on(date));
            slots.extend(
                enumerate_slots(&free, service.duration_minutes, granularity, not_before)
                    .into_iter()
                    .map(|span| OpenSlot {
                        provider_id,
                        date,
                        span,
                    }),
            );
        }
        Ok(slots)
    }

    /// Open intervals on `date` after breaks and exceptions, before bookings.
    pub async fn get_open_intervals(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let ps = self.get_provider(&provider_id)?;
        let guard = ps.read().await;
        Ok(day_overlay(&guard, date).open)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let provider_id = self
            .store
            .provider_for_entity(&id)
            .ok_or(EngineError::NotFound("booking", id))?;
        let ps = self.get_provider(&provider_id)?;
        let guard = ps.read().await;
        guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))
    }

    pub async fn get_booking_by_ref(&self, booking_ref: &str) -> Result<Booking, EngineError> {
        match self.store.booking_by_ref(booking_ref) {
            Some(id) => self.get_booking(id).await,
            None => Err(EngineError::RefNotFound(booking_ref.to_string())),
        }
    }

    /// Bookings of a provider, all dates or one, in date then start order.
    pub async fn list_bookings(
        &self,
        provider_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, EngineError> {
        let ps = self.get_provider(&provider_id)?;
        let guard = ps.read().await;
        Ok(match date {
            Some(date) => guard.bookings_on(date).to_vec(),
            None => guard.all_bookings().cloned().collect(),
        })
    }

    pub async fn list_providers(&self) -> Vec<Provider> {
        let mut providers = Vec::new();
        for ps in self.store.providers() {
            providers.push(ps.read().await.provider.clone());
        }
        providers.sort_by_key(|p| p.id);
        providers
    }

    pub fn list_services(&self) -> Vec<Service> {
        let mut services = self.store.services();
        services.sort_by_key(|s| s.id);
        services
    }

    pub fn list_clients(&self) -> Vec<Client> {
        let mut clients = self.store.clients();
        clients.sort_by_key(|c| c.id);
        clients
    }
}
