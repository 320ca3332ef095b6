use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::timegrid::{TimeError, parse_timezone};

use super::availability::day_overlay;
use super::conflict::{cutoff_for, now_ms, validate_candidate};
use super::{Engine, EngineError, RecordClaim};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_opt_len(value: &Option<String>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) => check_len(v, max, what),
        None => Ok(()),
    }
}

fn check_weekday(weekday: u8) -> Result<(), EngineError> {
    if weekday > 6 {
        return Err(TimeError::InvalidWeekday(weekday).into());
    }
    Ok(())
}

/// Validate `req` against the provider's current day.
fn check_candidate(
    ps: &ProviderState,
    req: &BookingRequest,
    duration: Minute,
) -> Result<(), EngineError> {
    let overlay = day_overlay(ps, req.date);
    let not_before = cutoff_for(ps.tz, req.date);
    validate_candidate(
        &overlay,
        ps.bookings_on(req.date),
        req.span,
        duration,
        not_before,
    )?;
    Ok(())
}

/// What a booking request resolved to before any provider lock is taken.
struct ResolvedRequest {
    provider_id: Ulid,
    duration: Minute,
    booking_ref: String,
}

impl Engine {
    // ── Records ──────────────────────────────────────────────

    pub async fn create_provider(
        &self,
        id: Ulid,
        timezone: String,
        name: Option<String>,
    ) -> Result<Provider, EngineError> {
        let tz = parse_timezone(&timezone)?;
        check_opt_len(&name, MAX_NAME_LEN, "provider name too long")?;
        if self.store.provider_count() >= MAX_PROVIDERS {
            return Err(EngineError::LimitExceeded("too many providers"));
        }
        let _permit = self.write_permit().await;
        let _claim = self.claim_id("provider", id)?;
        if self.store.contains_provider(&id) {
            return Err(EngineError::AlreadyExists("provider", id.to_string()));
        }

        let provider = Provider {
            id,
            name,
            timezone,
            created_at: now_ms(),
        };
        self.persist_record(Event::ProviderCreated(provider.clone()))
            .await?;
        let state = ProviderState::new(provider.clone(), tz);
        self.store.insert_provider(id, Arc::new(RwLock::new(state)));
        metrics::gauge!(observability::PROVIDERS_ACTIVE).set(self.store.provider_count() as f64);
        tracing::info!(provider = %id, timezone = %provider.timezone, "provider created");
        Ok(provider)
    }

    pub async fn create_service(&self, new: NewService) -> Result<Service, EngineError> {
        if new.name.trim().is_empty() {
            return Err(EngineError::Validation("service name is empty".into()));
        }
        check_len(&new.name, MAX_NAME_LEN, "service name too long")?;
        if new.duration_minutes == 0 {
            return Err(EngineError::Validation(
                "service duration must be positive".into(),
            ));
        }
        if new.duration_minutes > MAX_SERVICE_DURATION_MINUTES {
            return Err(EngineError::LimitExceeded("service longer than a day"));
        }
        if new.price.is_some_and(|p| p < 0) {
            return Err(EngineError::Validation("service price is negative".into()));
        }
        if self.store.service_count() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if let Some(pid) = new.provider_id
            && !self.store.contains_provider(&pid)
        {
            return Err(EngineError::NotFound("provider", pid));
        }

        let _permit = self.write_permit().await;
        let _claim = self.claim_id("service", new.id)?;
        if self.store.service(&new.id).is_some() {
            return Err(EngineError::AlreadyExists("service", new.id.to_string()));
        }
        let service = Service {
            id: new.id,
            name: new.name,
            duration_minutes: new.duration_minutes,
            price: new.price,
            provider_id: new.provider_id,
            archived: false,
            deleted_at: None,
            created_at: now_ms(),
        };
        self.persist_record(Event::ServiceCreated(service.clone()))
            .await?;
        Ok(service)
    }

    pub async fn archive_service(&self, id: Ulid) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let service = self
            .store
            .service(&id)
            .ok_or(EngineError::NotFound("service", id))?;
        if service.archived {
            return Ok(());
        }
        self.persist_record(Event::ServiceArchived { id }).await
    }

    /// Soft delete: existing bookings keep pointing at the record.
    pub async fn delete_service(&self, id: Ulid) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let service = self
            .store
            .service(&id)
            .ok_or(EngineError::NotFound("service", id))?;
        if service.deleted_at.is_some() {
            return Ok(());
        }
        self.persist_record(Event::ServiceDeleted { id, at: now_ms() })
            .await
    }

    pub async fn create_client(&self, new: NewClient) -> Result<Client, EngineError> {
        if new.name.trim().is_empty() {
            return Err(EngineError::Validation("client name is empty".into()));
        }
        check_len(&new.name, MAX_NAME_LEN, "client name too long")?;
        check_len(&new.email, MAX_EMAIL_LEN, "email too long")?;
        check_opt_len(&new.phone, MAX_NAME_LEN, "phone too long")?;
        let email = new.email.trim();
        if !email.contains('@') {
            return Err(EngineError::Validation(format!("invalid email: {email}")));
        }
        if self.store.client_count() >= MAX_CLIENTS {
            return Err(EngineError::LimitExceeded("too many clients"));
        }

        let _permit = self.write_permit().await;
        let _claim = self.claim_id("client", new.id)?;
        if self.store.client(&new.id).is_some() {
            return Err(EngineError::AlreadyExists("client", new.id.to_string()));
        }
        if !self.store.reserve_email(email, new.id) {
            return Err(EngineError::AlreadyExists("client email", email.to_string()));
        }
        let now = now_ms();
        let client = Client {
            id: new.id,
            name: new.name,
            email: email.to_string(),
            phone: new.phone,
            deleted_at: None,
            delete_reason: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.persist_record(Event::ClientCreated(client.clone())).await {
            self.store.release_email(email, new.id);
            return Err(e);
        }
        Ok(client)
    }

    /// Soft delete. Frees the email for reuse.
    pub async fn delete_client(&self, id: Ulid, reason: Option<String>) -> Result<(), EngineError> {
        check_opt_len(&reason, MAX_REASON_LEN, "delete reason too long")?;
        let _permit = self.write_permit().await;
        let client = self
            .store
            .client(&id)
            .ok_or(EngineError::NotFound("client", id))?;
        if client.deleted_at.is_some() {
            return Ok(());
        }
        self.persist_record(Event::ClientDeleted {
            id,
            at: now_ms(),
            reason,
        })
        .await
    }

    // ── Weekly schedule ──────────────────────────────────────

    pub async fn add_availability(
        &self,
        id: Ulid,
        provider_id: Ulid,
        weekday: u8,
        span: Span,
    ) -> Result<(), EngineError> {
        check_weekday(weekday)?;
        let _permit = self.write_permit().await;
        let ps = self.get_provider(&provider_id)?;
        let mut guard = ps.write().await;
        if guard.weekly_row_count() >= MAX_WEEKLY_ROWS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many weekly rows on provider"));
        }
        self.check_new_entity(&id)?;
        let event = Event::AvailabilityAdded(Availability {
            id,
            provider_id,
            weekday,
            span,
        });
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_availability(&self, id: Ulid) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.resolve_entity_write("availability", &id).await?;
        if !guard.availabilities.iter().any(|a| a.id == id) {
            return Err(EngineError::NotFound("availability", id));
        }
        let event = Event::AvailabilityRemoved {
            id,
            provider_id: guard.id(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_break(
        &self,
        id: Ulid,
        provider_id: Ulid,
        weekday: u8,
        span: Span,
    ) -> Result<(), EngineError> {
        check_weekday(weekday)?;
        let _permit = self.write_permit().await;
        let ps = self.get_provider(&provider_id)?;
        let mut guard = ps.write().await;
        if guard.weekly_row_count() >= MAX_WEEKLY_ROWS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many weekly rows on provider"));
        }
        self.check_new_entity(&id)?;
        let event = Event::BreakAdded(Break {
            id,
            provider_id,
            weekday,
            span,
        });
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_break(&self, id: Ulid) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.resolve_entity_write("break", &id).await?;
        if !guard.breaks.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound("break", id));
        }
        let event = Event::BreakRemoved {
            id,
            provider_id: guard.id(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_exception(
        &self,
        id: Ulid,
        provider_id: Ulid,
        date: NaiveDate,
        span: Option<Span>,
        is_available: bool,
    ) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let ps = self.get_provider(&provider_id)?;
        let mut guard = ps.write().await;
        if guard.exceptions_on(date).len() >= MAX_EXCEPTIONS_PER_DATE {
            return Err(EngineError::LimitExceeded("too many exceptions on date"));
        }
        self.check_new_entity(&id)?;
        let event = Event::ExceptionAdded(AvailabilityException {
            id,
            provider_id,
            date,
            span,
            is_available,
        });
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_exception(&self, id: Ulid) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.resolve_entity_write("exception", &id).await?;
        if !guard.exceptions.values().flatten().any(|e| e.id == id) {
            return Err(EngineError::NotFound("exception", id));
        }
        let event = Event::ExceptionRemoved {
            id,
            provider_id: guard.id(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Serializes creates of one record id; a concurrent duplicate loses.
    fn claim_id(&self, kind: &'static str, id: Ulid) -> Result<RecordClaim<'_>, EngineError> {
        self.store
            .claim_record_id(id)
            .ok_or_else(|| EngineError::AlreadyExists(kind, id.to_string()))
    }

    fn check_new_entity(&self, id: &Ulid) -> Result<(), EngineError> {
        if self.store.provider_for_entity(id).is_some() {
            return Err(EngineError::AlreadyExists("row", id.to_string()));
        }
        Ok(())
    }

    // ── Slot reservation ─────────────────────────────────────

    /// Validate and commit a booking.
    ///
    /// Validation runs under the provider's read lock. The commit takes the
    /// write lock; if the schedule or the date changed in between, the
    /// candidate is validated again under that lock. Only a candidate that no
    /// longer fits counts as a race: it is retried with backoff, and the last
    /// attempt reports whatever now blocks it.
    pub async fn request_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let result = self.request_booking_inner(&req).await;
        match &result {
            Ok(booking) => {
                metrics::counter!(observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
                tracing::info!(
                    booking = %booking.id,
                    provider = %booking.provider_id,
                    date = %booking.date,
                    span = %booking.span,
                    "booking confirmed"
                );
            }
            Err(EngineError::SlotUnavailable { reason, .. }) => {
                metrics::counter!(observability::BOOKING_REJECTIONS_TOTAL, "reason" => reason.as_str())
                    .increment(1);
                tracing::debug!(date = %req.date, span = %req.span, "booking rejected: {}", reason.as_str());
            }
            Err(EngineError::SlotTooShort { .. }) => {
                metrics::counter!(observability::BOOKING_REJECTIONS_TOTAL, "reason" => "slot-too-short")
                    .increment(1);
                tracing::debug!(date = %req.date, span = %req.span, "booking rejected: too short");
            }
            Err(_) => {}
        }
        result
    }

    async fn request_booking_inner(&self, req: &BookingRequest) -> Result<Booking, EngineError> {
        let resolved = self.resolve_request(req)?;
        let mut backoff = self.config().retry_backoff;
        let mut retries = 0u32;
        loop {
            let last_attempt = retries >= self.config().commit_retries;
            match self.try_commit(req, &resolved, last_attempt).await {
                Err(EngineError::ConcurrencyConflict(provider_id)) => {
                    retries += 1;
                    metrics::counter!(observability::COMMIT_RETRIES_TOTAL).increment(1);
                    tracing::debug!(%provider_id, retries, "commit raced, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                other => return other,
            }
        }
    }

    /// Checks that need no provider lock: the service, the client and the provider.
    fn resolve_request(&self, req: &BookingRequest) -> Result<ResolvedRequest, EngineError> {
        check_opt_len(&req.notes, MAX_NOTES_LEN, "notes too long")?;
        check_opt_len(&req.booking_ref, MAX_BOOKING_REF_LEN, "booking ref too long")?;
        check_opt_len(&req.payment_option, MAX_NAME_LEN, "payment option too long")?;
        if req.group_count == Some(0) {
            return Err(EngineError::Validation("group count must be positive".into()));
        }

        let service = self
            .store
            .service(&req.service_id)
            .ok_or(EngineError::NotFound("service", req.service_id))?;
        if !service.is_bookable() {
            return Err(EngineError::ServiceUnavailable(service.id));
        }
        let client = self
            .store
            .client(&req.client_id)
            .ok_or(EngineError::NotFound("client", req.client_id))?;
        if client.deleted_at.is_some() {
            return Err(EngineError::ClientUnavailable(client.id));
        }

        let provider_id = match (req.provider_id, service.provider_id) {
            (Some(requested), Some(bound)) if requested != bound => {
                return Err(EngineError::Validation(format!(
                    "service {} belongs to provider {bound}",
                    service.id
                )));
            }
            (Some(requested), _) => requested,
            (None, Some(bound)) => bound,
            (None, None) => return Err(EngineError::ProviderUnresolved(service.id)),
        };
        if !self.store.contains_provider(&provider_id) {
            return Err(EngineError::NotFound("provider", provider_id));
        }

        let booking_ref = match &req.booking_ref {
            Some(r) if r.trim().is_empty() => {
                return Err(EngineError::Validation("booking ref is empty".into()));
            }
            Some(r) => r.clone(),
            None => format!("BK-{}", req.id),
        };

        Ok(ResolvedRequest {
            provider_id,
            duration: service.duration_minutes,
            booking_ref,
        })
    }

    /// One validate-then-commit pass. A candidate invalidated between the
    /// read and the write lock is a `ConcurrencyConflict`, unless this is the
    /// last attempt, which returns the blocking reason itself.
    async fn try_commit(
        &self,
        req: &BookingRequest,
        resolved: &ResolvedRequest,
        last_attempt: bool,
    ) -> Result<Booking, EngineError> {
        let ps = self.get_provider(&resolved.provider_id)?;

        let seen = {
            let guard = ps.read().await;
            check_candidate(&guard, req, resolved.duration)?;
            guard.revision(req.date)
        };

        let _permit = self.write_permit().await;
        let mut guard = ps.write().await;
        if guard.revision(req.date) != seen
            && let Err(e) = check_candidate(&guard, req, resolved.duration)
        {
            if last_attempt {
                return Err(e);
            }
            return Err(EngineError::ConcurrencyConflict(resolved.provider_id));
        }
        if self.store.provider_for_entity(&req.id).is_some() {
            return Err(EngineError::AlreadyExists("booking", req.id.to_string()));
        }
        let active = guard
            .bookings_on(req.date)
            .iter()
            .filter(|b| b.is_active())
            .count();
        if active >= MAX_BOOKINGS_PER_DATE {
            return Err(EngineError::LimitExceeded("too many bookings on date"));
        }
        if !self.store.reserve_booking_ref(&resolved.booking_ref, req.id) {
            return Err(EngineError::AlreadyExists(
                "booking ref",
                resolved.booking_ref.clone(),
            ));
        }

        let now = now_ms();
        let booking = Booking {
            id: req.id,
            booking_ref: resolved.booking_ref.clone(),
            date: req.date,
            span: req.span,
            service_id: req.service_id,
            client_id: req.client_id,
            provider_id: resolved.provider_id,
            status: BookingStatus::Confirmed,
            deleted_at: None,
            cancel_reason: None,
            payment_option: req.payment_option.clone(),
            payment_status: None,
            payment_amount: None,
            payment_date: None,
            notes: req.notes.clone(),
            group_count: req.group_count,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingConfirmed(booking.clone());
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.store.release_booking_ref(&resolved.booking_ref, req.id);
            return Err(e);
        }
        Ok(booking)
    }

    // ── Booking lifecycle ────────────────────────────────────

    pub async fn cancel_booking(
        &self,
        id: Ulid,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        check_opt_len(&reason, MAX_REASON_LEN, "cancel reason too long")?;
        let _permit = self.write_permit().await;
        let mut guard = self.resolve_entity_write("booking", &id).await?;
        let booking = guard
            .booking(&id)
            .ok_or(EngineError::NotFound("booking", id))?;
        if booking.status == BookingStatus::Cancelled || booking.deleted_at.is_some() {
            return Err(EngineError::AlreadyCancelled(id));
        }
        if !booking.status.can_transition_to(BookingStatus::Cancelled) {
            return Err(EngineError::InvalidTransition {
                id,
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }

        let event = Event::BookingCancelled {
            id,
            provider_id: guard.id(),
            at: now_ms(),
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        tracing::info!(booking = %id, provider = %guard.id(), "booking cancelled");
        guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))
    }

    pub async fn complete_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.resolve_entity_write("booking", &id).await?;
        let booking = guard
            .booking(&id)
            .ok_or(EngineError::NotFound("booking", id))?;
        if !booking.status.can_transition_to(BookingStatus::Completed) {
            return Err(EngineError::InvalidTransition {
                id,
                from: booking.status,
                to: BookingStatus::Completed,
            });
        }

        let event = Event::BookingCompleted {
            id,
            provider_id: guard.id(),
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))
    }

    /// Attach the booking's single payment and mirror it onto the booking.
    pub async fn record_payment(&self, new: NewPayment) -> Result<Payment, EngineError> {
        if new.amount < 0 {
            return Err(EngineError::Validation("payment amount is negative".into()));
        }
        check_opt_len(&new.link, MAX_LINK_LEN, "payment link too long")?;
        let _permit = self.write_permit().await;
        let mut guard = self
            .resolve_entity_write("booking", &new.booking_id)
            .await?;
        if guard.booking(&new.booking_id).is_none() {
            return Err(EngineError::NotFound("booking", new.booking_id));
        }
        if guard.payments.contains_key(&new.booking_id) {
            return Err(EngineError::AlreadyExists(
                "payment for booking",
                new.booking_id.to_string(),
            ));
        }

        let payment = Payment {
            id: new.id,
            booking_id: new.booking_id,
            amount: new.amount,
            status: new.status,
            link: new.link,
            created_at: now_ms(),
        };
        let event = Event::PaymentRecorded {
            provider_id: guard.id(),
            payment: payment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(payment)
    }
}
