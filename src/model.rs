use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use crate::timegrid::{Minute, Span};

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

/// Amounts are integer minor currency units (cents).
pub type Money = i64;

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Ulid,
    pub name: Option<String>,
    /// IANA name; every time-of-day on this provider is local to it.
    pub timezone: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: Minute,
    pub price: Option<Money>,
    /// `None` means the service can be booked with any provider.
    pub provider_id: Option<Ulid>,
    pub archived: bool,
    pub deleted_at: Option<Ms>,
    pub created_at: Ms,
}

impl Service {
    pub fn is_bookable(&self) -> bool {
        !self.archived && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub deleted_at: Option<Ms>,
    pub delete_reason: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Recurring weekly open window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub id: Ulid,
    pub provider_id: Ulid,
    /// 0 = Sunday … 6 = Saturday.
    pub weekday: u8,
    pub span: Span,
}

/// Recurring weekly closed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Break {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub weekday: u8,
    pub span: Span,
}

/// Date-specific override of the weekly schedule. `span == None` covers the whole day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub date: NaiveDate,
    pub span: Option<Span>,
    pub is_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Requested,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "requested",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "requested" | "pending" => Some(BookingStatus::Requested),
            "confirmed" => Some(BookingStatus::Confirmed),
            "rejected" => Some(BookingStatus::Rejected),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }

    /// `Requested -> {Confirmed, Rejected}`, `Confirmed -> {Cancelled, Completed}`.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Requested, BookingStatus::Confirmed)
                | (BookingStatus::Requested, BookingStatus::Rejected)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub booking_ref: String,
    pub date: NaiveDate,
    pub span: Span,
    pub service_id: Ulid,
    pub client_id: Ulid,
    /// Resolved provider: the requested one, else the service's.
    pub provider_id: Ulid,
    pub status: BookingStatus,
    pub deleted_at: Option<Ms>,
    pub cancel_reason: Option<String>,
    pub payment_option: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_amount: Option<Money>,
    pub payment_date: Option<Ms>,
    pub notes: Option<String>,
    pub group_count: Option<u32>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// Active bookings hold their time range against the provider.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
            && !matches!(self.status, BookingStatus::Cancelled | BookingStatus::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount: Money,
    pub status: PaymentStatus,
    pub link: Option<String>,
    pub created_at: Ms,
}

// ── Provider aggregate ───────────────────────────────────────────

/// Everything that decides a provider's open time. Guarded by one lock.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub provider: Provider,
    pub tz: Tz,
    pub availabilities: Vec<Availability>,
    pub breaks: Vec<Break>,
    pub exceptions: BTreeMap<NaiveDate, Vec<AvailabilityException>>,
    /// Per date, sorted by `span.start`.
    pub bookings: BTreeMap<NaiveDate, Vec<Booking>>,
    pub payments: HashMap<Ulid, Payment>,
    booking_dates: HashMap<Ulid, NaiveDate>,
    schedule_revision: u64,
    day_revisions: HashMap<NaiveDate, u64>,
}

/// Snapshot of the revisions a booking validation read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub schedule: u64,
    pub day: u64,
}

impl ProviderState {
    pub fn new(provider: Provider, tz: Tz) -> Self {
        Self {
            provider,
            tz,
            availabilities: Vec::new(),
            breaks: Vec::new(),
            exceptions: BTreeMap::new(),
            bookings: BTreeMap::new(),
            payments: HashMap::new(),
            booking_dates: HashMap::new(),
            schedule_revision: 0,
            day_revisions: HashMap::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.provider.id
    }

    pub fn revision(&self, date: NaiveDate) -> Revision {
        Revision {
            schedule: self.schedule_revision,
            day: self.day_revisions.get(&date).copied().unwrap_or(0),
        }
    }

    fn touch_schedule(&mut self) {
        self.schedule_revision += 1;
    }

    fn touch_day(&mut self, date: NaiveDate) {
        *self.day_revisions.entry(date).or_insert(0) += 1;
    }

    pub fn weekly_row_count(&self) -> usize {
        self.availabilities.len() + self.breaks.len()
    }

    pub fn insert_availability(&mut self, row: Availability) {
        self.availabilities.push(row);
        self.touch_schedule();
    }

    pub fn remove_availability(&mut self, id: Ulid) -> Option<Availability> {
        let pos = self.availabilities.iter().position(|a| a.id == id)?;
        self.touch_schedule();
        Some(self.availabilities.remove(pos))
    }

    pub fn insert_break(&mut self, row: Break) {
        self.breaks.push(row);
        self.touch_schedule();
    }

    pub fn remove_break(&mut self, id: Ulid) -> Option<Break> {
        let pos = self.breaks.iter().position(|b| b.id == id)?;
        self.touch_schedule();
        Some(self.breaks.remove(pos))
    }

    pub fn insert_exception(&mut self, row: AvailabilityException) {
        let date = row.date;
        self.exceptions.entry(date).or_default().push(row);
        self.touch_day(date);
    }

    pub fn remove_exception(&mut self, id: Ulid) -> Option<AvailabilityException> {
        let (date, pos) = self.exceptions.iter().find_map(|(date, rows)| {
            rows.iter().position(|e| e.id == id).map(|pos| (*date, pos))
        })?;
        let rows = self.exceptions.get_mut(&date)?;
        let removed = rows.remove(pos);
        if rows.is_empty() {
            self.exceptions.remove(&date);
        }
        self.touch_day(date);
        Some(removed)
    }

    pub fn exceptions_on(&self, date: NaiveDate) -> &[AvailabilityException] {
        self.exceptions.get(&date).map_or(&[], Vec::as_slice)
    }

    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        self.bookings.get(&date).map_or(&[], Vec::as_slice)
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let date = booking.date;
        self.booking_dates.insert(booking.id, date);
        let day = self.bookings.entry(date).or_default();
        let pos = day
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, booking);
        self.touch_day(date);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        let date = self.booking_dates.get(id)?;
        self.bookings.get(date)?.iter().find(|b| b.id == *id)
    }

    /// Mutate a booking in place. Bumps the day revision.
    pub fn update_booking<F>(&mut self, id: &Ulid, f: F) -> bool
    where
        F: FnOnce(&mut Booking),
    {
        let Some(date) = self.booking_dates.get(id).copied() else {
            return false;
        };
        let Some(booking) = self
            .bookings
            .get_mut(&date)
            .and_then(|day| day.iter_mut().find(|b| b.id == *id))
        else {
            return false;
        };
        f(booking);
        self.touch_day(date);
        true
    }

    pub fn all_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values().flatten()
    }
}

// ── WAL record ───────────────────────────────────────────────────

/// The event types, flat and self-contained. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderCreated(Provider),
    ServiceCreated(Service),
    ServiceArchived {
        id: Ulid,
    },
    ServiceDeleted {
        id: Ulid,
        at: Ms,
    },
    ClientCreated(Client),
    ClientDeleted {
        id: Ulid,
        at: Ms,
        reason: Option<String>,
    },
    AvailabilityAdded(Availability),
    AvailabilityRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    BreakAdded(Break),
    BreakRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    ExceptionAdded(AvailabilityException),
    ExceptionRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    BookingConfirmed(Booking),
    BookingCancelled {
        id: Ulid,
        provider_id: Ulid,
        at: Ms,
        reason: Option<String>,
    },
    BookingCompleted {
        id: Ulid,
        provider_id: Ulid,
        at: Ms,
    },
    PaymentRecorded {
        provider_id: Ulid,
        payment: Payment,
    },
}

impl Event {
    /// Provider aggregate this event mutates, if any.
    pub fn provider_id(&self) -> Option<Ulid> {
        match self {
            Event::AvailabilityAdded(a) => Some(a.provider_id),
            Event::BreakAdded(b) => Some(b.provider_id),
            Event::ExceptionAdded(e) => Some(e.provider_id),
            Event::BookingConfirmed(b) => Some(b.provider_id),
            Event::AvailabilityRemoved { provider_id, .. }
            | Event::BreakRemoved { provider_id, .. }
            | Event::ExceptionRemoved { provider_id, .. }
            | Event::BookingCancelled { provider_id, .. }
            | Event::BookingCompleted { provider_id, .. }
            | Event::PaymentRecorded { provider_id, .. } => Some(*provider_id),
            Event::ProviderCreated(_)
            | Event::ServiceCreated(_)
            | Event::ServiceArchived { .. }
            | Event::ServiceDeleted { .. }
            | Event::ClientCreated(_)
            | Event::ClientDeleted { .. } => None,
        }
    }
}

// ── Command inputs ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewService {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: Minute,
    pub price: Option<Money>,
    pub provider_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClient {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    /// Overrides `Service.provider_id` resolution when set.
    pub provider_id: Option<Ulid>,
    pub booking_ref: Option<String>,
    pub notes: Option<String>,
    pub group_count: Option<u32>,
    pub payment_option: Option<String>,
}

impl BookingRequest {
    pub fn new(service_id: Ulid, client_id: Ulid, date: NaiveDate, span: Span) -> Self {
        Self {
            id: Ulid::new(),
            service_id,
            client_id,
            date,
            span,
            provider_id: None,
            booking_ref: None,
            notes: None,
            group_count: None,
            payment_option: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount: Money,
    pub status: PaymentStatus,
    pub link: Option<String>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenSlot {
    pub provider_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_state() -> ProviderState {
        let provider = Provider {
            id: Ulid::new(),
            name: None,
            timezone: "UTC".into(),
            created_at: 0,
        };
        ProviderState::new(provider, chrono_tz::UTC)
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 6, d).unwrap()
    }

    fn booking(provider_id: Ulid, day: u32, start: Minute, end: Minute) -> Booking {
        Booking {
            id: Ulid::new(),
            booking_ref: "BK".into(),
            date: date(day),
            span: Span::new(start, end),
            service_id: Ulid::new(),
            client_id: Ulid::new(),
            provider_id,
            status: BookingStatus::Confirmed,
            deleted_at: None,
            cancel_reason: None,
            payment_option: None,
            payment_status: None,
            payment_amount: None,
            payment_date: None,
            notes: None,
            group_count: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn status_transitions() {
        use BookingStatus::*;
        assert!(Requested.can_transition_to(Confirmed));
        assert!(Requested.can_transition_to(Rejected));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Rejected.can_transition_to(Confirmed));
        assert!(!Requested.can_transition_to(Completed));
    }

    #[test]
    fn status_parse_accepts_aliases() {
        assert_eq!(BookingStatus::parse("pending"), Some(BookingStatus::Requested));
        assert_eq!(BookingStatus::parse("Canceled"), Some(BookingStatus::Cancelled));
        assert_eq!(BookingStatus::parse("nope"), None);
    }

    #[test]
    fn cancelled_or_deleted_bookings_are_inactive() {
        let pid = Ulid::new();
        let mut b = booking(pid, 3, 540, 570);
        assert!(b.is_active());
        b.status = BookingStatus::Cancelled;
        assert!(!b.is_active());
        let mut b = booking(pid, 3, 540, 570);
        b.deleted_at = Some(1);
        assert!(!b.is_active());
    }

    #[test]
    fn bookings_kept_sorted_per_date() {
        let mut ps = provider_state();
        let pid = ps.id();
        ps.insert_booking(booking(pid, 3, 780, 810));
        ps.insert_booking(booking(pid, 3, 540, 570));
        ps.insert_booking(booking(pid, 4, 600, 630));
        ps.insert_booking(booking(pid, 3, 660, 690));
        let starts: Vec<_> = ps.bookings_on(date(3)).iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![540, 660, 780]);
        assert_eq!(ps.bookings_on(date(4)).len(), 1);
        assert!(ps.bookings_on(date(5)).is_empty());
    }

    #[test]
    fn booking_insert_bumps_only_its_day() {
        let mut ps = provider_state();
        let pid = ps.id();
        let before_3 = ps.revision(date(3));
        let before_4 = ps.revision(date(4));
        ps.insert_booking(booking(pid, 3, 540, 570));
        assert_ne!(ps.revision(date(3)), before_3);
        assert_eq!(ps.revision(date(4)), before_4);
    }

    #[test]
    fn weekly_change_bumps_schedule_revision() {
        let mut ps = provider_state();
        let before = ps.revision(date(3));
        let id = Ulid::new();
        ps.insert_availability(Availability {
            id,
            provider_id: ps.id(),
            weekday: 1,
            span: Span::new(540, 1020),
        });
        let after = ps.revision(date(3));
        assert_ne!(before.schedule, after.schedule);
        assert!(ps.remove_availability(id).is_some());
        assert!(ps.remove_availability(id).is_none());
    }

    #[test]
    fn update_booking_in_place() {
        let mut ps = provider_state();
        let b = booking(ps.id(), 3, 540, 570);
        let id = b.id;
        ps.insert_booking(b);
        assert!(ps.update_booking(&id, |b| b.status = BookingStatus::Cancelled));
        assert_eq!(ps.booking(&id).unwrap().status, BookingStatus::Cancelled);
        assert!(!ps.update_booking(&Ulid::new(), |_| {}));
    }

    #[test]
    fn exception_removal_cleans_empty_dates() {
        let mut ps = provider_state();
        let id = Ulid::new();
        ps.insert_exception(AvailabilityException {
            id,
            provider_id: ps.id(),
            date: date(3),
            span: None,
            is_available: false,
        });
        assert_eq!(ps.exceptions_on(date(3)).len(), 1);
        assert!(ps.remove_exception(id).is_some());
        assert!(ps.exceptions.is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ExceptionAdded(AvailabilityException {
            id: Ulid::new(),
            provider_id: Ulid::new(),
            date: date(3),
            span: Some(Span::new(600, 660)),
            is_available: false,
        });
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
