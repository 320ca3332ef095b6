// Hard caps on untrusted input. Rejections surface as `EngineError::LimitExceeded`.

pub const MAX_PROVIDERS: usize = 10_000;
pub const MAX_SERVICES: usize = 100_000;
pub const MAX_CLIENTS: usize = 1_000_000;

/// Availability + break rows per provider.
pub const MAX_WEEKLY_ROWS_PER_PROVIDER: usize = 512;
pub const MAX_EXCEPTIONS_PER_DATE: usize = 64;
pub const MAX_BOOKINGS_PER_DATE: usize = 1_024;

/// Widest `GetOpenSlots` date range, inclusive.
pub const MAX_QUERY_DAYS: i64 = 92;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_BOOKING_REF_LEN: usize = 64;
pub const MAX_LINK_LEN: usize = 2_048;

pub const MAX_SERVICE_DURATION_MINUTES: u16 = 1_440;
pub const MIN_SLOT_GRANULARITY_MINUTES: u16 = 1;
