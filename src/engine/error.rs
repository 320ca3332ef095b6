use ulid::Ulid;

use crate::model::{BookingStatus, Minute, Span};
use crate::timegrid::TimeError;

/// Why a candidate interval cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnavailableReason {
    OutsideHours,
    ExceptionBlocked,
    BookingConflict,
    InPast,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::OutsideHours => "outside-hours",
            UnavailableReason::ExceptionBlocked => "exception-blocked",
            UnavailableReason::BookingConflict => "booking-conflict",
            UnavailableReason::InPast => "in-past",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    InvalidTime(TimeError),
    SlotTooShort {
        required: Minute,
        available: Minute,
    },
    SlotUnavailable {
        reason: UnavailableReason,
        span: Span,
        /// The active booking that holds the range, for `BookingConflict`.
        conflicting: Option<Ulid>,
    },
    /// Commit-time race. Retried internally; callers see `SlotUnavailable`.
    ConcurrencyConflict(Ulid),
    NotFound(&'static str, Ulid),
    RefNotFound(String),
    AlreadyExists(&'static str, String),
    AlreadyCancelled(Ulid),
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    ProviderUnresolved(Ulid),
    ServiceUnavailable(Ulid),
    ClientUnavailable(Ulid),
    Validation(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn unavailable(reason: UnavailableReason, span: Span) -> Self {
        EngineError::SlotUnavailable {
            reason,
            span,
            conflicting: None,
        }
    }
}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        EngineError::InvalidTime(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidTime(e) => write!(f, "{e}"),
            EngineError::SlotTooShort {
                required,
                available,
            } => write!(
                f,
                "slot too short: service needs {required} minutes, {available} available"
            ),
            EngineError::SlotUnavailable {
                reason,
                span,
                conflicting,
            } => match conflicting {
                Some(id) => write!(f, "slot {span} unavailable: {} with booking {id}", reason.as_str()),
                None => write!(f, "slot {span} unavailable: {}", reason.as_str()),
            },
            EngineError::ConcurrencyConflict(id) => {
                write!(f, "concurrent modification of provider {id}")
            }
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::RefNotFound(r) => write!(f, "no booking with ref {r}"),
            EngineError::AlreadyExists(kind, key) => write!(f, "{kind} already exists: {key}"),
            EngineError::AlreadyCancelled(id) => write!(f, "booking {id} is already cancelled"),
            EngineError::InvalidTransition { id, from, to } => write!(
                f,
                "booking {id} cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            EngineError::ProviderUnresolved(service_id) => write!(
                f,
                "no provider given and service {service_id} is not bound to one"
            ),
            EngineError::ServiceUnavailable(id) => {
                write!(f, "service {id} is archived or deleted")
            }
            EngineError::ClientUnavailable(id) => write!(f, "client {id} is deleted"),
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::InvalidTime(e) => Some(e),
            _ => None,
        }
    }
}
