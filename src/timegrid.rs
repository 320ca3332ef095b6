use chrono::{Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Minutes since local midnight in the provider's timezone.
pub type Minute = u16;

pub const MINUTES_PER_DAY: Minute = 1440;

/// Half-open interval `[start, end)` on a single local day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        debug_assert!(end <= MINUTES_PER_DAY, "Span must end by midnight");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Minute, end: Minute) -> Result<Self, TimeError> {
        if start >= end || end > MINUTES_PER_DAY {
            return Err(TimeError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// The whole local day, `[00:00, 24:00)`.
    pub fn full_day() -> Self {
        Self { start: 0, end: MINUTES_PER_DAY }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains_minute(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_time_of_day(self.start),
            format_time_of_day(self.end)
        )
    }
}

/// Half-open overlap test: back-to-back ranges (`a_end == b_start`) do not overlap.
pub fn overlaps(a_start: Minute, a_end: Minute, b_start: Minute, b_end: Minute) -> bool {
    a_start < b_end && b_start < a_end
}

/// Parse a strict 24-hour `"HH:MM"` string into minutes since midnight.
pub fn parse_time_of_day(s: &str) -> Result<Minute, TimeError> {
    let (hour, minute) = split_hh_mm(s)?;
    if hour > 23 {
        return Err(TimeError::InvalidTimeFormat(s.to_string()));
    }
    Ok(hour * 60 + minute)
}

/// Like [`parse_time_of_day`] but also accepts `"24:00"` for a range that runs to midnight.
pub fn parse_end_of_range(s: &str) -> Result<Minute, TimeError> {
    let (hour, minute) = split_hh_mm(s)?;
    if hour == 24 && minute == 0 {
        return Ok(MINUTES_PER_DAY);
    }
    if hour > 23 {
        return Err(TimeError::InvalidTimeFormat(s.to_string()));
    }
    Ok(hour * 60 + minute)
}

fn split_hh_mm(s: &str) -> Result<(Minute, Minute), TimeError> {
    let bad = || TimeError::InvalidTimeFormat(s.to_string());
    let bytes = s.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(bad());
    }
    let digit = |b: u8| -> Result<Minute, TimeError> {
        if b.is_ascii_digit() {
            Ok(Minute::from(b - b'0'))
        } else {
            Err(bad())
        }
    };
    let hour = digit(bytes[0])? * 10 + digit(bytes[1])?;
    let minute = digit(bytes[3])? * 10 + digit(bytes[4])?;
    if minute > 59 {
        return Err(bad());
    }
    Ok((hour, minute))
}

/// Parse a `"HH:MM"` pair into a strictly ordered span.
pub fn parse_span(start: &str, end: &str) -> Result<Span, TimeError> {
    Span::try_new(parse_time_of_day(start)?, parse_end_of_range(end)?)
}

pub fn format_time_of_day(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

pub fn parse_timezone(name: &str) -> Result<Tz, TimeError> {
    name.parse::<Tz>()
        .map_err(|_| TimeError::InvalidTimezone(name.to_string()))
}

/// Weekday of a provider-local calendar date: 0 = Sunday … 6 = Saturday.
pub fn weekday_of(date: NaiveDate, timezone: &str) -> Result<u8, TimeError> {
    parse_timezone(timezone)?;
    Ok(weekday_index(date))
}

pub(crate) fn weekday_index(date: NaiveDate) -> u8 {
    // num_days_from_sunday is always < 7
    date.weekday().num_days_from_sunday() as u8
}

/// Current local date and minute in `tz`.
pub fn local_now(tz: Tz) -> (NaiveDate, Minute) {
    let now = Utc::now().with_timezone(&tz);
    // hour < 24 and minute < 60, so this fits a u16
    let minute = (now.hour() * 60 + now.minute()) as Minute;
    (now.date_naive(), minute)
}

pub fn parse_date(s: &str) -> Result<NaiveDate, TimeError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| TimeError::InvalidDate(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    InvalidTimeFormat(String),
    InvalidInterval { start: Minute, end: Minute },
    InvalidTimezone(String),
    InvalidDate(String),
    InvalidWeekday(u8),
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::InvalidTimeFormat(s) => write!(f, "invalid time of day {s:?}: expected HH:MM"),
            TimeError::InvalidInterval { start, end } => write!(
                f,
                "invalid interval {}-{}: start must be before end",
                format_time_of_day(*start),
                format_time_of_day(*end)
            ),
            TimeError::InvalidTimezone(s) => write!(f, "unknown IANA timezone: {s}"),
            TimeError::InvalidDate(s) => write!(f, "invalid date {s:?}: expected YYYY-MM-DD"),
            TimeError::InvalidWeekday(d) => write!(f, "invalid weekday {d}: expected 0-6"),
        }
    }
}

impl std::error::Error for TimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_times() {
        assert_eq!(parse_time_of_day("00:00").unwrap(), 0);
        assert_eq!(parse_time_of_day("09:30").unwrap(), 570);
        assert_eq!(parse_time_of_day("23:59").unwrap(), 1439);
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["9:30", "09:5", "24:00", "12:60", "ab:cd", "09-30", "", "09:30:00", " 9:30"] {
            assert!(
                matches!(parse_time_of_day(bad), Err(TimeError::InvalidTimeFormat(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn end_of_range_accepts_midnight() {
        assert_eq!(parse_end_of_range("24:00").unwrap(), MINUTES_PER_DAY);
        assert!(parse_end_of_range("24:01").is_err());
        assert_eq!(parse_end_of_range("17:00").unwrap(), 1020);
    }

    #[test]
    fn parse_span_requires_order() {
        assert_eq!(parse_span("09:00", "17:00").unwrap(), Span::new(540, 1020));
        assert!(matches!(
            parse_span("17:00", "09:00"),
            Err(TimeError::InvalidInterval { .. })
        ));
        assert!(matches!(
            parse_span("09:00", "09:00"),
            Err(TimeError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn format_roundtrips_grid_points() {
        assert_eq!(format_time_of_day(0), "00:00");
        assert_eq!(format_time_of_day(615), "10:15");
        assert_eq!(format_time_of_day(MINUTES_PER_DAY), "24:00");
    }

    #[test]
    fn half_open_overlap() {
        assert!(overlaps(540, 600, 570, 630));
        assert!(!overlaps(540, 600, 600, 660)); // back-to-back
        assert!(!overlaps(600, 660, 540, 600));
        assert!(overlaps(540, 720, 600, 630)); // containment
    }

    #[test]
    fn span_containment() {
        let outer = Span::new(540, 1020);
        assert!(outer.contains_span(&Span::new(540, 570)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(1000, 1050)));
        assert!(outer.contains_minute(540));
        assert!(!outer.contains_minute(1020));
    }

    #[test]
    fn try_new_rejects_past_midnight() {
        assert!(Span::try_new(0, MINUTES_PER_DAY).is_ok());
        assert!(Span::try_new(0, MINUTES_PER_DAY + 1).is_err());
    }

    #[test]
    fn weekday_sunday_is_zero() {
        let sunday = NaiveDate::from_ymd_opt(2030, 6, 2).unwrap();
        let monday = NaiveDate::from_ymd_opt(2030, 6, 3).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2030, 6, 8).unwrap();
        assert_eq!(weekday_of(sunday, "America/New_York").unwrap(), 0);
        assert_eq!(weekday_of(monday, "Europe/Berlin").unwrap(), 1);
        assert_eq!(weekday_of(saturday, "UTC").unwrap(), 6);
    }

    #[test]
    fn weekday_rejects_unknown_zone() {
        let d = NaiveDate::from_ymd_opt(2030, 6, 3).unwrap();
        assert!(matches!(
            weekday_of(d, "Mars/Olympus_Mons"),
            Err(TimeError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn parse_date_strict() {
        assert_eq!(
            parse_date("2030-06-03").unwrap(),
            NaiveDate::from_ymd_opt(2030, 6, 3).unwrap()
        );
        assert!(parse_date("06/03/2030").is_err());
    }
}
