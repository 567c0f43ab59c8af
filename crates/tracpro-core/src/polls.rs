//! Poll, question, pollrun, and response domain types.
//!
//! Enums here are stored as lowercase text columns; `code`/`from_code` are
//! the codecs the repository layer uses.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

/// Data type of a question, inferred from its rule tests at creation and
/// user-correctable afterwards (never auto-overwritten).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionType {
    Open,
    MultipleChoice,
    Numeric,
    Menu,
    Keypad,
    Recording,
}

impl QuestionType {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            QuestionType::Open => "open",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::Numeric => "numeric",
            QuestionType::Menu => "menu",
            QuestionType::Keypad => "keypad",
            QuestionType::Recording => "recording",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "open" => Some(QuestionType::Open),
            "multiple_choice" => Some(QuestionType::MultipleChoice),
            "numeric" => Some(QuestionType::Numeric),
            "menu" => Some(QuestionType::Menu),
            "keypad" => Some(QuestionType::Keypad),
            "recording" => Some(QuestionType::Recording),
            _ => None,
        }
    }
}

/// How a pollrun was scoped when it was conducted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollRunType {
    /// Sent to all active regions.
    Universal,
    /// Universal pollrun created by a baseline data spoof.
    Spoofed,
    /// Sent to a single region.
    Regional,
    /// Sent to a region and all of its sub-regions.
    Propagated,
}

impl PollRunType {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            PollRunType::Universal => "universal",
            PollRunType::Spoofed => "spoofed",
            PollRunType::Regional => "regional",
            PollRunType::Propagated => "propagated",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "universal" => Some(PollRunType::Universal),
            "spoofed" => Some(PollRunType::Spoofed),
            "regional" => Some(PollRunType::Regional),
            "propagated" => Some(PollRunType::Propagated),
            _ => None,
        }
    }

    /// Universal and spoofed pollruns have no region; the other two require one.
    #[must_use]
    pub fn requires_region(self) -> bool {
        matches!(self, PollRunType::Regional | PollRunType::Propagated)
    }
}

/// Completeness of a contact's participation in a pollrun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Empty,
    Partial,
    Complete,
}

impl ResponseStatus {
    pub const ALL: [ResponseStatus; 3] = [
        ResponseStatus::Empty,
        ResponseStatus::Partial,
        ResponseStatus::Complete,
    ];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            ResponseStatus::Empty => "empty",
            ResponseStatus::Partial => "partial",
            ResponseStatus::Complete => "complete",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "empty" => Some(ResponseStatus::Empty),
            "partial" => Some(ResponseStatus::Partial),
            "complete" => Some(ResponseStatus::Complete),
            _ => None,
        }
    }
}

/// Derives a response's status from run completion and answer presence.
#[must_use]
pub fn derive_status(completed: bool, has_answers: bool) -> ResponseStatus {
    if completed {
        ResponseStatus::Complete
    } else if has_answers {
        ResponseStatus::Partial
    } else {
        ResponseStatus::Empty
    }
}

/// The visible name after an external rename.
///
/// A name that was still tracking the external name follows the rename; a
/// customized name is kept (only the hidden external name moves).
#[must_use]
pub fn track_rename(current_name: &str, current_external: &str, new_external: &str) -> String {
    if current_name == current_external {
        new_external.to_string()
    } else {
        current_name.to_string()
    }
}

/// Latest answer-submission time across a run, falling back to the run's
/// creation time when no answers exist. Used both as `Response.updated_on`
/// and as the idempotency check during ingestion.
#[must_use]
pub fn run_updated_on<I>(created_on: DateTime<Utc>, answer_times: I) -> DateTime<Utc>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    answer_times.into_iter().max().unwrap_or(created_on)
}

/// Calendar date of `when` in an org's local time, given the org's UTC
/// offset in minutes.
#[must_use]
pub fn org_local_date(when: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
    when.with_timezone(&offset).date_naive()
}

/// UTC bounds `[start, end)` of the org-local calendar day containing `when`.
#[must_use]
pub fn org_local_day_bounds(
    when: DateTime<Utc>,
    utc_offset_minutes: i32,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_date = org_local_date(when, utc_offset_minutes);
    let midnight = local_date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc();
    let start = midnight - Duration::minutes(i64::from(utc_offset_minutes));
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn status_derivation() {
        assert_eq!(derive_status(true, true), ResponseStatus::Complete);
        assert_eq!(derive_status(true, false), ResponseStatus::Complete);
        assert_eq!(derive_status(false, true), ResponseStatus::Partial);
        assert_eq!(derive_status(false, false), ResponseStatus::Empty);
    }

    #[test]
    fn codes_round_trip() {
        for status in ResponseStatus::ALL {
            assert_eq!(ResponseStatus::from_code(status.code()), Some(status));
        }
        for ty in [
            PollRunType::Universal,
            PollRunType::Spoofed,
            PollRunType::Regional,
            PollRunType::Propagated,
        ] {
            assert_eq!(PollRunType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(QuestionType::from_code("open"), Some(QuestionType::Open));
        assert_eq!(QuestionType::from_code("bogus"), None);
    }

    #[test]
    fn tracked_name_follows_external_rename() {
        assert_eq!(track_rename("A", "A", "B"), "B");
    }

    #[test]
    fn customized_name_survives_external_rename() {
        assert_eq!(track_rename("Custom", "A", "B"), "Custom");
    }

    #[test]
    fn run_updated_on_prefers_latest_answer() {
        let created = Utc.with_ymd_and_hms(2016, 8, 1, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2016, 8, 1, 10, 5, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2016, 8, 1, 10, 9, 0).unwrap();
        assert_eq!(run_updated_on(created, vec![t1, t2]), t2);
        assert_eq!(run_updated_on(created, vec![]), created);
    }

    #[test]
    fn local_day_bounds_respect_offset() {
        // 2016-08-01 01:30 UTC is still 2016-07-31 in UTC-3.
        let when = Utc.with_ymd_and_hms(2016, 8, 1, 1, 30, 0).unwrap();
        assert_eq!(
            org_local_date(when, -180),
            NaiveDate::from_ymd_opt(2016, 7, 31).unwrap()
        );

        let (start, end) = org_local_day_bounds(when, -180);
        assert_eq!(start, Utc.with_ymd_and_hms(2016, 7, 31, 3, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2016, 8, 1, 3, 0, 0).unwrap());
        assert!(start <= when && when < end);
    }

    #[test]
    fn same_local_day_shares_bounds() {
        let morning = Utc.with_ymd_and_hms(2016, 8, 1, 9, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2016, 8, 1, 21, 0, 0).unwrap();
        assert_eq!(org_local_day_bounds(morning, 0), org_local_day_bounds(evening, 0));

        let next_day = Utc.with_ymd_and_hms(2016, 8, 2, 9, 0, 0).unwrap();
        assert_ne!(org_local_day_bounds(morning, 0), org_local_day_bounds(next_day, 0));
    }
}
