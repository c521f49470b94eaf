//! Per-target retrain budget windows.
//!
//! Windows tile time in fixed-length spans aligned to a weekday at 00:00 UTC.
//! With the default (Friday, 7 days) every window covers one race weekend and
//! the weekdays that follow it.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Weekday a budget window starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl AnchorDay {
    pub fn weekday(self) -> Weekday {
        match self {
            Self::Monday => Weekday::Mon,
            Self::Tuesday => Weekday::Tue,
            Self::Wednesday => Weekday::Wed,
            Self::Thursday => Weekday::Thu,
            Self::Friday => Weekday::Fri,
            Self::Saturday => Weekday::Sat,
            Self::Sunday => Weekday::Sun,
        }
    }
}

/// How budget windows are laid out in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetWindowPolicy {
    pub anchor: AnchorDay,
    pub length_days: u32,
}

impl Default for BudgetWindowPolicy {
    fn default() -> Self {
        Self {
            anchor: AnchorDay::Friday,
            length_days: 7,
        }
    }
}

impl BudgetWindowPolicy {
    /// The `[start, end)` window containing `at`.
    pub fn window_for(&self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let length = i64::from(self.length_days.max(1));
        let reference = first_weekday_on_or_after(epoch_date(), self.anchor.weekday());
        let today = at.date_naive();
        let offset = (today - reference).num_days().rem_euclid(length);
        let start_date = today - Duration::days(offset);
        let start = Utc.from_utc_datetime(&start_date.and_hms_opt(0, 0, 0).unwrap_or_default());
        (start, start + Duration::days(length))
    }
}

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn first_weekday_on_or_after(date: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (7 + i64::from(weekday.num_days_from_monday())
        - i64::from(date.weekday().num_days_from_monday()))
        % 7;
    date + Duration::days(ahead)
}

/// Retrain budget of one target within one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekendBudget {
    pub target_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub retrains_used: u32,
    pub retrains_cap: u32,
}

impl WeekendBudget {
    pub fn fresh(
        target_id: impl Into<String>,
        window: (DateTime<Utc>, DateTime<Utc>),
        retrains_cap: u32,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            window_start: window.0,
            window_end: window.1,
            retrains_used: 0,
            retrains_cap,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.retrains_used >= self.retrains_cap
    }

    pub fn remaining(&self) -> u32 {
        self.retrains_cap.saturating_sub(self.retrains_used)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.window_start && at < self.window_end
    }
}
