use chrono::{DateTime, Utc};

/// Source of wall-clock time for domain timestamps.
///
/// Timers (timeouts, backoff, grace periods) run on the tokio clock; this
/// port only stamps records and decides debounce, cooldown and budget windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
