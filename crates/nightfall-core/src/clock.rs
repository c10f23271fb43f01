use chrono::NaiveDateTime;

/// Source of local wall-clock time.
///
/// Every scheduling decision reads "now" through this trait so that sunrise
/// windows, postpone expiries and night-light offsets can be exercised
/// deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Reads the local time zone of the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}
