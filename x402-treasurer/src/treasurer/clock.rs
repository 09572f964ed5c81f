use chrono::{DateTime, Utc};

/// Source of "now" for window bucketing
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[cfg(test)]
pub(crate) struct ManualClock(parking_lot::Mutex<DateTime<Utc>>);

#[cfg(test)]
impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(parking_lot::Mutex::new(now))
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.0.lock();
        *now += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}
