#![allow(dead_code)] // Test utility module - not all helpers used in every test

pub mod mock_transport;
pub mod recording_store;

use std::sync::Arc;

use bulkmail_common::{Clock, ManualClock, Tier};
use bulkmail_dispatch::{DispatchConfig, Dispatcher, MailTransport};
use bulkmail_queue::{MemoryStore, Stores};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
}

/// Default configuration without the inter-send delay
pub fn quick_config() -> DispatchConfig {
    DispatchConfig {
        send_delay_ms: 0,
        ..DispatchConfig::default()
    }
}

pub fn stores(store: &Arc<MemoryStore>) -> Stores {
    Stores {
        queue: store.clone(),
        log: store.clone(),
    }
}

pub fn dispatcher(
    config: DispatchConfig,
    store: &Arc<MemoryStore>,
    transport: Arc<dyn MailTransport>,
    tier: Tier,
    clock: &ManualClock,
) -> Dispatcher {
    Dispatcher::new(config, stores(store), transport, Arc::new(tier))
        .with_clock(Arc::new(clock.clone()))
}

/// A clock that moves forward by a fixed step every time it is read.
///
/// With a step longer than any retry delay, a job rescheduled during a cycle
/// is already due by the time the next batch is claimed.
#[derive(Debug)]
pub struct SteppingClock {
    now: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl SteppingClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            now: Mutex::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock();
        let current = *now;
        *now += self.step;
        current
    }
}

/// Wall clock driven by tokio time, so a paused runtime moves both the
/// execution guard and the timestamps the store records
#[derive(Debug)]
pub struct TokioClock {
    start: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.start + Duration::from_std(self.origin.elapsed()).unwrap()
    }
}
