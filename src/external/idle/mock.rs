use super::IdleTimeSource;
use anyhow::{anyhow, Result};
use std::{
    cell::Cell,
    sync::{Arc, Mutex},
    time::Duration,
};

/// A mock [IdleTimeSource], whose idle time is set by the test.
#[derive(Debug, Clone)]
pub struct MockIdleTimeSource {
    idle_time: Arc<Mutex<Cell<Duration>>>,
    should_fail: Arc<Mutex<Cell<bool>>>,
}

impl MockIdleTimeSource {
    pub fn new(idle_time: Duration) -> MockIdleTimeSource {
        MockIdleTimeSource {
            idle_time: Arc::new(Mutex::new(Cell::new(idle_time))),
            should_fail: Arc::new(Mutex::new(Cell::new(false))),
        }
    }

    pub fn set_idle_time(&self, idle_time: Duration) {
        self.idle_time.lock().unwrap().set(idle_time);
    }

    pub fn set_failure_mode(&self, should_fail: bool) {
        self.should_fail.lock().unwrap().set(should_fail);
    }
}

impl IdleTimeSource for MockIdleTimeSource {
    fn idle_time(&self) -> Result<Duration> {
        if self.should_fail.lock().unwrap().get() {
            Err(anyhow!("Mock IdleTimeSource is failing"))
        } else {
            Ok(self.idle_time.lock().unwrap().get())
        }
    }
}
