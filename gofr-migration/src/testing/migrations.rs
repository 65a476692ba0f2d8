use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::migration::Migration;

/// Shared, ordered log of migration body invocations
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call.into());
    }

    /// Calls so far, e.g. `["A.up", "B.up"]`
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Migration that logs `NAME.up` / `NAME.down` and optionally fails
#[derive(Debug, Clone)]
pub struct RecordingMigration {
    name: String,
    log: CallLog,
    fail: bool,
}

impl RecordingMigration {
    pub fn new(name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            fail: false,
        }
    }

    /// Logs its call, then returns an error from both bodies
    pub fn failing(name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            fail: true,
            ..Self::new(name, log)
        }
    }

    fn call(&self, method: &str) -> anyhow::Result<()> {
        self.log.push(format!("{}.{}", self.name, method));
        if self.fail {
            anyhow::bail!("{} failed during {}", self.name, method);
        }
        Ok(())
    }
}

#[async_trait]
impl<C: ?Sized + Send> Migration<C> for RecordingMigration {
    async fn up(&self, _conn: &mut C) -> anyhow::Result<()> {
        self.call("up")
    }

    async fn down(&self, _conn: &mut C) -> anyhow::Result<()> {
        self.call("down")
    }
}
