//! Dry-run publisher that prints the popup record instead of sending it

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;

use super::protocol::CallPopupRecord;
use super::CallPublisher;
use crate::monitor::{CallEvent, CallerId, Classification};

pub struct ConsolePublisher {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for ConsolePublisher {
    fn default() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl ConsolePublisher {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl CallPublisher for ConsolePublisher {
    async fn lookup(&self, _caller: &CallerId) -> Result<Classification> {
        Ok(Classification::New)
    }

    async fn publish(&self, event: &CallEvent) -> Result<()> {
        let record = CallPopupRecord::from(event);
        let json = serde_json::to_string_pretty(&record).context("Failed to serialize record")?;

        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("Console output lock poisoned"))?;
        writeln!(out, "[dry-run] callPopup <- {}", json).context("Failed to write record")?;
        out.flush().context("Failed to flush output")?;
        Ok(())
    }
}
