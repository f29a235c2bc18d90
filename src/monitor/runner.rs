//! The monitoring loop: tail → match → dedupe → publish
//!
//! One task, one file. The only wait is the poll interval when the log has
//! nothing new; an operator interrupt or a read failure ends the loop.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use std::convert::Infallible;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::dedupe::{DedupeWindow, Verdict, DEFAULT_BUCKET_SECS, DEFAULT_RETENTION_BUCKETS};
use super::event::{CallEvent, Classification};
use super::matcher::CallMatcher;
use super::tail::LogTail;
use crate::publish::CallPublisher;

/// Default wait between polls when the log has no new lines
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Tunables for the monitoring loop
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Own number of the monitored line, copied into every event
    pub called: String,
    pub poll_interval: Duration,
    pub bucket_secs: u64,
    pub retention_buckets: u64,
}

impl MonitorSettings {
    pub fn new(called: impl Into<String>) -> Self {
        Self {
            called: called.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            bucket_secs: DEFAULT_BUCKET_SECS,
            retention_buckets: DEFAULT_RETENTION_BUCKETS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Watching,
    Stopped,
}

/// What one poll did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub lines_read: usize,
    /// Lines that named a caller
    pub detected: usize,
    pub suppressed: usize,
    pub published: usize,
    pub publish_failed: usize,
    pub rotated: bool,
}

/// Running totals since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub lines_read: u64,
    pub detected: u64,
    pub suppressed: u64,
    pub published: u64,
    pub publish_failed: u64,
    pub rotations: u64,
}

impl MonitorStats {
    fn absorb(&mut self, report: &PollReport) {
        self.lines_read += report.lines_read as u64;
        self.detected += report.detected as u64;
        self.suppressed += report.suppressed as u64;
        self.published += report.published as u64;
        self.publish_failed += report.publish_failed as u64;
        self.rotations += u64::from(report.rotated);
    }
}

#[derive(Debug)]
pub enum StopReason {
    /// Operator asked to stop
    Interrupted,
    /// The log could not be read any more
    Failed(anyhow::Error),
}

#[derive(Debug)]
pub struct StopReport {
    pub reason: StopReason,
    pub stopped_at: DateTime<Utc>,
    pub stats: MonitorStats,
}

/// Call monitor over one softphone log
pub struct CallMonitor {
    settings: MonitorSettings,
    tail: LogTail,
    matcher: CallMatcher,
    dedupe: DedupeWindow,
    publisher: Arc<dyn CallPublisher>,
    state: MonitorState,
    stats: MonitorStats,
}

impl CallMonitor {
    /// Open the log at its current end and start watching
    pub fn start(
        log_path: &Path,
        settings: MonitorSettings,
        matcher: CallMatcher,
        publisher: Arc<dyn CallPublisher>,
    ) -> Result<Self> {
        let tail = LogTail::open_at_end(log_path)?;
        let dedupe = DedupeWindow::new(settings.bucket_secs, settings.retention_buckets);

        info!(
            "Watching {} from byte {} (poll every {:?})",
            log_path.display(),
            tail.position().offset,
            settings.poll_interval
        );

        Ok(Self {
            settings,
            tail,
            matcher,
            dedupe,
            publisher,
            state: MonitorState::Watching,
            stats: MonitorStats::default(),
        })
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn log_path(&self) -> &Path {
        self.tail.path()
    }

    /// Drain all new lines once, using the wall clock for dedupe and timestamps
    pub async fn poll(&mut self) -> Result<PollReport> {
        self.poll_at(Utc::now()).await
    }

    /// Drain all new lines once as if the current time were `now`.
    ///
    /// When the log has nothing new its size is checked for rotation; after a
    /// rotation the new file is read from the start within the same poll.
    pub async fn poll_at(&mut self, now: DateTime<Utc>) -> Result<PollReport> {
        let mut report = PollReport::default();

        loop {
            match self.tail.next_line()? {
                Some(line) => {
                    report.lines_read += 1;
                    self.handle_line(&line, now, &mut report).await;
                }
                None if !report.rotated && self.tail.check_rotation()? => {
                    println!("🔄 Log file was reset, reading it from the start");
                    report.rotated = true;
                }
                None => break,
            }
        }

        self.stats.absorb(&report);
        Ok(report)
    }

    async fn handle_line(&mut self, line: &str, now: DateTime<Utc>, report: &mut PollReport) {
        let Some(caller) = self.matcher.match_line(line) else {
            return;
        };
        report.detected += 1;

        if self.dedupe.check(&caller, now) == Verdict::Suppress {
            debug!("Suppressed repeated call from {}", caller);
            report.suppressed += 1;
            return;
        }

        let classification = match self.publisher.lookup(&caller).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!("Customer lookup for {} failed, treating as new: {:#}", caller, e);
                Classification::New
            }
        };

        let event = CallEvent::new(caller, self.settings.called.clone(), now, classification);
        announce(&event);

        match self.publisher.publish(&event).await {
            Ok(()) => {
                info!("Published call from {}", event.caller);
                report.published += 1;
            }
            Err(e) => {
                error!("Failed to publish call from {}: {:#}", event.caller, e);
                report.publish_failed += 1;
            }
        }
    }

    /// Poll forever; only returns on a read failure
    async fn watch(&mut self) -> Result<Infallible> {
        loop {
            let report = self.poll().await?;
            if report.lines_read == 0 {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }
    }

    /// Watch until `shutdown` resolves or the log becomes unreadable
    pub async fn run_until<F>(&mut self, shutdown: F) -> StopReport
    where
        F: Future<Output = ()>,
    {
        let reason = tokio::select! {
            result = self.watch() => match result {
                Ok(never) => match never {},
                Err(e) => StopReason::Failed(e),
            },
            _ = shutdown => StopReason::Interrupted,
        };

        self.state = MonitorState::Stopped;
        let report = StopReport {
            reason,
            stopped_at: Utc::now(),
            stats: self.stats,
        };

        match &report.reason {
            StopReason::Interrupted => info!("Monitor stopped by operator"),
            StopReason::Failed(e) => error!("Monitor stopped: {:#}", e),
        }
        report
    }
}

fn announce(event: &CallEvent) {
    let local: DateTime<Local> = event.timestamp.into();
    println!("📞 Incoming call from {}", event.caller);
    println!("   at {}", local.format("%d.%m.%Y %H:%M:%S"));
    match event.classification.customer() {
        Some(customer) => println!("   known customer: {}", customer.name),
        None => println!("   new customer"),
    }
}
