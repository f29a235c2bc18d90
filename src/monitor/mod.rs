//! Incoming call detection from the softphone log
//!
//! [`LogTail`] hands out new lines, [`CallMatcher`] picks the caller out of
//! them, [`DedupeWindow`] drops repeats and [`CallMonitor`] ties it together
//! with a publisher.

pub mod dedupe;
pub mod event;
pub mod matcher;
pub mod runner;
pub mod tail;

pub use dedupe::{DedupeKey, DedupeWindow, Verdict};
pub use event::{CallEvent, Classification, CustomerProfile, RideSummary};
pub use matcher::{CallMatcher, CallPattern, CallerId};
pub use runner::{
    CallMonitor, MonitorSettings, MonitorState, MonitorStats, PollReport, StopReason, StopReport,
};
pub use tail::{LogPosition, LogTail};
