//! Delivery of call events to the dispatch app
//!
//! The monitor only talks to [`CallPublisher`]. The Firebase implementation
//! writes the popup record the taxi app listens on; the console one prints it.

pub mod console;
pub mod firebase;
pub mod protocol;

use anyhow::Result;
use async_trait::async_trait;

use crate::monitor::{CallEvent, CallerId, Classification};

pub use console::ConsolePublisher;
pub use firebase::{FirebaseCredentials, FirebasePublisher};
pub use protocol::{CallHistoryRecord, CallPopupRecord};

/// Sink for accepted calls
#[async_trait]
pub trait CallPublisher: Send + Sync {
    /// Look up whether the caller is a known customer.
    ///
    /// Best effort: callers fall back to [`Classification::New`] on error.
    async fn lookup(&self, caller: &CallerId) -> Result<Classification>;

    /// Deliver one call event. Called once per event, never retried.
    async fn publish(&self, event: &CallEvent) -> Result<()>;
}
