// Substrate Module
//
// INTENTION:
// Define the narrow set of operations the harness needs from a messaging
// substrate: services, methods, properties, taps, listing, sending and a
// non-blocking poll step. The harness only talks to this trait, so any
// substrate can be put under test; the simulated one lives in `node`.
//
// Handlers run to completion inside `poll()` on the caller's task. A handler
// failure stops the poll and is returned as `SubstrateError::Handler`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tapcheck_common::types::{Arg, Message, ServiceListing, TapMode, TypeSignature};
use tokio::time::Instant;

use crate::error::SubstrateError;

/// What a handler reports back after accepting a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Message accepted, stream continues
    Continue,
    /// The terminal sentinel was received
    StreamEnd,
}

/// Receiver bound to a method path
///
/// Implementors own their state; the substrate only holds a shared reference.
pub trait MessageHandler: Send + Sync {
    fn on_receive(&self, msg: &Message) -> anyhow::Result<HandlerOutcome>;
}

/// Counters for one `poll()` step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Messages handed to a handler
    pub delivered: usize,
    /// Tap copies forwarded to a tapper
    pub copies_forwarded: usize,
    /// Messages whose arguments did not match the bound signature
    pub rejected: usize,
    /// Messages with no service or method to receive them
    pub dropped: usize,
    /// Handlers that reported the stream end
    pub stream_ends: usize,
    /// Deferred registry changes that became visible during this step
    pub propagated: usize,
}

impl PollStats {
    pub fn merge(&mut self, other: PollStats) {
        self.delivered += other.delivered;
        self.copies_forwarded += other.copies_forwarded;
        self.rejected += other.rejected;
        self.dropped += other.dropped;
        self.stream_ends += other.stream_ends;
        self.propagated += other.propagated;
    }
}

/// Operations exposed by a messaging substrate
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Identifier of the process this handle acts as
    fn process_id(&self) -> &str;

    async fn create_service(&self, name: &str) -> Result<(), SubstrateError>;

    /// Remove a service; like tap removal this may take effect later
    async fn remove_service(&self, name: &str) -> Result<(), SubstrateError>;

    /// Bind `handler` to a full method path such as `/svc/äta`
    async fn bind_method(
        &self,
        path: &str,
        types: TypeSignature,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), SubstrateError>;

    async fn set_property(&self, service: &str, key: &str, value: &str)
        -> Result<(), SubstrateError>;

    async fn remove_property(&self, service: &str, key: &str) -> Result<(), SubstrateError>;

    async fn create_tap(&self, tappee: &str, tapper: &str, mode: TapMode)
        -> Result<(), SubstrateError>;

    /// Request tap removal. Success means the request was accepted; observers
    /// may keep seeing the tap until the change has propagated.
    async fn remove_tap(&self, tappee: &str, tapper: &str) -> Result<(), SubstrateError>;

    async fn list_services(&self) -> Result<ServiceListing, SubstrateError>;

    async fn send(&self, address: &str, args: Vec<Arg>) -> Result<(), SubstrateError>;

    /// Non-blocking step: deliver pending messages, apply due changes
    async fn poll(&self) -> Result<PollStats, SubstrateError>;

    /// Elect this process as the timing reference
    async fn set_clock_master(&self) -> Result<(), SubstrateError>;

    /// Release every service this process owns
    async fn finish(&self) -> Result<(), SubstrateError>;

    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
