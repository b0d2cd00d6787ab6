// Test utilities for tapcheck crates
//
// This crate provides fixtures shared by the integration tests: simulated hubs
// and processes, the harness payload shape, and a handler that records what it
// receives. All functions in this crate are for testing only.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tapcheck_common::logging::{LogLevel, LoggingConfig};
use tapcheck_common::types::{Arg, Message, TypeSignature};
use tapcheck_node::{HandlerOutcome, Hub, HubConfig, MessageHandler, SimNode};

/// Upper bound for a single test, in virtual time when the clock is paused
pub const TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Install a quiet logger; `TAPCHECK_TEST_LOG=debug` turns the output up
pub fn init_test_logging() {
    let level = std::env::var("TAPCHECK_TEST_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LogLevel::Warn);
    LoggingConfig::new()
        .with_default_level(level)
        .with_timestamps(false)
        .apply();
}

/// Hub with the given tap propagation delay and no jitter
pub fn create_test_hub(propagation_delay_ms: u64) -> Hub {
    Hub::new(
        HubConfig::default().with_tap_propagation_delay(Duration::from_millis(propagation_delay_ms)),
    )
}

/// Hub whose deferred changes get up to `jitter_ms` of seeded extra delay
pub fn create_jittered_hub(propagation_delay_ms: u64, jitter_ms: u64, seed: u64) -> Hub {
    Hub::new(
        HubConfig::default()
            .with_tap_propagation_delay(Duration::from_millis(propagation_delay_ms))
            .with_propagation_jitter(Duration::from_millis(jitter_ms), seed),
    )
}

/// Attach one simulated process per id
pub async fn attach_nodes(hub: &Hub, ids: &[&str]) -> Result<Vec<SimNode>> {
    let mut nodes = Vec::with_capacity(ids.len());
    for id in ids {
        nodes.push(hub.attach(id).await?);
    }
    Ok(nodes)
}

/// The harness method signature: string, symbol, int32
pub fn unistr_types() -> TypeSignature {
    TypeSignature::parse("sSi").expect("valid signature")
}

/// Arguments in the harness payload shape
pub fn unistr_args(value: i32) -> Vec<Arg> {
    vec![
        Arg::String("unistr".to_string()),
        Arg::Symbol("unistr".to_string()),
        Arg::Int32(value),
    ]
}

/// Handler that keeps every message it receives
#[derive(Default)]
pub struct RecordingHandler {
    received: Mutex<Vec<Message>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.received.lock().expect("recording lock").clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().expect("recording lock").len()
    }

    /// Integer payloads in receive order
    pub fn values(&self) -> Vec<i32> {
        self.messages()
            .iter()
            .filter_map(|msg| msg.args.last().and_then(Arg::as_i32))
            .collect()
    }
}

impl MessageHandler for RecordingHandler {
    fn on_receive(&self, msg: &Message) -> anyhow::Result<HandlerOutcome> {
        self.received
            .lock()
            .map_err(|_| anyhow::anyhow!("recording lock poisoned"))?
            .push(msg.clone());
        Ok(HandlerOutcome::Continue)
    }
}

/// Handler that fails on every message
pub struct FailingHandler;

impl MessageHandler for FailingHandler {
    fn on_receive(&self, msg: &Message) -> anyhow::Result<HandlerOutcome> {
        anyhow::bail!("refusing {}", msg.address)
    }
}
