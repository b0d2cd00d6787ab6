// Hub Module
//
// INTENTION:
// The hub is the shared medium the simulated processes are attached to. It
// owns the registry, one inbox per process, and the queue of deferred registry
// changes. A process gets a `SimNode` handle from the hub and performs every
// substrate operation through it.
//
// Tap removal and service removal are deferred: they are queued with a due
// time (propagation delay plus optional seeded jitter) and applied by the
// first `poll()` on any process after that time. Until then every observer,
// including the process that asked for the removal, still lists the old state
// and taps keep copying. Everything else becomes visible immediately.

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tapcheck_common::logging::{Component, Logger};
use tapcheck_common::types::Message;
use tapcheck_common::{log_debug, log_info};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::SubstrateError;
use crate::node::SimNode;
use crate::registry::{ServiceRegistry, TapRecord};

/// Propagation behaviour of the simulated substrate
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Time before a tap or service removal becomes visible
    pub tap_propagation_delay: Duration,
    /// Upper bound of extra random delay added to each deferred change
    pub propagation_jitter: Duration,
    /// Seed for the jitter RNG
    pub seed: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            tap_propagation_delay: Duration::from_millis(50),
            propagation_jitter: Duration::ZERO,
            seed: 0,
        }
    }
}

impl HubConfig {
    pub fn with_tap_propagation_delay(mut self, delay: Duration) -> Self {
        self.tap_propagation_delay = delay;
        self
    }

    pub fn with_propagation_jitter(mut self, jitter: Duration, seed: u64) -> Self {
        self.propagation_jitter = jitter;
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeferredChange {
    RemoveTap { tappee: String, tapper: String },
    RemoveService { name: String },
}

#[derive(Debug)]
struct Deferred {
    due: Instant,
    change: DeferredChange,
}

pub(crate) struct HubState {
    pub(crate) registry: ServiceRegistry,
    deferred: Vec<Deferred>,
    processes: HashSet<String>,
    finished: HashSet<String>,
    clock_master: Option<String>,
    rng: StdRng,
}

impl HubState {
    pub(crate) fn ensure_running(&self, process: &str) -> Result<(), SubstrateError> {
        if self.finished.contains(process) {
            return Err(SubstrateError::NodeFinished(process.to_string()));
        }
        Ok(())
    }

    pub(crate) fn is_pending(&self, change: &DeferredChange) -> bool {
        self.deferred.iter().any(|d| &d.change == change)
    }

    pub(crate) fn cancel(&mut self, change: &DeferredChange) {
        self.deferred.retain(|d| &d.change != change);
    }

    pub(crate) fn set_clock_master(&mut self, process: &str) {
        self.clock_master = Some(process.to_string());
    }

    pub(crate) fn mark_finished(&mut self, process: &str) {
        self.finished.insert(process.to_string());
        if self.clock_master.as_deref() == Some(process) {
            self.clock_master = None;
        }
    }
}

/// Shared medium connecting simulated processes
#[derive(Clone)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
    inboxes: Arc<DashMap<String, VecDeque<Message>>>,
    config: Arc<HubConfig>,
    logger: Arc<Logger>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let logger = Arc::new(Logger::new_root(Component::Hub, "hub"));
        log_info!(
            logger,
            "Creating hub: tap propagation delay {:?}, jitter {:?}",
            config.tap_propagation_delay,
            config.propagation_jitter
        );
        Self {
            state: Arc::new(Mutex::new(HubState {
                registry: ServiceRegistry::new(),
                deferred: Vec::new(),
                processes: HashSet::new(),
                finished: HashSet::new(),
                clock_master: None,
                rng: StdRng::seed_from_u64(config.seed),
            })),
            inboxes: Arc::new(DashMap::new()),
            config: Arc::new(config),
            logger,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Attach a process with the given id
    pub async fn attach(&self, process_id: &str) -> Result<SimNode, SubstrateError> {
        let mut state = self.state.lock().await;
        if !state.processes.insert(process_id.to_string()) {
            return Err(SubstrateError::NodeExists(process_id.to_string()));
        }
        self.inboxes.insert(process_id.to_string(), VecDeque::new());
        log_info!(self.logger, "Process '{process_id}' attached");
        Ok(SimNode::new(process_id, self.clone()))
    }

    /// Attach a process with a generated id
    pub async fn spawn_node(&self) -> Result<SimNode, SubstrateError> {
        let id = format!("node-{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.attach(&id).await
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().await
    }

    /// Queue a message in a process inbox
    pub(crate) fn enqueue(&self, process_id: &str, msg: Message) {
        self.inboxes
            .entry(process_id.to_string())
            .or_default()
            .push_back(msg);
    }

    /// Take everything currently queued for a process
    pub(crate) fn take_inbox(&self, process_id: &str) -> VecDeque<Message> {
        self.inboxes
            .get_mut(process_id)
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }

    pub(crate) fn drop_inbox(&self, process_id: &str) {
        self.inboxes.remove(process_id);
    }

    /// Queue a registry change to become visible after the propagation delay
    pub(crate) fn defer(&self, state: &mut HubState, change: DeferredChange) {
        let jitter_ms = self.config.propagation_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(state.rng.random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let due = Instant::now() + self.config.tap_propagation_delay + jitter;
        log_debug!(self.logger, "Deferring {change:?} until {due:?}");
        state.deferred.push(Deferred { due, change });
    }

    /// Apply every deferred change that is due; returns how many were applied
    pub(crate) fn apply_due(&self, state: &mut HubState) -> usize {
        let now = Instant::now();
        let (due, pending): (Vec<Deferred>, Vec<Deferred>) =
            std::mem::take(&mut state.deferred)
                .into_iter()
                .partition(|d| d.due <= now);
        state.deferred = pending;

        for deferred in &due {
            match &deferred.change {
                DeferredChange::RemoveTap { tappee, tapper } => {
                    if state.registry.remove_tap(tappee, tapper) {
                        log_info!(self.logger, "Tap {tappee} -> {tapper} removed");
                    }
                }
                DeferredChange::RemoveService { name } => {
                    if state.registry.remove_service(name).is_some() {
                        log_info!(self.logger, "Service {name} removed");
                    }
                }
            }
        }
        due.len()
    }

    /// Number of deferred changes not yet visible
    pub async fn pending_changes(&self) -> usize {
        self.state.lock().await.deferred.len()
    }

    /// Current tap relations, for inspection in tests and diagnostics
    pub async fn taps(&self) -> Vec<TapRecord> {
        self.state.lock().await.registry.taps().to_vec()
    }

    pub async fn clock_master(&self) -> Option<String> {
        self.state.lock().await.clock_master.clone()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
