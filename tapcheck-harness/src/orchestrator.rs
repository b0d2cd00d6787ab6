// Orchestrator Module
//
// INTENTION:
// Sequence one conformance run as an explicit state machine:
//
//   Bootstrap -> Running -> Teardown -> Draining -> Verifying
//                                          ^            |
//                                          +-- pass 1 --+
//                                                       | pass 2
//                                                       v
//                                                    Terminal
//
// Each `tick()` does a bounded amount of work and tells the driver how long
// to wait before the next one. All handler invocations happen inside the
// substrate polls made by the ticks, so the whole run is a single logical
// loop. The first listing check runs while traffic is flowing; the two
// post-teardown checks each follow a settle wait.
//
// With at least one peer, the first peer also takes the subscriber role and
// taps every publisher address from its own process.

use std::sync::Arc;
use std::time::Duration;
use tapcheck_common::logging::{Component, Logger};
use tapcheck_common::types::{TapMode, TypeSignature};
use tapcheck_common::{log_debug, log_error, log_info};
use tapcheck_node::{Hub, PollStats, Substrate};
use tokio::time::Instant;

use crate::address_space::{AddressSpace, METHOD_TYPES};
use crate::config::HarnessConfig;
use crate::convergence::{CheckpointReport, ConvergenceChecker, Expectation};
use crate::dispatcher::{
    expected_copy_count, expected_primary_count, CopyHandler, MessageDispatcher, PrimaryHandler,
};
use crate::error::{violation, HarnessError, Result};
use crate::properties::PropertyLedger;
use crate::subscriber::SubscriberRole;
use crate::tap_registry::TapRegistry;

/// Properties attached to the first publisher service at startup
pub const INITIAL_PROPERTIES: [(&str, &str); 3] = [
    ("attr_unistr", "value_unistr"),
    ("attr1", "value1"),
    ("norwegian", "Blåbærsyltetøy"),
];

/// Process id of the publishing process in simulated runs
pub const PUBLISHER_ID: &str = "unipub";

/// Post-teardown listing checks
const VERIFY_PASSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Bootstrap,
    Running,
    Teardown,
    Draining,
    Verifying,
    Terminal,
}

/// Result of one `tick()`
#[derive(Debug)]
pub enum Tick {
    /// Call `tick()` again after this delay
    Continue(Duration),
    /// The run passed every check
    Done(RunReport),
}

/// Summary of a passed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub primary_count: i64,
    pub copy_count: i64,
    pub sentinels: usize,
    pub messages_sent: u64,
    /// Final counter of each subscriber tapper; empty without peers
    pub subscriber_counts: Vec<(String, i64)>,
    pub checkpoints: Vec<CheckpointReport>,
    pub stats: PollStats,
}

pub struct TestOrchestrator {
    config: HarnessConfig,
    publisher: Arc<dyn Substrate>,
    pub_space: AddressSpace,
    sub_space: AddressSpace,
    fan_out: i64,
    primary: Arc<PrimaryHandler>,
    copy: Arc<CopyHandler>,
    dispatcher: MessageDispatcher,
    ledger: PropertyLedger,
    taps: TapRegistry,
    subscriber: Option<SubscriberRole>,
    checker: ConvergenceChecker,
    phase: Phase,
    run_deadline: Option<Instant>,
    settle_deadline: Option<Instant>,
    checkpoints: Vec<CheckpointReport>,
    verify_passes: usize,
    stats: PollStats,
    finished: bool,
    logger: Logger,
}

impl TestOrchestrator {
    /// Validate the configuration and prepare a run; nothing is created on
    /// the substrate until the first tick
    pub fn new(
        config: HarnessConfig,
        publisher: Arc<dyn Substrate>,
        peers: Vec<Arc<dyn Substrate>>,
    ) -> Result<Self> {
        config.validate()?;
        let logger = Logger::new_root(Component::Harness, publisher.process_id());

        let count = usize::try_from(config.fan_out)
            .map_err(|_| HarnessError::Config(format!("fan_out {} is out of range", config.fan_out)))?;
        let pub_space = AddressSpace::new(config.pub_prefix.clone(), count)?;
        let sub_space = AddressSpace::new(config.sub_prefix.clone(), count)?;
        let subscriber = peers
            .first()
            .map(|peer| SubscriberRole::new(peer.clone(), &config))
            .transpose()?;

        let mut observers = Vec::with_capacity(peers.len() + 1);
        observers.push(publisher.clone());
        observers.extend(peers);
        let checker = ConvergenceChecker::new(observers, config.poll_quantum(), &logger)?;

        Ok(Self {
            fan_out: config.fan_out,
            primary: Arc::new(PrimaryHandler::new(&logger)),
            copy: Arc::new(CopyHandler::new(config.fan_out, &logger)),
            dispatcher: MessageDispatcher::new(pub_space.clone(), config.max_msg_count, &logger),
            ledger: PropertyLedger::new(&logger),
            taps: TapRegistry::new(&logger),
            subscriber,
            checker,
            pub_space,
            sub_space,
            publisher,
            config,
            phase: Phase::Bootstrap,
            run_deadline: None,
            settle_deadline: None,
            checkpoints: Vec::new(),
            verify_passes: 0,
            stats: PollStats::default(),
            finished: false,
            logger,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn primary(&self) -> &PrimaryHandler {
        &self.primary
    }

    pub fn copy(&self) -> &CopyHandler {
        &self.copy
    }

    pub fn subscriber(&self) -> Option<&SubscriberRole> {
        self.subscriber.as_ref()
    }

    /// Drive the run to completion
    pub async fn run(&mut self) -> Result<RunReport> {
        loop {
            match self.tick().await {
                Ok(Tick::Continue(delay)) => {
                    if !delay.is_zero() {
                        self.publisher.sleep(delay).await;
                    }
                }
                Ok(Tick::Done(report)) => return Ok(report),
                Err(e) => {
                    log_error!(self.logger, "Run failed in {:?}: {e}", self.phase);
                    return Err(e);
                }
            }
        }
    }

    /// Advance the state machine by one step
    pub async fn tick(&mut self) -> Result<Tick> {
        if self.finished {
            return Err(HarnessError::Config("run already finished".to_string()));
        }
        match self.phase {
            Phase::Bootstrap => {
                self.bootstrap().await?;
                self.run_deadline = Some(self.publisher.now() + self.config.max_run());
                self.phase = Phase::Running;
                Ok(Tick::Continue(Duration::ZERO))
            }
            Phase::Running => self.running().await,
            Phase::Teardown => {
                self.teardown().await?;
                self.settle_deadline = Some(self.publisher.now() + self.config.settle());
                self.phase = Phase::Draining;
                Ok(Tick::Continue(Duration::ZERO))
            }
            Phase::Draining => {
                self.poll().await?;
                let due = self
                    .settle_deadline
                    .map_or(true, |deadline| self.publisher.now() >= deadline);
                if due {
                    self.phase = Phase::Verifying;
                    return Ok(Tick::Continue(Duration::ZERO));
                }
                Ok(Tick::Continue(self.config.poll_quantum()))
            }
            Phase::Verifying => {
                self.verify_passes += 1;
                let label = format!("after teardown #{}", self.verify_passes);
                let report = self
                    .checker
                    .check_now(&label, &self.final_expectations())
                    .await?;
                self.checkpoints.push(report);
                if self.verify_passes < VERIFY_PASSES {
                    self.settle_deadline = Some(self.publisher.now() + self.config.settle());
                    self.phase = Phase::Draining;
                } else {
                    self.phase = Phase::Terminal;
                }
                Ok(Tick::Continue(Duration::ZERO))
            }
            Phase::Terminal => {
                let report = self.terminal().await?;
                self.finished = true;
                Ok(Tick::Done(report))
            }
        }
    }

    async fn bootstrap(&mut self) -> Result<()> {
        let publisher = self.publisher.clone();
        let types = TypeSignature::parse(METHOD_TYPES).map_err(|e| HarnessError::Config(e.to_string()))?;
        log_info!(
            self.logger,
            "Starting run: fan-out {}, {} messages, listing check at {}",
            self.fan_out,
            self.config.total_messages(),
            self.config.listing_threshold()
        );

        for index in 0..self.pub_space.len() {
            let service = self.pub_space.service(index);
            publisher.create_service(&service).await?;
            publisher
                .bind_method(
                    &self.pub_space.method_path(index),
                    types.clone(),
                    self.primary.clone(),
                )
                .await?;
        }

        let tappee = self.pub_space.service(0);
        for (key, value) in INITIAL_PROPERTIES {
            self.ledger.set(publisher.as_ref(), &tappee, key, value).await?;
        }

        // the tap is created before its tapper service exists
        let tapper = self.sub_space.service(0);
        self.taps
            .create_tap(publisher.as_ref(), &tappee, &tapper, TapMode::Reliable)
            .await?;
        publisher.create_service(&tapper).await?;
        publisher
            .bind_method(&self.sub_space.method_path(0), types.clone(), self.copy.clone())
            .await?;

        if let Some(subscriber) = self.subscriber.as_mut() {
            log_info!(self.logger, "Subscriber role on {}", subscriber.process_id());
            subscriber.bootstrap(&types).await?;
        }

        publisher.set_clock_master().await?;
        Ok(())
    }

    async fn running(&mut self) -> Result<Tick> {
        self.poll().await?;

        if let Some(value) = self.dispatcher.send_next(self.publisher.as_ref()).await? {
            if self.dispatcher.sent() == self.config.listing_threshold() {
                log_debug!(self.logger, "Listing check after sending {value}");
                let report = self
                    .checker
                    .check_now("during traffic", &self.traffic_expectations())
                    .await?;
                self.checkpoints.push(report);
            }
        }

        if self.dispatcher.is_finished() && self.primary.stream_ended() {
            log_info!(
                self.logger,
                "Stream complete: {} sent, primary count {}",
                self.dispatcher.sent(),
                self.primary.count()
            );
            self.phase = Phase::Teardown;
            return Ok(Tick::Continue(Duration::ZERO));
        }

        let expired = self
            .run_deadline
            .is_some_and(|deadline| self.publisher.now() >= deadline);
        if expired {
            return Err(violation(format!(
                "sentinel not received within {:?}: sent {}, primary count {}",
                self.config.max_run(),
                self.dispatcher.sent(),
                self.primary.count()
            )));
        }
        Ok(Tick::Continue(self.config.poll_quantum()))
    }

    async fn teardown(&mut self) -> Result<()> {
        let publisher = self.publisher.clone();
        self.taps.remove_all(publisher.as_ref()).await?;
        if let Some(subscriber) = self.subscriber.as_mut() {
            subscriber.teardown().await?;
        }
        self.ledger
            .remove_all(publisher.as_ref(), &self.pub_space.service(0))
            .await?;
        log_info!(self.logger, "Teardown requested, settling for {:?}", self.config.settle());
        Ok(())
    }

    async fn terminal(&mut self) -> Result<RunReport> {
        let primary_expected = expected_primary_count(self.config.max_msg_count);
        if self.primary.count() != primary_expected {
            return Err(violation(format!(
                "primary count is {}, expected {primary_expected}",
                self.primary.count()
            )));
        }
        if self.primary.sentinels() != 1 {
            return Err(violation(format!(
                "sentinel observed {} times",
                self.primary.sentinels()
            )));
        }
        let copy_expected = expected_copy_count(self.fan_out, self.config.max_msg_count);
        if self.copy.count() != copy_expected {
            return Err(violation(format!(
                "copy count is {}, expected {copy_expected}",
                self.copy.count()
            )));
        }
        if let Some(subscriber) = &self.subscriber {
            subscriber.verify_counts()?;
        }
        let subscriber_counts = self
            .subscriber
            .as_ref()
            .map(SubscriberRole::copy_counts)
            .unwrap_or_default();

        for observer in self.checker.observers() {
            observer.finish().await?;
        }
        log_info!(
            self.logger,
            "Run passed: primary {primary_expected}, copy {copy_expected}, {} checkpoints",
            self.checkpoints.len()
        );

        Ok(RunReport {
            primary_count: self.primary.count(),
            copy_count: self.copy.count(),
            sentinels: self.primary.sentinels(),
            messages_sent: self.dispatcher.sent(),
            subscriber_counts,
            checkpoints: std::mem::take(&mut self.checkpoints),
            stats: self.stats,
        })
    }

    async fn poll(&mut self) -> Result<()> {
        let stats = self.checker.poll_all().await?;
        self.stats.merge(stats);
        Ok(())
    }

    /// Expectations while the taps are in place
    fn traffic_expectations(&self) -> Vec<Expectation> {
        let tappee = self.pub_space.service(0);
        let mut expectations = vec![Expectation::TapPresent {
            tappee,
            tapper: self.sub_space.service(0),
        }];
        match &self.subscriber {
            Some(subscriber) => expectations.extend(subscriber.traffic_expectations()),
            None => expectations.extend(self.pub_space.services().skip(1).map(|name| {
                Expectation::NotATap {
                    name,
                    must_exist: true,
                }
            })),
        }
        expectations.push(Expectation::NotATap {
            name: self.sub_space.service(0),
            must_exist: true,
        });
        expectations.extend(self.ledger.expectations());
        expectations
    }

    /// Expectations once the taps and the properties are gone: every
    /// publisher and tapper service is listed plain
    fn final_expectations(&self) -> Vec<Expectation> {
        let mut names: Vec<String> = self.pub_space.services().collect();
        names.push(self.sub_space.service(0));
        if let Some(subscriber) = &self.subscriber {
            names.extend(subscriber.services().map(str::to_string));
        }
        let mut expectations: Vec<Expectation> = names
            .into_iter()
            .map(|name| Expectation::NotATap {
                name,
                must_exist: true,
            })
            .collect();
        expectations.extend(self.ledger.expectations());
        expectations
    }
}

/// Peer process ids of a simulated run
pub fn peer_ids(peers: usize) -> Vec<String> {
    (0..peers)
        .map(|i| {
            if i == 0 {
                "unisub".to_string()
            } else {
                format!("unisub{i}")
            }
        })
        .collect()
}

/// Run the whole protocol against a fresh simulated substrate
pub async fn run_simulated(config: HarnessConfig) -> Result<RunReport> {
    config.validate()?;
    let hub = Hub::new(config.hub_config());
    let publisher: Arc<dyn Substrate> = Arc::new(hub.attach(PUBLISHER_ID).await?);
    let mut peers: Vec<Arc<dyn Substrate>> = Vec::with_capacity(config.peers);
    for id in peer_ids(config.peers) {
        peers.push(Arc::new(hub.attach(&id).await?));
    }
    TestOrchestrator::new(config, publisher, peers)?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_ids() {
        assert_eq!(peer_ids(0), Vec::<String>::new());
        assert_eq!(peer_ids(3), vec!["unisub", "unisub1", "unisub2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_creates_nothing() {
        let hub = Hub::default();
        let publisher = Arc::new(hub.attach(PUBLISHER_ID).await.unwrap());
        let result = TestOrchestrator::new(
            HarnessConfig::default().with_fan_out(0),
            publisher.clone(),
            Vec::new(),
        );
        assert!(matches!(result, Err(HarnessError::Config(_))));
        assert!(publisher.list_services().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_phases_advance_in_order() {
        let hub = Hub::default();
        let publisher = Arc::new(hub.attach(PUBLISHER_ID).await.unwrap());
        let config = HarnessConfig::default()
            .with_max_msg_count(4)
            .with_settle_ms(100);
        let mut orchestrator = TestOrchestrator::new(config, publisher, Vec::new()).unwrap();

        let mut seen = vec![orchestrator.phase()];
        let report = loop {
            match orchestrator.tick().await.unwrap() {
                Tick::Continue(delay) => tokio::time::sleep(delay).await,
                Tick::Done(report) => break report,
            }
            if seen.last() != Some(&orchestrator.phase()) {
                seen.push(orchestrator.phase());
            }
        };

        assert_eq!(
            seen,
            vec![
                Phase::Bootstrap,
                Phase::Running,
                Phase::Teardown,
                Phase::Draining,
                Phase::Verifying,
                Phase::Draining,
                Phase::Verifying,
                Phase::Terminal,
            ]
        );
        assert_eq!(report.primary_count, 5);
        assert_eq!(report.copy_count, 6);
        assert_eq!(report.checkpoints.len(), 3);
        assert!(orchestrator.tick().await.is_err());
    }
}
