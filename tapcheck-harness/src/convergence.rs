// Convergence Module
//
// INTENTION:
// Decide when the registry has converged. The checker keeps polling every
// observer for a fixed settle duration, then takes a fresh listing from each
// one and evaluates the same set of expectations against all of them.
// Staleness before the settle wait is expected and never an error; a failed
// expectation after it is a protocol violation.

use std::sync::Arc;
use std::time::Duration;
use tapcheck_common::logging::{Component, Logger};
use tapcheck_common::types::{PropertyList, ServiceListing};
use tapcheck_common::{log_debug, log_error, log_info};
use tapcheck_node::{PollStats, Substrate};

use crate::error::{violation, HarnessError, Result};
use crate::tap_registry::{assert_not_a_tap, assert_tap_present, log_listing};

/// A condition evaluated against one listing
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// `name` is listed as a plain service (or, without `must_exist`, not at all)
    NotATap { name: String, must_exist: bool },
    /// `tappee` keeps its plain entry and a separate entry carries the tap
    TapPresent { tappee: String, tapper: String },
    /// `service` lists exactly these properties
    Properties {
        service: String,
        expected: PropertyList,
    },
    /// `service`, if listed, carries no properties
    NoProperties { service: String },
}

impl Expectation {
    pub fn check(&self, listing: &ServiceListing) -> Result<()> {
        match self {
            Expectation::NotATap { name, must_exist } => {
                assert_not_a_tap(listing, name, *must_exist)
            }
            Expectation::TapPresent { tappee, tapper } => {
                assert_tap_present(listing, tappee, tapper)
            }
            Expectation::Properties { service, expected } => {
                let Some(entry) = listing.plain_entry(service) else {
                    return Err(violation(format!(
                        "{service} is not listed, expected properties {}",
                        expected.encode()
                    )));
                };
                let listed = entry.property_list().map_err(|e| {
                    violation(format!("{service}: unreadable properties: {e}"))
                })?;
                if listed.len() != expected.len() {
                    return Err(violation(format!(
                        "{service}: listed properties {} but expected {}",
                        entry.properties,
                        expected.encode()
                    )));
                }
                for (key, value) in expected.iter() {
                    match listed.get(key) {
                        Some(actual) if actual.as_bytes() == value.as_bytes() => {}
                        Some(actual) => {
                            return Err(violation(format!(
                                "{service}: property {key} is '{actual}', expected '{value}'"
                            )));
                        }
                        None => {
                            return Err(violation(format!(
                                "{service}: property {key} is missing"
                            )));
                        }
                    }
                }
                Ok(())
            }
            Expectation::NoProperties { service } => {
                for entry in listing.entries_named(service).filter(|e| !e.is_tap()) {
                    let listed = entry.property_list().map_err(|e| {
                        violation(format!("{service}: unreadable properties: {e}"))
                    })?;
                    if !listed.is_empty() {
                        return Err(violation(format!(
                            "{service}: stale properties {}",
                            entry.properties
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Outcome of one listing check across all observers
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointReport {
    pub label: String,
    pub observers: usize,
    pub expectations: usize,
    /// Listing length seen by each observer, in observer order
    pub entries: Vec<usize>,
}

pub struct ConvergenceChecker {
    observers: Vec<Arc<dyn Substrate>>,
    quantum: Duration,
    logger: Logger,
}

impl ConvergenceChecker {
    pub fn new(observers: Vec<Arc<dyn Substrate>>, quantum: Duration, logger: &Logger) -> Result<Self> {
        if observers.is_empty() {
            return Err(HarnessError::Config(
                "convergence checks need at least one observer".to_string(),
            ));
        }
        Ok(Self {
            observers,
            quantum,
            logger: logger.with_component(Component::Convergence),
        })
    }

    pub fn observers(&self) -> &[Arc<dyn Substrate>] {
        &self.observers
    }

    /// One poll step on every observer
    pub async fn poll_all(&self) -> Result<PollStats> {
        let mut stats = PollStats::default();
        for observer in &self.observers {
            stats.merge(observer.poll().await?);
        }
        Ok(stats)
    }

    /// Keep polling for `duration`, sleeping one quantum between steps
    pub async fn run_for(&self, duration: Duration) -> Result<PollStats> {
        let clock = &self.observers[0];
        let deadline = clock.now() + duration;
        let mut stats = PollStats::default();
        loop {
            stats.merge(self.poll_all().await?);
            if clock.now() >= deadline {
                break;
            }
            clock.sleep(self.quantum).await;
        }
        log_debug!(self.logger, "Ran for {duration:?}: {stats:?}");
        Ok(stats)
    }

    /// Evaluate `expectations` against a fresh listing from every observer
    pub async fn check_now(&self, label: &str, expectations: &[Expectation]) -> Result<CheckpointReport> {
        let mut entries = Vec::with_capacity(self.observers.len());
        for observer in &self.observers {
            let listing = observer.list_services().await?;
            let logger = self.logger.with_message_path(observer.process_id());
            log_listing(&logger, &listing);
            for expectation in expectations {
                if let Err(e) = expectation.check(&listing) {
                    log_error!(
                        logger,
                        "Checkpoint '{label}' failed on {}: {e}",
                        observer.process_id()
                    );
                    return Err(e);
                }
            }
            entries.push(listing.len());
        }
        log_info!(
            self.logger,
            "Checkpoint '{label}' passed on {} observers ({} expectations)",
            self.observers.len(),
            expectations.len()
        );
        Ok(CheckpointReport {
            label: label.to_string(),
            observers: self.observers.len(),
            expectations: expectations.len(),
            entries,
        })
    }

    /// Poll for `duration`, then check every observer
    pub async fn wait_until_settled(
        &self,
        duration: Duration,
        label: &str,
        expectations: &[Expectation],
    ) -> Result<(PollStats, CheckpointReport)> {
        let stats = self.run_for(duration).await?;
        let report = self.check_now(label, expectations).await?;
        Ok((stats, report))
    }
}
