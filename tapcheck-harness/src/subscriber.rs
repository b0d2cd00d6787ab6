//! Subscriber role of a run
//!
//! The subscriber runs in a peer process and taps every publisher address
//! from there. The publisher already provides `<sub>0` behind its own tap on
//! address 0, so the subscriber provides `<sub>1 .. <sub>N-1` and taps address
//! 0 with `<copy>0` instead. Address 0 then carries two taps created by two
//! processes, and every other address carries one.
//!
//! Each tapper service is bound to a stride-N copy handler starting at its
//! address index, so a lost, duplicated or reordered copy shows up as a count
//! mismatch.

use std::sync::Arc;
use tapcheck_common::logging::{Component, Logger};
use tapcheck_common::types::{TapMode, TypeSignature};
use tapcheck_common::{log_debug, log_info};
use tapcheck_node::Substrate;

use crate::address_space::AddressSpace;
use crate::config::HarnessConfig;
use crate::convergence::Expectation;
use crate::dispatcher::{expected_copy_count_at, CopyHandler};
use crate::error::{violation, HarnessError, Result};
use crate::tap_registry::TapRegistry;

/// One tapper service of the subscriber and the address it mirrors
struct Tapper {
    index: usize,
    tappee: String,
    service: String,
    method_path: String,
    handler: Arc<CopyHandler>,
}

pub struct SubscriberRole {
    substrate: Arc<dyn Substrate>,
    tappers: Vec<Tapper>,
    taps: TapRegistry,
    fan_out: i64,
    max_msg_count: i32,
    logger: Logger,
}

impl SubscriberRole {
    pub fn new(substrate: Arc<dyn Substrate>, config: &HarnessConfig) -> Result<Self> {
        let count = usize::try_from(config.fan_out).map_err(|_| {
            HarnessError::Config(format!("fan_out {} is out of range", config.fan_out))
        })?;
        let pub_space = AddressSpace::new(config.pub_prefix.clone(), count)?;
        let sub_space = AddressSpace::new(config.sub_prefix.clone(), count)?;
        let copy_space = AddressSpace::new(config.copy_prefix.clone(), 1)?;
        let logger = Logger::new_root(Component::Harness, substrate.process_id());

        let tappers = (0..count)
            .map(|index| {
                let (space, slot) = if index == 0 {
                    (&copy_space, 0)
                } else {
                    (&sub_space, index)
                };
                Tapper {
                    index,
                    tappee: pub_space.service(index),
                    service: space.service(slot),
                    method_path: space.method_path(slot),
                    handler: Arc::new(CopyHandler::with_offset(
                        config.fan_out,
                        index as i64,
                        &logger,
                    )),
                }
            })
            .collect();

        Ok(Self {
            substrate,
            tappers,
            taps: TapRegistry::new(&logger),
            fan_out: config.fan_out,
            max_msg_count: config.max_msg_count,
            logger,
        })
    }

    pub fn process_id(&self) -> &str {
        self.substrate.process_id()
    }

    /// Names of the services this role provides
    pub fn services(&self) -> impl Iterator<Item = &str> + '_ {
        self.tappers.iter().map(|t| t.service.as_str())
    }

    /// Create the tapper services and tap every publisher address; the
    /// publisher services must already exist
    pub async fn bootstrap(&mut self, types: &TypeSignature) -> Result<()> {
        let substrate = self.substrate.clone();
        for tapper in &self.tappers {
            substrate.create_service(&tapper.service).await?;
            substrate
                .bind_method(&tapper.method_path, types.clone(), tapper.handler.clone())
                .await?;
            self.taps
                .create_tap(substrate.as_ref(), &tapper.tappee, &tapper.service, TapMode::Reliable)
                .await?;
        }
        log_info!(
            self.logger,
            "Subscriber tapping {} publisher addresses",
            self.tappers.len()
        );
        Ok(())
    }

    /// Request removal of every tap this role created
    pub async fn teardown(&mut self) -> Result<()> {
        let substrate = self.substrate.clone();
        self.taps.remove_all(substrate.as_ref()).await
    }

    /// Expectations while the subscriber's taps are in place
    pub fn traffic_expectations(&self) -> Vec<Expectation> {
        let mut expectations = Vec::with_capacity(self.tappers.len() * 2);
        for tapper in &self.tappers {
            expectations.push(Expectation::TapPresent {
                tappee: tapper.tappee.clone(),
                tapper: tapper.service.clone(),
            });
            expectations.push(Expectation::NotATap {
                name: tapper.service.clone(),
                must_exist: true,
            });
        }
        expectations
    }

    /// Final counter of every tapper service
    pub fn copy_counts(&self) -> Vec<(String, i64)> {
        self.tappers
            .iter()
            .map(|t| (t.service.clone(), t.handler.count()))
            .collect()
    }

    /// Every tapper saw exactly the slots routed to its address
    pub fn verify_counts(&self) -> Result<()> {
        for tapper in &self.tappers {
            let expected =
                expected_copy_count_at(self.fan_out, self.max_msg_count, tapper.index as i64);
            let actual = tapper.handler.count();
            if actual != expected {
                return Err(violation(format!(
                    "{}: copy count is {actual}, expected {expected}",
                    tapper.service
                )));
            }
            log_debug!(self.logger, "{} copy count {actual}", tapper.service);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapcheck_node::Hub;

    #[tokio::test(start_paused = true)]
    async fn test_tappers_skip_publisher_owned_service() {
        let hub = Hub::default();
        let node: Arc<dyn Substrate> = Arc::new(hub.attach("unisub").await.unwrap());
        let role = SubscriberRole::new(node, &HarnessConfig::default().with_fan_out(3)).unwrap();

        let services: Vec<&str> = role.services().collect();
        assert_eq!(services, vec!["copyunistr0", "subunistr1", "subunistr2"]);
        assert_eq!(role.process_id(), "unisub");
        assert!(matches!(
            role.traffic_expectations().first(),
            Some(Expectation::TapPresent { tappee, tapper })
                if tappee == "pubunistr0" && tapper == "copyunistr0"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_checked_per_address() {
        let hub = Hub::default();
        let node: Arc<dyn Substrate> = Arc::new(hub.attach("unisub").await.unwrap());
        let role = SubscriberRole::new(
            node,
            &HarnessConfig::default().with_fan_out(2).with_max_msg_count(0),
        )
        .unwrap();

        // M = 0: nothing reached address 1, but address 0 missed the sentinel
        assert!(role.verify_counts().is_err());
        assert_eq!(
            role.copy_counts(),
            vec![("copyunistr0".to_string(), 0), ("subunistr1".to_string(), 1)]
        );
    }
}
