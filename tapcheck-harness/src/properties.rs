//! Property ledger
//!
//! Forwards property changes to the substrate and remembers what each service
//! should carry afterwards, so the convergence checks can compare the listing
//! against it. Every service that was ever touched stays in the ledger; once
//! its properties are removed it is expected to list none.

use std::collections::BTreeMap;
use tapcheck_common::log_debug;
use tapcheck_common::logging::{Component, Logger};
use tapcheck_common::types::PropertyList;
use tapcheck_node::Substrate;

use crate::convergence::Expectation;
use crate::error::Result;

pub struct PropertyLedger {
    expected: BTreeMap<String, PropertyList>,
    logger: Logger,
}

impl PropertyLedger {
    pub fn new(logger: &Logger) -> Self {
        Self {
            expected: BTreeMap::new(),
            logger: logger.with_component(Component::Custom("Properties")),
        }
    }

    /// Set `key` on `service`, overwriting any previous value
    pub async fn set(
        &mut self,
        substrate: &dyn Substrate,
        service: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        substrate.set_property(service, key, value).await?;
        self.expected
            .entry(service.to_string())
            .or_default()
            .set(key, value);
        log_debug!(self.logger, "{service}: {key}={value}");
        Ok(())
    }

    /// Remove `key` from `service`; removing an absent key is a no-op
    pub async fn remove(&mut self, substrate: &dyn Substrate, service: &str, key: &str) -> Result<()> {
        substrate.remove_property(service, key).await?;
        let removed = self
            .expected
            .entry(service.to_string())
            .or_default()
            .remove(key);
        log_debug!(self.logger, "{service}: removed {key} (present: {removed})");
        Ok(())
    }

    /// Remove every property recorded for `service`
    pub async fn remove_all(&mut self, substrate: &dyn Substrate, service: &str) -> Result<()> {
        let keys: Vec<String> = self
            .expected(service)
            .iter()
            .map(|(k, _)| k.to_string())
            .collect();
        for key in keys {
            self.remove(substrate, service, &key).await?;
        }
        Ok(())
    }

    /// Properties `service` must currently list
    pub fn expected(&self, service: &str) -> PropertyList {
        self.expected.get(service).cloned().unwrap_or_default()
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.expected.keys().map(String::as_str)
    }

    /// True when no touched service is expected to carry properties
    pub fn is_empty(&self) -> bool {
        self.expected.values().all(PropertyList::is_empty)
    }

    /// One expectation per touched service
    pub fn expectations(&self) -> Vec<Expectation> {
        self.expected
            .iter()
            .map(|(service, props)| {
                if props.is_empty() {
                    Expectation::NoProperties {
                        service: service.clone(),
                    }
                } else {
                    Expectation::Properties {
                        service: service.clone(),
                        expected: props.clone(),
                    }
                }
            })
            .collect()
    }
}
