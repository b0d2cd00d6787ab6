//! Tap relations created by the harness and the listing predicates that check
//! them.
//!
//! Listing entries of a tapped service share its name: the service's own plain
//! entry plus one tap entry per tapper. The predicates therefore walk the whole
//! listing instead of stopping at the first entry with a matching name.

use tapcheck_common::logging::{Component, Logger};
use tapcheck_common::types::{ServiceKind, ServiceListing, TapMode};
use tapcheck_common::{log_debug, log_info};
use tapcheck_node::Substrate;

use crate::error::{violation, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapRelation {
    pub tappee: String,
    pub tapper: String,
    pub mode: TapMode,
}

pub struct TapRegistry {
    relations: Vec<TapRelation>,
    logger: Logger,
}

impl TapRegistry {
    pub fn new(logger: &Logger) -> Self {
        Self {
            relations: Vec::new(),
            logger: logger.with_component(Component::Registry),
        }
    }

    pub async fn create_tap(
        &mut self,
        substrate: &dyn Substrate,
        tappee: &str,
        tapper: &str,
        mode: TapMode,
    ) -> Result<()> {
        substrate.create_tap(tappee, tapper, mode).await?;
        if !self
            .relations
            .iter()
            .any(|r| r.tappee == tappee && r.tapper == tapper)
        {
            self.relations.push(TapRelation {
                tappee: tappee.to_string(),
                tapper: tapper.to_string(),
                mode,
            });
        }
        log_info!(self.logger, "Tapping {tappee} with {tapper} ({mode})");
        Ok(())
    }

    /// Request removal; the substrate may apply it later
    pub async fn remove_tap(
        &mut self,
        substrate: &dyn Substrate,
        tappee: &str,
        tapper: &str,
    ) -> Result<()> {
        substrate.remove_tap(tappee, tapper).await?;
        self.relations
            .retain(|r| !(r.tappee == tappee && r.tapper == tapper));
        log_info!(self.logger, "Untapped {tappee} from {tapper}");
        Ok(())
    }

    pub async fn remove_all(&mut self, substrate: &dyn Substrate) -> Result<()> {
        let relations = self.relations.clone();
        for relation in relations {
            self.remove_tap(substrate, &relation.tappee, &relation.tapper)
                .await?;
        }
        Ok(())
    }

    pub fn relations(&self) -> &[TapRelation] {
        &self.relations
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Every entry named `name` must be a plain service without a tapper.
///
/// With `must_exist` at least one such entry has to be listed, otherwise none
/// may be.
pub fn assert_not_a_tap(listing: &ServiceListing, name: &str, must_exist: bool) -> Result<()> {
    let mut found = false;
    let mut index = 0;
    while let Some(entry) = listing.get(index) {
        if entry.name == name {
            if entry.kind == ServiceKind::Tap {
                return Err(violation(format!(
                    "{name} is listed as a tap (entry {index})"
                )));
            }
            if let Some(tapper) = &entry.tapper {
                return Err(violation(format!(
                    "{name} is listed with tapper {tapper} (entry {index})"
                )));
            }
            found = true;
        }
        index += 1;
    }
    if found != must_exist {
        return Err(violation(format!(
            "{name}: must_exist is {must_exist} but found is {found}"
        )));
    }
    Ok(())
}

/// `tappee` keeps exactly one plain entry of its own, and a separate tap
/// entry names `tapper`.
pub fn assert_tap_present(listing: &ServiceListing, tappee: &str, tapper: &str) -> Result<()> {
    let mut plain = 0;
    let mut tapped = false;
    for entry in listing.entries_named(tappee) {
        match entry.kind {
            ServiceKind::Plain if entry.tapper.is_none() => plain += 1,
            ServiceKind::Plain => {
                return Err(violation(format!(
                    "plain entry of {tappee} carries tapper {:?}",
                    entry.tapper
                )));
            }
            ServiceKind::Tap => {
                if entry.tapper.as_deref() == Some(tapper) {
                    tapped = true;
                }
            }
        }
    }
    if plain != 1 {
        return Err(violation(format!(
            "{tappee} should have one plain entry, found {plain}"
        )));
    }
    if !tapped {
        return Err(violation(format!(
            "no tap entry for {tappee} -> {tapper}"
        )));
    }
    Ok(())
}

/// Log every entry of a listing at debug level
pub(crate) fn log_listing(logger: &Logger, listing: &ServiceListing) {
    for (i, entry) in listing.iter().enumerate() {
        log_debug!(
            logger,
            "[{i}] {} {} process={} tapper={:?} properties={}",
            entry.name,
            entry.kind,
            entry.process,
            entry.tapper,
            entry.properties
        );
    }
}
