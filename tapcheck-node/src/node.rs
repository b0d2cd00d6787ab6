// Node Implementation
//
// A SimNode is one simulated process attached to a Hub. It implements the
// Substrate trait: services it creates are owned by it, messages addressed to
// its services are queued in its inbox and delivered when it polls, and tap
// copies are forwarded to the tapper's process at delivery time.

use async_trait::async_trait;
use std::sync::Arc;
use tapcheck_common::logging::{Component, Logger};
use tapcheck_common::types::{split_address, Arg, Message, ServiceListing, TapMode, TypeSignature};
use tapcheck_common::{log_debug, log_error, log_info, log_warn};

use crate::error::SubstrateError;
use crate::hub::{DeferredChange, Hub};
use crate::registry::{MethodBinding, TapRecord};
use crate::substrate::{HandlerOutcome, MessageHandler, PollStats, Substrate};

/// One simulated process
#[derive(Clone)]
pub struct SimNode {
    id: String,
    hub: Hub,
    logger: Arc<Logger>,
}

impl std::fmt::Debug for SimNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNode").field("id", &self.id).finish()
    }
}

impl SimNode {
    pub(crate) fn new(id: &str, hub: Hub) -> Self {
        Self {
            id: id.to_string(),
            hub,
            logger: Arc::new(Logger::new_root(Component::Node, id)),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Deliver one message taken from the inbox
    async fn deliver(&self, msg: Message, stats: &mut PollStats) -> Result<(), SubstrateError> {
        let (service, suffix) = split_address(&msg.address)?;

        let binding = {
            let state = self.hub.lock().await;
            let Some(record) = state.registry.service(service) else {
                log_debug!(self.logger, "Dropping message to vanished service {service}");
                stats.dropped += 1;
                return Ok(());
            };
            if record.owner != self.id {
                log_warn!(
                    self.logger,
                    "Dropping message to {service}, now provided by {}",
                    record.owner
                );
                stats.dropped += 1;
                return Ok(());
            }

            for tap in state.registry.taps_on(service) {
                match state.registry.service(&tap.tapper) {
                    Some(tapper) => {
                        let copy = msg.readdressed(&tap.tapper)?;
                        self.hub.enqueue(&tapper.owner, copy);
                        stats.copies_forwarded += 1;
                    }
                    None => {
                        log_debug!(
                            self.logger,
                            "Tapper {} of {service} does not exist, copy dropped",
                            tap.tapper
                        );
                    }
                }
            }

            record.methods.get(suffix).cloned()
        };

        let Some(binding) = binding else {
            log_warn!(self.logger, "No method bound at {}", msg.address);
            stats.dropped += 1;
            return Ok(());
        };

        if !binding.types.accepts(&msg.args) {
            log_warn!(
                self.logger,
                "Rejecting message to {}: types {} do not match {}",
                msg.address,
                msg.types(),
                binding.types
            );
            stats.rejected += 1;
            return Ok(());
        }

        match binding.handler.on_receive(&msg) {
            Ok(HandlerOutcome::Continue) => {}
            Ok(HandlerOutcome::StreamEnd) => stats.stream_ends += 1,
            Err(e) => {
                log_error!(self.logger, "Handler at {} failed: {e}", msg.address);
                return Err(SubstrateError::Handler {
                    path: msg.address.clone(),
                    source: e,
                });
            }
        }
        stats.delivered += 1;
        Ok(())
    }
}

#[async_trait]
impl Substrate for SimNode {
    fn process_id(&self) -> &str {
        &self.id
    }

    async fn create_service(&self, name: &str) -> Result<(), SubstrateError> {
        let mut state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        state.registry.add_service(name, &self.id)?;
        log_info!(self.logger, "Created service {name}");
        Ok(())
    }

    async fn remove_service(&self, name: &str) -> Result<(), SubstrateError> {
        let mut state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        state.registry.owned_service_mut(name, &self.id)?;
        self.hub.defer(
            &mut state,
            DeferredChange::RemoveService {
                name: name.to_string(),
            },
        );
        log_info!(self.logger, "Requested removal of service {name}");
        Ok(())
    }

    async fn bind_method(
        &self,
        path: &str,
        types: TypeSignature,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), SubstrateError> {
        let (service, suffix) = split_address(path)?;
        let mut state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        state.registry.bind_method(
            service,
            suffix,
            &self.id,
            MethodBinding {
                types: types.clone(),
                handler,
            },
        )?;
        log_info!(self.logger, "Bound {path} with types {types}");
        Ok(())
    }

    async fn set_property(
        &self,
        service: &str,
        key: &str,
        value: &str,
    ) -> Result<(), SubstrateError> {
        let mut state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        let record = state.registry.owned_service_mut(service, &self.id)?;
        record.properties.set(key, value);
        log_debug!(self.logger, "Property {key}={value} set on {service}");
        Ok(())
    }

    async fn remove_property(&self, service: &str, key: &str) -> Result<(), SubstrateError> {
        let mut state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        let record = state.registry.owned_service_mut(service, &self.id)?;
        if record.properties.remove(key) {
            log_debug!(self.logger, "Property {key} removed from {service}");
        } else {
            log_debug!(self.logger, "Property {key} not present on {service}");
        }
        Ok(())
    }

    async fn create_tap(
        &self,
        tappee: &str,
        tapper: &str,
        mode: TapMode,
    ) -> Result<(), SubstrateError> {
        let mut state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        state.cancel(&DeferredChange::RemoveTap {
            tappee: tappee.to_string(),
            tapper: tapper.to_string(),
        });
        let added = state.registry.add_tap(TapRecord {
            tappee: tappee.to_string(),
            tapper: tapper.to_string(),
            mode,
            process: self.id.clone(),
        })?;
        if added {
            log_info!(self.logger, "Tap {tappee} -> {tapper} created ({mode})");
        } else {
            log_debug!(self.logger, "Tap {tappee} -> {tapper} already exists");
        }
        Ok(())
    }

    async fn remove_tap(&self, tappee: &str, tapper: &str) -> Result<(), SubstrateError> {
        let mut state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        let change = DeferredChange::RemoveTap {
            tappee: tappee.to_string(),
            tapper: tapper.to_string(),
        };
        if !state.registry.has_tap(tappee, tapper) || state.is_pending(&change) {
            return Err(SubstrateError::UnknownTap {
                tappee: tappee.to_string(),
                tapper: tapper.to_string(),
            });
        }
        self.hub.defer(&mut state, change);
        log_info!(self.logger, "Requested removal of tap {tappee} -> {tapper}");
        Ok(())
    }

    async fn list_services(&self) -> Result<ServiceListing, SubstrateError> {
        let state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        Ok(state.registry.listing())
    }

    async fn send(&self, address: &str, args: Vec<Arg>) -> Result<(), SubstrateError> {
        let (service, _) = split_address(address)?;
        let state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        let owner = state
            .registry
            .service(service)
            .map(|record| record.owner.clone())
            .ok_or_else(|| SubstrateError::UnknownService(service.to_string()))?;
        self.hub.enqueue(&owner, Message::new(address, args));
        Ok(())
    }

    async fn poll(&self) -> Result<PollStats, SubstrateError> {
        let mut stats = PollStats::default();
        {
            let mut state = self.hub.lock().await;
            state.ensure_running(&self.id)?;
            stats.propagated = self.hub.apply_due(&mut state);
        }

        for msg in self.hub.take_inbox(&self.id) {
            self.deliver(msg, &mut stats).await?;
        }
        Ok(stats)
    }

    async fn set_clock_master(&self) -> Result<(), SubstrateError> {
        let mut state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        state.set_clock_master(&self.id);
        log_info!(self.logger, "Acting as clock master");
        Ok(())
    }

    async fn finish(&self) -> Result<(), SubstrateError> {
        let mut state = self.hub.lock().await;
        state.ensure_running(&self.id)?;
        let owned = state.registry.services_owned_by(&self.id);
        for name in &owned {
            state.registry.remove_service(name);
        }
        let taps = state.registry.remove_taps_created_by(&self.id);
        state.mark_finished(&self.id);
        self.hub.drop_inbox(&self.id);
        log_info!(
            self.logger,
            "Finished: released {} services and {} taps",
            owned.len(),
            taps
        );
        Ok(())
    }
}
