// Service Registry Module
//
// INTENTION:
// Hold the simulated substrate's view of services, bound methods, properties
// and tap relations, and render it as a listing. The registry does not call
// handlers and does not route messages; that is the hub's job. It only answers
// lookups and applies mutations.
//
// Services are kept in a BTreeMap so listings come out in a stable, byte-wise
// name order. Names are used as given, never normalized.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use tapcheck_common::types::{PropertyList, ServiceEntry, ServiceListing, TapMode, TypeSignature};

use crate::error::SubstrateError;
use crate::substrate::MessageHandler;

/// Handler and signature bound to one method path
#[derive(Clone)]
pub struct MethodBinding {
    pub types: TypeSignature,
    pub handler: Arc<dyn MessageHandler>,
}

/// One registered service
#[derive(Clone)]
pub struct ServiceRecord {
    pub owner: String,
    pub methods: HashMap<String, MethodBinding>,
    pub properties: PropertyList,
}

impl ServiceRecord {
    fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            methods: HashMap::new(),
            properties: PropertyList::new(),
        }
    }
}

impl std::fmt::Debug for ServiceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("ServiceRecord")
            .field("owner", &self.owner)
            .field("methods", &methods)
            .field("properties", &self.properties)
            .finish()
    }
}

/// A tap relation as stored by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapRecord {
    pub tappee: String,
    pub tapper: String,
    pub mode: TapMode,
    /// Process that created the tap; the tapper is expected to live there
    pub process: String,
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceRecord>,
    taps: Vec<TapRecord>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&mut self, name: &str, owner: &str) -> Result<(), SubstrateError> {
        if self.services.contains_key(name) {
            return Err(SubstrateError::ServiceExists(name.to_string()));
        }
        self.services
            .insert(name.to_string(), ServiceRecord::new(owner));
        Ok(())
    }

    /// Remove a service and every tap placed on it. Taps where it is the
    /// tapper stay; copies to a missing tapper are dropped at delivery.
    pub fn remove_service(&mut self, name: &str) -> Option<ServiceRecord> {
        let removed = self.services.remove(name);
        if removed.is_some() {
            self.taps.retain(|t| t.tappee != name);
        }
        removed
    }

    pub fn service(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.get(name)
    }

    /// Look up a service that `process` must own
    pub fn owned_service_mut(
        &mut self,
        name: &str,
        process: &str,
    ) -> Result<&mut ServiceRecord, SubstrateError> {
        let record = self
            .services
            .get_mut(name)
            .ok_or_else(|| SubstrateError::UnknownService(name.to_string()))?;
        if record.owner != process {
            return Err(SubstrateError::NotOwner {
                service: name.to_string(),
                owner: record.owner.clone(),
            });
        }
        Ok(record)
    }

    pub fn services_owned_by(&self, process: &str) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, r)| r.owner == process)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn bind_method(
        &mut self,
        service: &str,
        suffix: &str,
        process: &str,
        binding: MethodBinding,
    ) -> Result<(), SubstrateError> {
        let record = self.owned_service_mut(service, process)?;
        if record.methods.contains_key(suffix) {
            return Err(SubstrateError::MethodExists(format!("/{service}/{suffix}")));
        }
        record.methods.insert(suffix.to_string(), binding);
        Ok(())
    }

    pub fn method(&self, service: &str, suffix: &str) -> Option<&MethodBinding> {
        self.services.get(service)?.methods.get(suffix)
    }

    /// Add a tap; returns false if the same relation already exists
    pub fn add_tap(&mut self, tap: TapRecord) -> Result<bool, SubstrateError> {
        if !self.services.contains_key(&tap.tappee) {
            return Err(SubstrateError::UnknownService(tap.tappee.clone()));
        }
        if self.has_tap(&tap.tappee, &tap.tapper) {
            return Ok(false);
        }
        self.taps.push(tap);
        Ok(true)
    }

    pub fn has_tap(&self, tappee: &str, tapper: &str) -> bool {
        self.taps
            .iter()
            .any(|t| t.tappee == tappee && t.tapper == tapper)
    }

    pub fn remove_tap(&mut self, tappee: &str, tapper: &str) -> bool {
        let before = self.taps.len();
        self.taps
            .retain(|t| !(t.tappee == tappee && t.tapper == tapper));
        before != self.taps.len()
    }

    pub fn remove_taps_created_by(&mut self, process: &str) -> usize {
        let before = self.taps.len();
        self.taps.retain(|t| t.process != process);
        before - self.taps.len()
    }

    pub fn taps_on<'a>(&'a self, tappee: &'a str) -> impl Iterator<Item = &'a TapRecord> {
        self.taps.iter().filter(move |t| t.tappee == tappee)
    }

    pub fn taps(&self) -> &[TapRecord] {
        &self.taps
    }

    /// Render the registry: one plain entry per service followed by one tap
    /// entry per tap placed on it
    pub fn listing(&self) -> ServiceListing {
        let mut entries = Vec::with_capacity(self.services.len() + self.taps.len());
        for (name, record) in &self.services {
            entries.push(ServiceEntry::plain(name, &record.owner, &record.properties));
            for tap in self.taps_on(name) {
                entries.push(ServiceEntry::tap(name, &tap.tapper, &tap.process));
            }
        }
        ServiceListing::new(entries)
    }
}
