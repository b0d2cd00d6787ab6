//! Service and method names used by one role
//!
//! A role with fan-out N owns the services `<prefix>0 .. <prefix>N-1`, each with
//! one method `/<prefix>i/äta`. The suffix is the same non-ASCII text for every
//! address so every bind and every lookup has to carry multi-byte names intact.

use crate::error::{HarnessError, Result};

/// Method suffix shared by every address
pub const METHOD_SUFFIX: &str = "äta";

/// Type signature of every harness method: string, symbol, int32
pub const METHOD_TYPES: &str = "sSi";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    prefix: String,
    count: usize,
}

impl AddressSpace {
    pub fn new(prefix: impl Into<String>, count: usize) -> Result<Self> {
        let prefix = prefix.into();
        if count == 0 {
            return Err(HarnessError::Config(format!(
                "address space '{prefix}' needs at least one address"
            )));
        }
        if prefix.is_empty() || prefix.contains('/') {
            return Err(HarnessError::Config(format!(
                "invalid service prefix '{prefix}'"
            )));
        }
        Ok(Self { prefix, count })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Service name of address `index`
    pub fn service(&self, index: usize) -> String {
        format!("{}{}", self.prefix, index)
    }

    /// Full method path of address `index`
    pub fn method_path(&self, index: usize) -> String {
        format!("/{}{}/{}", self.prefix, index, METHOD_SUFFIX)
    }

    /// Round-robin address of message slot `slot`
    pub fn address_for(&self, slot: u64) -> usize {
        (slot % self.count as u64) as usize
    }

    pub fn services(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.count).map(|i| self.service(i))
    }

    pub fn method_paths(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.count).map(|i| self.method_path(i))
    }
}
