//! Tapcheck Common
//!
//! Common types and utilities shared by the tapcheck crates.
//!
//! This crate provides:
//! - Component-based structured logging with node ID context
//! - Logging macros (`log_debug!`, `log_info!`, `log_warn!`, `log_error!`)
//! - Message, type signature, property and service listing types

pub mod logging;
pub mod macros;
pub mod types;

pub use logging::{
    parse_component_level, Component, ComponentKey, LogLevel, Logger, LoggingConfig,
};
pub use types::{
    Arg, Message, MessageError, PropertyList, ServiceEntry, ServiceKind, ServiceListing, TapMode,
    TypeSignature,
};
