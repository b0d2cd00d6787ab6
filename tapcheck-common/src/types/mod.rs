// tapcheck_common/src/types/mod.rs
//
// Data types shared by the substrate and the harness

pub mod message;
pub mod properties;
pub mod service;

pub use self::message::{split_address, Arg, Message, MessageError, TypeSignature};
pub use self::properties::{PropertyList, PropertyParseError};
pub use self::service::{ServiceEntry, ServiceKind, ServiceListing, TapMode};
