//! Tapcheck Node
//!
//! The messaging substrate seen by the tapcheck harness, plus a simulated
//! multi-process substrate used to run the harness in-process.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`substrate`] | `Substrate` and `MessageHandler` traits, poll statistics |
//! | [`hub`] | Shared medium: inboxes, deferred registry changes |
//! | [`node`] | `SimNode`, one simulated process implementing `Substrate` |
//! | [`registry`] | Services, methods, properties, taps and listings |
//! | [`error`] | `SubstrateError` |

pub mod error;
pub mod hub;
pub mod node;
pub mod registry;
pub mod substrate;

pub use error::SubstrateError;
pub use hub::{Hub, HubConfig};
pub use node::SimNode;
pub use registry::TapRecord;
pub use substrate::{HandlerOutcome, MessageHandler, PollStats, Substrate};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
