//! Tapcheck Harness
//!
//! Conformance harness for publish/subscribe taps and service properties.
//! A publisher spreads a numbered message stream over N addresses, a tap
//! mirrors the first address to a subscriber service, a subscriber in a peer
//! process taps every address, and the registry listings of every observer
//! are checked while traffic flows and again after teardown.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`address_space`] | Service names and method paths of a role |
//! | [`properties`] | `PropertyLedger`: property changes and their expected state |
//! | [`tap_registry`] | `TapRegistry` and the listing predicates |
//! | [`dispatcher`] | Message stream sender and the primary/copy handlers |
//! | [`subscriber`] | `SubscriberRole`: the peer's tapper services and taps |
//! | [`convergence`] | `Expectation`s and the settle-then-check loop |
//! | [`orchestrator`] | `TestOrchestrator` state machine and `run_simulated` |
//! | [`config`] | `HarnessConfig` |
//! | [`error`] | `HarnessError` |

pub mod address_space;
pub mod config;
pub mod convergence;
pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod properties;
pub mod subscriber;
pub mod tap_registry;

pub use address_space::AddressSpace;
pub use config::HarnessConfig;
pub use convergence::{CheckpointReport, ConvergenceChecker, Expectation};
pub use dispatcher::{CopyHandler, MessageDispatcher, PrimaryHandler};
pub use error::{HarnessError, Result};
pub use orchestrator::{run_simulated, Phase, RunReport, TestOrchestrator, Tick};
pub use properties::PropertyLedger;
pub use subscriber::SubscriberRole;
pub use tap_registry::{assert_not_a_tap, assert_tap_present, TapRegistry};
