use tapcheck_common::types::MessageError;
use thiserror::Error;

/// Errors returned by substrate operations
#[derive(Error, Debug)]
pub enum SubstrateError {
    #[error("Service already exists: {0}")]
    ServiceExists(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Service {service} is owned by process {owner}")]
    NotOwner { service: String, owner: String },

    #[error("Method already bound: {0}")]
    MethodExists(String),

    #[error("No tap from {tappee} to {tapper}")]
    UnknownTap { tappee: String, tapper: String },

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Handler for {path} failed: {source}")]
    Handler {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Process {0} has already finished")]
    NodeFinished(String),

    #[error("Process already attached: {0}")]
    NodeExists(String),
}
