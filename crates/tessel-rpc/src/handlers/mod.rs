// crates/tessel-rpc/src/handlers/mod.rs
//
// Handler modules for all RPC endpoints.
// Each module defines request/response types and handler functions
// for a specific API group.

pub mod farm;
pub mod gossip;
pub mod node;
pub mod peer;

use std::fmt::Debug;

use serde::Serialize;
use thiserror::Error;

use tessel_core::TesselError;
use tessel_farm::FarmError;

/// Why a handler did not produce a plain result.
///
/// The server maps each variant onto the response envelope: `NotFound` sets
/// `not_found`, `Partial` is a success carrying its value and message with
/// `partial` set, and `Failed` is an ordinary error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),

    #[error("Partial success: {message}")]
    Partial {
        value: serde_json::Value,
        message: String,
    },
}

impl From<TesselError> for HandlerError {
    fn from(e: TesselError) -> Self {
        match e {
            TesselError::NotFound(what) => HandlerError::NotFound(what),
            other => HandlerError::Failed(other.to_string()),
        }
    }
}

impl<T: Debug + Serialize> From<FarmError<T>> for HandlerError {
    fn from(e: FarmError<T>) -> Self {
        match e {
            FarmError::NotFound => HandlerError::NotFound("no replica holds it".to_string()),
            FarmError::Partial { ref value, .. } => {
                let message = e.to_string();
                match serde_json::to_value(value) {
                    Ok(value) => HandlerError::Partial { value, message },
                    Err(err) => HandlerError::Failed(format!("Failed to serialize response: {}", err)),
                }
            }
            total @ FarmError::Total { .. } => HandlerError::Failed(total.to_string()),
        }
    }
}
