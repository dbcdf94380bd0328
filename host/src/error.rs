//! ==============================================================================
//! error.rs - error taxonomy for the relay loop
//! ==============================================================================
//!
//! purpose:
//!     every i/o call in the loop returns one of these as a tagged result.
//!     the orchestrator matches them at the call site and turns them into an
//!     on-screen status instead of letting them escape.
//!
//! taxonomy:
//!     - TransportError:    display / http / mqtt i/o failure (logged, never fatal)
//!     - AuthProtocolError: reused or malformed challenge (fails this poll only)
//!     - PollError:         everything that can fail a single poll attempt
//!     - ScheduleError:     schedule invariant broken (escapes the loop)
//!     - UnrecoverableFault: what the crash handler renders to the screen
//!
//! stale data is not an error: it is a normal branch of the cycle outcome.
//!
//! ==============================================================================

use thiserror::Error;

/// I/O failure at one of the external collaborators.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP failure talking to the upstream API (network, timeout, status).
    #[error("request error: {0}")]
    Request(String),

    /// MQTT failure (not connected, request queue closed or full).
    #[error("mqtt error: {0}")]
    Mqtt(String),

    /// Display surface failure (I2C write, flush).
    #[error("display error: {0}")]
    Display(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Request(err.to_string())
    }
}

impl From<rumqttc::ClientError> for TransportError {
    fn from(err: rumqttc::ClientError) -> Self {
        TransportError::Mqtt(err.to_string())
    }
}

/// Violations of the challenge-response protocol.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthProtocolError {
    #[error("one-time salt was already used by the previous attempt")]
    ReusedSalt,

    #[error("malformed challenge: {0}")]
    MalformedChallenge(String),
}

/// Everything that can fail a single poll attempt.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthProtocolError),

    /// The data response did not have the expected shape.
    #[error("unexpected response: {0}")]
    Parse(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("next poll moved backwards ({previous}s -> {next}s)")]
    DueWentBackwards { previous: u64, next: u64 },
}

/// A fault that escaped the run loop, as shown on the crash banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrecoverableFault {
    pub category: String,
    pub message: String,
}

impl UnrecoverableFault {
    /// Classify an error that escaped the loop by its concrete type.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let category = if err.is::<ScheduleError>() {
            "ScheduleError"
        } else if err.is::<TransportError>() {
            "TransportError"
        } else if err.is::<AuthProtocolError>() {
            "AuthProtocolError"
        } else if err.is::<PollError>() {
            "PollError"
        } else {
            "Error"
        };
        Self {
            category: category.to_string(),
            message: err.to_string(),
        }
    }

    /// Build a fault from a panic payload caught around the loop.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self {
            category: "Panic".to_string(),
            message,
        }
    }
}

impl std::fmt::Display for UnrecoverableFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}
