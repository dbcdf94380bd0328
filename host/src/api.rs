//! ==============================================================================
//! api.rs - upstream (aranet cloud) client
//! ==============================================================================
//!
//! purpose:
//!     one poll = two json POSTs against the same endpoint:
//!
//! ```text
//!     1. challenge   {"auth": {"username": U}}
//!                 -> {"auth": {"permasalt": P, "salt": S}}
//!     2. data        {"auth": {"username": U, "hash": H}, "currData": 1}
//!                 -> {"currData": {"<sensor>": {"time": 1700000000, "h": 54.2, ...}}}
//! ```
//!
//! ```text
//!     H is computed by auth.rs from the password and the salt pair.
//!     only the entry keyed by the configured sensor id is extracted.
//! ```
//!
//! relationships:
//!     - used by: orchestrator.rs (one poll per due tick)
//!     - uses: auth.rs (hash chain, salt reuse guard)
//!     - uses: reqwest (HttpTransport, bounded by a client timeout)
//!
//! ==============================================================================

use crate::auth::SaltGuard;
use crate::domain::{Challenge, Credentials, SensorReading};
use crate::error::{AuthProtocolError, PollError, TransportError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

// ==============================================================================
// transport
// ==============================================================================

/// Posts a json body and returns the parsed json response.
#[allow(async_fn_in_trait)]
pub trait ApiTransport {
    async fn post(&self, body: Value) -> Result<Value, TransportError>;
}

/// reqwest-backed transport. Every request is bounded by the client timeout.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl ApiTransport for HttpTransport {
    async fn post(&self, body: Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

// ==============================================================================
// wire format
// ==============================================================================

#[derive(Serialize)]
struct ChallengeRequest<'a> {
    auth: UserAuth<'a>,
}

#[derive(Serialize)]
struct UserAuth<'a> {
    username: &'a str,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    auth: SaltPair,
}

#[derive(Deserialize)]
struct SaltPair {
    permasalt: String,
    salt: String,
}

#[derive(Serialize)]
struct DataRequest<'a> {
    auth: HashAuth<'a>,
    #[serde(rename = "currData")]
    curr_data: u8,
}

#[derive(Serialize)]
struct HashAuth<'a> {
    username: &'a str,
    hash: &'a str,
}

#[derive(Deserialize)]
struct DataResponse {
    #[serde(rename = "currData")]
    curr_data: HashMap<String, Value>,
}

/// one sensor's entry; unknown fields are ignored
#[derive(Deserialize)]
struct SensorEntry {
    time: i64,
    #[serde(default)]
    h: Option<f64>,
}

// ==============================================================================
// client
// ==============================================================================

pub struct AranetClient<T> {
    transport: T,
    credentials: Credentials,
    salts: SaltGuard,
}

impl<T: ApiTransport> AranetClient<T> {
    pub fn new(transport: T, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            salts: SaltGuard::new(),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Ask the api for a fresh salt pair.
    pub async fn fetch_challenge(&self) -> Result<Challenge, PollError> {
        let request = ChallengeRequest {
            auth: UserAuth { username: &self.credentials.username },
        };
        let body = serde_json::to_value(&request).map_err(|e| PollError::Parse(e.to_string()))?;
        let response = self.transport.post(body).await?;

        let parsed: ChallengeResponse = serde_json::from_value(response)
            .map_err(|e| AuthProtocolError::MalformedChallenge(e.to_string()))?;
        Ok(Challenge {
            permanent_salt: parsed.auth.permasalt,
            one_time_salt: parsed.auth.salt,
        })
    }

    /// Full authenticated poll: challenge, response hash, data request.
    pub async fn poll(&mut self) -> Result<SensorReading, PollError> {
        let challenge = self.fetch_challenge().await?;
        self.salts.accept(&challenge)?;
        let hash = challenge.respond(&self.credentials.password);

        let request = DataRequest {
            auth: HashAuth {
                username: &self.credentials.username,
                hash: &hash,
            },
            curr_data: 1,
        };
        let body = serde_json::to_value(&request).map_err(|e| PollError::Parse(e.to_string()))?;
        let response = self.transport.post(body).await?;
        extract_reading(response, &self.credentials.sensor_id)
    }
}

/// Pick the configured sensor out of a data response.
fn extract_reading(response: Value, sensor_id: &str) -> Result<SensorReading, PollError> {
    let mut data: DataResponse =
        serde_json::from_value(response).map_err(|e| PollError::Parse(e.to_string()))?;
    let entry = data
        .curr_data
        .remove(sensor_id)
        .ok_or_else(|| PollError::Parse(format!("sensor {} missing from currData", sensor_id)))?;
    let entry: SensorEntry = serde_json::from_value(entry)
        .map_err(|e| PollError::Parse(format!("sensor {}: {}", sensor_id, e)))?;
    Ok(SensorReading {
        device_time: entry.time,
        value: entry.h,
    })
}
