use serde::{Deserialize, Serialize};

/// account used to authenticate against the upstream api.
/// immutable for the lifetime of the process.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    /// never sent in clear, only as part of the hash chain
    pub password: String,
    /// key of the sensor entry to extract from `currData`
    pub sensor_id: String,
}

/// salt pair issued by the api for exactly one poll attempt.
///
/// not `Clone`: answering it consumes it (see `auth.rs`).
#[derive(Debug, PartialEq, Eq)]
pub struct Challenge {
    pub permanent_salt: String,
    pub one_time_salt: String,
}

/// a single reading pulled from the api
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct SensorReading {
    /// measurement time in seconds, on the server's clock
    pub device_time: i64,

    /// relative humidity in percent; the api may omit it
    pub value: Option<f64>,
}
