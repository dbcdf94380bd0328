//! test doubles for the external collaborators

use crate::api::ApiTransport;
use crate::display::DisplaySurface;
use crate::domain::Credentials;
use crate::error::TransportError;
use crate::mqtt::Publisher;
use crate::watchdog::{RebootReason, Restarter};

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub fn credentials() -> Credentials {
    Credentials {
        username: "user".into(),
        password: "secret".into(),
        sensor_id: "sensor-1".into(),
    }
}

/// Replays canned responses in order and records every request body.
pub struct ScriptedApi {
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl ScriptedApi {
    pub fn new(responses: Vec<Result<Value, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<Value>>> {
        self.requests.clone()
    }
}

impl ApiTransport for ScriptedApi {
    async fn post(&self, body: Value) -> Result<Value, TransportError> {
        self.requests.lock().unwrap().push(body);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted response".into())))
    }
}

/// Transport that blows up, standing in for a bug deep inside a poll.
pub struct PanickingApi;

impl ApiTransport for PanickingApi {
    async fn post(&self, _body: Value) -> Result<Value, TransportError> {
        panic!("transport exploded")
    }
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    pub published: Arc<Mutex<Vec<(String, String)>>>,
    pub fail: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }
}

impl Publisher for RecordingPublisher {
    async fn publish(&mut self, topic: &str, payload: String) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Mqtt("broker unreachable".into()));
        }
        self.published.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    pub drawn: Vec<(String, i32, i32)>,
    pub clears: usize,
    pub commits: usize,
    pub fail: bool,
}

impl RecordingSurface {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }
}

impl DisplaySurface for RecordingSurface {
    fn clear(&mut self) {
        self.clears += 1;
        self.drawn.clear();
    }

    fn draw_text(&mut self, line: &str, x: i32, y: i32) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Display("i2c nack".into()));
        }
        self.drawn.push((line.to_string(), x, y));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Display("i2c nack".into()));
        }
        self.commits += 1;
        Ok(())
    }
}

/// Restart that unwinds instead of resetting, for `#[should_panic]` tests.
pub struct PanickingRestarter;

impl Restarter for PanickingRestarter {
    fn restart(&self, reason: RebootReason) -> ! {
        panic!("restart: {}", reason)
    }
}
