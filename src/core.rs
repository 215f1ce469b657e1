// Core error types
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhoneError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Malformed engine message: {0}")]
    MalformedMessage(String),
    #[error("Unknown engine event: {0}")]
    UnknownEvent(String),
    #[error("Credential storage error: {0}")]
    Storage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Audio routing error: {0}")]
    Audio(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, PhoneError>;

// Call states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Incoming,
    Outgoing,
    Ringing,
    Connected,
    Ended,
    Failed,
}

impl CallState {
    /// A call is in flight; a new dial must be refused.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Incoming | CallState::Outgoing | CallState::Ringing | CallState::Connected
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Incoming => "incoming",
            CallState::Outgoing => "outgoing",
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

// Registration flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationState {
    pub registered: bool,
    pub registering: bool,
}

// Call ID as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CallId(pub String);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credentials handed to the presentation layer alongside an accepted call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SipCredentials {
    pub username: String,
    pub password: String,
    #[serde(rename = "wsServer")]
    pub ws_server: String,
    #[serde(rename = "SIP_DOMAIN")]
    pub sip_domain: String,
    pub id: i64,
}

/// Call summary consumed by the full call screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub number_to_call: String,
    pub contact_name: Option<String>,
    pub contact_avatar: Option<String>,
    pub token: Option<String>,
    pub is_incoming: bool,
    pub sip_credentials: SipCredentials,
}

// Event types
#[derive(Debug, Clone)]
pub enum PhoneEvent {
    Call(CallEvent),
    Registration(RegistrationEvent),
    Engine(EngineStatusEvent),
    /// Hand-off to the full call UI after an incoming call was accepted.
    PresentCall(CallSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged { from: CallState, to: CallState },
    IncomingCall { from: String, call_id: CallId, contact_name: Option<String> },
    IncomingCallBusy { from: String, call_id: CallId },
    IncomingAccepted { from: String, call_id: CallId },
    Missed { from: String, call_id: CallId },
    DialRejected { target: String, state: CallState },
    Ended { remote_party: String, direction: CallDirection, duration_seconds: u64 },
    Failed { reason: String },
    TransferSent { message: Option<String> },
    TransferFailed { error: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationEvent {
    Registering,
    Registered,
    RegistrationFailed { error: Option<String> },
    RetryScheduled { attempt: u32, delay: Duration },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineStatusEvent {
    Ready,
    SocketConnected,
    SocketDisconnected,
    AudioStarted,
    AudioFailed { error: Option<String> },
    TimerUpdate { duration: Option<u64> },
}
