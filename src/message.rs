//! JSON message contract spoken with the embedded calling engine.
//!
//! Commands are serialized as `{"type": "...", ...payload}` objects. Events
//! arrive in the same shape; anything that is not an object with a string
//! `type` is rejected as malformed, and unrecognized types are reported as
//! [`PhoneError::UnknownEvent`] so the caller can log and move on.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CallId, PhoneError, Result};

// Commands sent to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineCommand {
    Register {
        username: String,
        password: String,
        #[serde(rename = "wsServer")]
        ws_server: String,
        domain: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        authorization_user: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        realm: Option<String>,
    },
    Call {
        target: String,
        domain: String,
        uri: String,
    },
    Answer,
    RejectCall,
    Hangup,
    Terminate,
    EndCall,
    Mute {
        mute: bool,
    },
    Hold,
    Resume,
    Transfer {
        target: String,
        domain: String,
    },
    ActivateAudio,
}

impl EngineCommand {
    /// Build a `call` command addressed to `target@domain`.
    pub fn call(target: &str, domain: &str) -> Self {
        EngineCommand::Call {
            target: target.to_string(),
            domain: domain.to_string(),
            uri: format!("sip:{}@{}", target, domain),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineCommand::Register { .. } => "register",
            EngineCommand::Call { .. } => "call",
            EngineCommand::Answer => "answer",
            EngineCommand::RejectCall => "rejectCall",
            EngineCommand::Hangup => "hangup",
            EngineCommand::Terminate => "terminate",
            EngineCommand::EndCall => "endCall",
            EngineCommand::Mute { .. } => "mute",
            EngineCommand::Hold => "hold",
            EngineCommand::Resume => "resume",
            EngineCommand::Transfer { .. } => "transfer",
            EngineCommand::ActivateAudio => "activateAudio",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// Events received from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Ready,
    Registered,
    RegistrationFailed { error: Option<String> },
    Incoming(IncomingCall),
    Progress,
    Outgoing { call_id: Option<CallId> },
    Connected { call_id: Option<CallId> },
    Confirmed,
    Ended,
    Failed { error: Option<String> },
    CallTimerUpdate { duration: Option<u64> },
    DtmfTransferSent { message: Option<String> },
    TransferFailed { error: Option<String> },
    AudioStarted,
    AudioFailed { error: Option<String> },
    NeedsAudioActivation,
    ConnectedWs,
    Disconnected,
}

/// Payload of an `incoming` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    #[serde(default, deserialize_with = "lenient_string")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub call_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub contact_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub contact_avatar: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallIdPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    call_id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    error: Option<String>,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default, deserialize_with = "lenient_string")]
    message: Option<String>,
}

#[derive(Deserialize)]
struct TimerPayload {
    #[serde(default, deserialize_with = "lenient_u64")]
    duration: Option<u64>,
}

impl EngineEvent {
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| PhoneError::MalformedMessage(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(PhoneError::MalformedMessage("`type` is not a string".to_string())),
            None => return Err(PhoneError::MalformedMessage("missing `type`".to_string())),
        };

        let event = match kind.as_str() {
            "ready" => EngineEvent::Ready,
            "registered" => EngineEvent::Registered,
            "registrationFailed" => {
                let payload: ErrorPayload = payload(value)?;
                EngineEvent::RegistrationFailed { error: payload.error }
            }
            "incoming" => EngineEvent::Incoming(payload(value)?),
            "progress" => EngineEvent::Progress,
            "outgoing" => {
                let payload: CallIdPayload = payload(value)?;
                EngineEvent::Outgoing { call_id: payload.call_id.map(CallId) }
            }
            "connected" => {
                let payload: CallIdPayload = payload(value)?;
                EngineEvent::Connected { call_id: payload.call_id.map(CallId) }
            }
            "confirmed" => EngineEvent::Confirmed,
            "ended" => EngineEvent::Ended,
            "failed" => {
                let payload: ErrorPayload = payload(value)?;
                EngineEvent::Failed { error: payload.error }
            }
            "callTimerUpdate" => {
                let payload: TimerPayload = payload(value)?;
                EngineEvent::CallTimerUpdate { duration: payload.duration }
            }
            "dtmfTransferSent" => {
                let payload: MessagePayload = payload(value)?;
                EngineEvent::DtmfTransferSent { message: payload.message }
            }
            "transferFailed" => {
                let payload: ErrorPayload = payload(value)?;
                EngineEvent::TransferFailed { error: payload.error }
            }
            "audioStarted" => EngineEvent::AudioStarted,
            "audioFailed" => {
                let payload: ErrorPayload = payload(value)?;
                EngineEvent::AudioFailed { error: payload.error }
            }
            "needsAudioActivation" => EngineEvent::NeedsAudioActivation,
            "connectedWS" => EngineEvent::ConnectedWs,
            "disconnected" => EngineEvent::Disconnected,
            _ => return Err(PhoneError::UnknownEvent(kind)),
        };

        Ok(event)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Ready => "ready",
            EngineEvent::Registered => "registered",
            EngineEvent::RegistrationFailed { .. } => "registrationFailed",
            EngineEvent::Incoming(_) => "incoming",
            EngineEvent::Progress => "progress",
            EngineEvent::Outgoing { .. } => "outgoing",
            EngineEvent::Connected { .. } => "connected",
            EngineEvent::Confirmed => "confirmed",
            EngineEvent::Ended => "ended",
            EngineEvent::Failed { .. } => "failed",
            EngineEvent::CallTimerUpdate { .. } => "callTimerUpdate",
            EngineEvent::DtmfTransferSent { .. } => "dtmfTransferSent",
            EngineEvent::TransferFailed { .. } => "transferFailed",
            EngineEvent::AudioStarted => "audioStarted",
            EngineEvent::AudioFailed { .. } => "audioFailed",
            EngineEvent::NeedsAudioActivation => "needsAudioActivation",
            EngineEvent::ConnectedWs => "connectedWS",
            EngineEvent::Disconnected => "disconnected",
        }
    }
}

fn payload<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| PhoneError::MalformedMessage(e.to_string()))
}

// The engine is loosely typed: ids and errors show up as strings, numbers or objects.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_command_shape() {
        let command = EngineCommand::Register {
            username: "1001".to_string(),
            password: "secret".to_string(),
            ws_server: "wss://pbx.example.com:8089/ws".to_string(),
            domain: "pbx.example.com".to_string(),
            authorization_user: None,
            realm: Some("asterisk".to_string()),
        };

        let value: Value = serde_json::from_str(&command.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "register",
                "username": "1001",
                "password": "secret",
                "wsServer": "wss://pbx.example.com:8089/ws",
                "domain": "pbx.example.com",
                "realm": "asterisk"
            })
        );
        assert!(value.get("authorization_user").is_none());
    }

    #[test]
    fn test_call_command_builds_uri() {
        let command = EngineCommand::call("100", "pbx.example.com");
        let value: Value = serde_json::from_str(&command.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "call");
        assert_eq!(value["target"], "100");
        assert_eq!(value["uri"], "sip:100@pbx.example.com");
    }

    #[test]
    fn test_unit_commands_carry_only_type() {
        for (command, kind) in [
            (EngineCommand::Answer, "answer"),
            (EngineCommand::RejectCall, "rejectCall"),
            (EngineCommand::EndCall, "endCall"),
            (EngineCommand::ActivateAudio, "activateAudio"),
        ] {
            let value: Value = serde_json::from_str(&command.to_json().unwrap()).unwrap();
            assert_eq!(value, json!({ "type": kind }));
            assert_eq!(command.kind(), kind);
        }

        let mute: Value = serde_json::from_str(&EngineCommand::Mute { mute: true }.to_json().unwrap()).unwrap();
        assert_eq!(mute, json!({ "type": "mute", "mute": true }));
    }

    #[test]
    fn test_incoming_event_parsing() {
        let event = EngineEvent::parse(
            r#"{"type":"incoming","from":"200","callId":"abc","contactName":"Bob","token":12}"#,
        )
        .unwrap();

        match event {
            EngineEvent::Incoming(incoming) => {
                assert_eq!(incoming.from.as_deref(), Some("200"));
                assert_eq!(incoming.call_id.as_deref(), Some("abc"));
                assert_eq!(incoming.contact_name.as_deref(), Some("Bob"));
                assert_eq!(incoming.contact_avatar, None);
                assert_eq!(incoming.token.as_deref(), Some("12"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_payload_events() {
        assert_eq!(
            EngineEvent::parse(r#"{"type":"connected","callId":"c-1"}"#).unwrap(),
            EngineEvent::Connected { call_id: Some(CallId("c-1".to_string())) }
        );
        assert_eq!(
            EngineEvent::parse(r#"{"type":"registrationFailed","error":{"cause":"403"}}"#).unwrap(),
            EngineEvent::RegistrationFailed { error: Some(r#"{"cause":"403"}"#.to_string()) }
        );
        assert_eq!(
            EngineEvent::parse(r#"{"type":"callTimerUpdate","duration":"17"}"#).unwrap(),
            EngineEvent::CallTimerUpdate { duration: Some(17) }
        );
        assert_eq!(EngineEvent::parse(r#"{"type":"connectedWS"}"#).unwrap(), EngineEvent::ConnectedWs);
        assert_eq!(EngineEvent::parse(r#"{"type":"ended","extra":1}"#).unwrap(), EngineEvent::Ended);
    }

    #[test]
    fn test_malformed_and_unknown_messages() {
        assert!(matches!(EngineEvent::parse("not json"), Err(PhoneError::MalformedMessage(_))));
        assert!(matches!(EngineEvent::parse("[1,2]"), Err(PhoneError::MalformedMessage(_))));
        assert!(matches!(EngineEvent::parse("\"ready\""), Err(PhoneError::MalformedMessage(_))));
        assert!(matches!(EngineEvent::parse(r#"{"kind":"ready"}"#), Err(PhoneError::MalformedMessage(_))));
        assert!(matches!(EngineEvent::parse(r#"{"type":7}"#), Err(PhoneError::MalformedMessage(_))));

        match EngineEvent::parse(r#"{"type":"somethingNew"}"#) {
            Err(PhoneError::UnknownEvent(kind)) => assert_eq!(kind, "somethingNew"),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
