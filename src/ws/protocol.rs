//! Wire protocol: the JSON envelope exchanged over the WebSocket.
//!
//! Inbound frames decode to exactly one of two client intents — `Query` (a
//! read, answered on the issuing session) or `Command` (a write, possibly
//! fanned out as broadcasts) — or are rejected with a `DecodeError` before
//! they reach the dispatcher.
//!
//! Decoding is done by hand over a `serde_json::Value` rather than a single
//! derive: the contract requires a *distinct* diagnostic for a missing `type`
//! key versus an unrecognized `type` value, and rejects unknown command
//! actions at decode time.

use crate::error::DomainError;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Closed set of command actions. Anything else is a decode error, never a
/// routing-time fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Create,
    Update,
    Delete,
}

impl CommandAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A read request. Answered directly on the issuing session, never broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct Query {
    pub resource: String,
    pub payload: Value,
    pub uid: String,
}

/// A write intent. May produce zero or more broadcasts.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub resource: String,
    pub action: CommandAction,
    pub payload: Value,
    pub uid: String,
}

/// One inbound frame, post-decode.
#[derive(Debug, Clone)]
pub enum Event {
    Query(Query),
    Command(Command),
}

impl Event {
    pub fn resource(&self) -> &str {
        match self {
            Event::Query(q) => &q.resource,
            Event::Command(c) => &c.resource,
        }
    }
}

/// Server-originated event pushed to sessions. Open union: new variants are
/// added here as the protocol grows.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerEvent {
    /// Reply to a query, on the issuing session only.
    /// Serializes as `{"response": ..., "query": {...}}`.
    QueryReply { response: Value, query: Query },
    /// A command was applied; fanned out to interested users.
    /// Serializes as `{"command": {...}, "user_id": N, "result": ...}`.
    CommandDone {
        command: Command,
        user_id: i64,
        result: Value,
    },
}

/// A server event together with the user ids that should receive it.
/// Constructed and consumed within one dispatch cycle, never persisted.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub receivers: Vec<i64>,
    pub event: ServerEvent,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON frame: {0}")]
    BadJson(String),

    #[error("event frame is not a JSON object")]
    NotAnObject,

    #[error("invalid event format, missing 'type'")]
    MissingType,

    #[error("invalid event type {0:?}")]
    UnknownType(String),

    #[error("invalid event format, missing {0:?}")]
    MissingField(&'static str),

    #[error("invalid event format, wrong type for {0:?}")]
    InvalidField(&'static str),

    #[error("invalid command action {0:?}, expected create/update/delete")]
    UnknownAction(String),
}

impl From<DecodeError> for DomainError {
    fn from(err: DecodeError) -> Self {
        DomainError::Validation(err.to_string())
    }
}

/// Decode one raw text frame into a typed event.
pub fn decode(raw: &str) -> Result<Event, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::BadJson(e.to_string()))?;
    let Value::Object(mut obj) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let type_value = obj.remove("type").ok_or(DecodeError::MissingType)?;
    let type_str = match type_value {
        Value::String(s) => s,
        other => return Err(DecodeError::UnknownType(other.to_string())),
    };

    match type_str.as_str() {
        "query" => Ok(Event::Query(Query {
            resource: required_string(&mut obj, "resource")?,
            payload: payload_or_default(&mut obj)?,
            uid: uid_or_default(&mut obj)?,
        })),
        "command" => {
            let resource = required_string(&mut obj, "resource")?;
            let action_str = required_string(&mut obj, "action")?;
            let action = CommandAction::parse(&action_str)
                .ok_or(DecodeError::UnknownAction(action_str))?;
            Ok(Event::Command(Command {
                resource,
                action,
                payload: payload_or_default(&mut obj)?,
                uid: uid_or_default(&mut obj)?,
            }))
        }
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

/// Serialize a server event. Key layout is part of the wire contract; clients
/// correlate on the echoed query/command object.
pub fn encode(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

fn required_string(
    obj: &mut Map<String, Value>,
    key: &'static str,
) -> Result<String, DecodeError> {
    match obj.remove(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) | None => Err(DecodeError::MissingField(key)),
    }
}

// Defaults apply only when the key is absent; a present key with the wrong
// JSON type is rejected, never coerced.
fn payload_or_default(obj: &mut Map<String, Value>) -> Result<Value, DecodeError> {
    match obj.remove("payload") {
        Some(v @ Value::Object(_)) => Ok(v),
        Some(_) => Err(DecodeError::InvalidField("payload")),
        None => Ok(json!({})),
    }
}

fn uid_or_default(obj: &mut Map<String, Value>) -> Result<String, DecodeError> {
    match obj.remove("uid") {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(DecodeError::InvalidField("uid")),
        None => Ok("-".to_string()),
    }
}
