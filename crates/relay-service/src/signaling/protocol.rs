//! Signaling wire protocol.
//!
//! Every WebSocket text frame carries one JSON envelope:
//!
//! ```json
//! {"event": "offer", "data": {"sessionId": "s1", "offer": {"type": "offer", "sdp": "..."}}}
//! ```
//!
//! Inbound envelopes decode into [`ClientEvent`]; outbound events are
//! [`ServerEvent`]s serialized in the same shape. Offer, answer and ICE
//! candidate payloads are opaque: they must be present and non-null, and are
//! forwarded verbatim.

use crate::errors::RelayError;

use common::types::ParticipantRole;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw inbound frame before the payload is interpreted.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// `join-session` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSession {
    pub session_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
}

/// `start-session` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
    pub session_id: String,
    pub reader_id: String,
    pub client_id: String,
}

/// `end-session` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSession {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferPayload {
    session_id: String,
    offer: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerPayload {
    session_id: String,
    answer: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IceCandidatePayload {
    session_id: String,
    candidate: Value,
}

/// Kind of negotiation message forwarded between room members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Event name on the wire.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }
}

/// An opaque negotiation payload addressed to a room.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub session_id: String,
    pub payload: Value,
}

impl Signal {
    /// The outbound event delivered to the other room members.
    #[must_use]
    pub fn into_server_event(self) -> ServerEvent {
        match self.kind {
            SignalKind::Offer => ServerEvent::Offer(self.payload),
            SignalKind::Answer => ServerEvent::Answer(self.payload),
            SignalKind::IceCandidate => ServerEvent::IceCandidate(self.payload),
        }
    }
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinSession(JoinSession),
    Signal(Signal),
    StartSession(StartSession),
    EndSession(EndSession),
}

impl ClientEvent {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Protocol` for invalid JSON, an unknown event name,
    /// a payload missing a required field, an empty `sessionId` or a null
    /// relayed payload.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|_| RelayError::Protocol("Malformed message".to_string()))?;
        let event = envelope.event.as_str();

        let decoded = match event {
            "join-session" => {
                let p: JoinSession = payload(event, envelope.data)?;
                require_session_id(event, &p.session_id)?;
                ClientEvent::JoinSession(p)
            }
            "offer" => {
                let p: OfferPayload = payload(event, envelope.data)?;
                signal(event, SignalKind::Offer, p.session_id, p.offer)?
            }
            "answer" => {
                let p: AnswerPayload = payload(event, envelope.data)?;
                signal(event, SignalKind::Answer, p.session_id, p.answer)?
            }
            "ice-candidate" => {
                let p: IceCandidatePayload = payload(event, envelope.data)?;
                signal(event, SignalKind::IceCandidate, p.session_id, p.candidate)?
            }
            "start-session" => {
                let p: StartSession = payload(event, envelope.data)?;
                require_session_id(event, &p.session_id)?;
                ClientEvent::StartSession(p)
            }
            "end-session" => {
                let p: EndSession = payload(event, envelope.data)?;
                require_session_id(event, &p.session_id)?;
                ClientEvent::EndSession(p)
            }
            _ => return Err(RelayError::Protocol("Unknown event".to_string())),
        };

        Ok(decoded)
    }

    /// Event name on the wire (bounded, safe as a metric label).
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::JoinSession(_) => "join-session",
            ClientEvent::Signal(signal) => signal.kind.event_name(),
            ClientEvent::StartSession(_) => "start-session",
            ClientEvent::EndSession(_) => "end-session",
        }
    }

    /// Room the event is addressed to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            ClientEvent::JoinSession(p) => &p.session_id,
            ClientEvent::Signal(s) => &s.session_id,
            ClientEvent::StartSession(p) => &p.session_id,
            ClientEvent::EndSession(p) => &p.session_id,
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, RelayError> {
    serde_json::from_value(data).map_err(|_| invalid_payload(event))
}

fn signal(
    event: &str,
    kind: SignalKind,
    session_id: String,
    payload: Value,
) -> Result<ClientEvent, RelayError> {
    require_session_id(event, &session_id)?;
    if payload.is_null() {
        return Err(invalid_payload(event));
    }
    Ok(ClientEvent::Signal(Signal {
        kind,
        session_id,
        payload,
    }))
}

fn require_session_id(event: &str, session_id: &str) -> Result<(), RelayError> {
    if session_id.trim().is_empty() {
        return Err(invalid_payload(event));
    }
    Ok(())
}

fn invalid_payload(event: &str) -> RelayError {
    RelayError::Protocol(format!("Invalid {event} payload"))
}

/// An outbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A reader joined the room.
    ReaderJoined {
        #[serde(rename = "readerId")]
        reader_id: String,
    },
    /// A client joined the room.
    ClientJoined {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    Offer(Value),
    Answer(Value),
    IceCandidate(Value),
    /// Acknowledgement to the participant that started the session.
    SessionStarted {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    SessionEnded,
    /// Periodic charge for an active session; `amount` has two decimals.
    BillingUpdate { duration: u64, amount: String },
    /// Handler failure, sent to the originating connection only.
    Error { message: String },
}

impl ServerEvent {
    /// Role announcement for a participant joining a room.
    #[must_use]
    pub fn joined(role: ParticipantRole, user_id: String) -> Self {
        match role {
            ParticipantRole::Reader => ServerEvent::ReaderJoined { reader_id: user_id },
            ParticipantRole::Client => ServerEvent::ClientJoined { client_id: user_id },
        }
    }

    /// Error event carrying the client-safe message for `err`.
    #[must_use]
    pub fn error(err: &RelayError) -> Self {
        ServerEvent::Error {
            message: err.client_message(),
        }
    }

    /// Event name on the wire.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::ReaderJoined { .. } => "reader-joined",
            ServerEvent::ClientJoined { .. } => "client-joined",
            ServerEvent::Offer(_) => "offer",
            ServerEvent::Answer(_) => "answer",
            ServerEvent::IceCandidate(_) => "ice-candidate",
            ServerEvent::SessionStarted { .. } => "session-started",
            ServerEvent::SessionEnded => "session-ended",
            ServerEvent::BillingUpdate { .. } => "billing-update",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// A STUN/TURN server entry as handed to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: String,
}
