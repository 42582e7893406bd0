//! Call signaling wire protocol and transport seam
//!
//! One [`SignalEnvelope`] per message, JSON over the server-relayed pub/sub
//! bus. The transport itself (connect, reconnect, STOMP frames) is an
//! external collaborator behind [`SignalTransport`].

use crate::types::{CallHistoryId, IceCandidateInit, SessionDescription, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Signaling transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// The bus is not connected
    #[error("transport not connected")]
    NotConnected,

    /// Publish failed
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Subscribe failed
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
}

/// Payload of a `call-request` signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Who is calling
    pub caller_id: UserId,
    /// Who is being called
    pub receiver_id: UserId,
    /// Video call?
    pub is_video_call: bool,
    /// Caller display name
    pub caller_name: String,
    /// Caller avatar URL, may be empty
    pub caller_avatar: String,
}

/// Semantic call signal, discriminated by `signalType` on the wire with the
/// payload under `signalData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signalType", content = "signalData", rename_all = "kebab-case")]
pub enum Signal {
    /// Start a call (caller → callee); also echoed to the caller by the
    /// backend carrying the assigned call-history id
    CallRequest(CallRequest),
    /// Callee committed to the call (callee → caller)
    CallAccept {},
    /// Callee declined (callee → caller)
    CallReject {},
    /// Hang up (either → other)
    CallEnd {},
    /// Device already on a call (busy device → new caller)
    CallBusy {
        /// User-visible busy notice; the engine substitutes a default when
        /// the payload omits it
        #[serde(default)]
        message: String,
    },
    /// SDP offer (caller → callee)
    Offer {
        /// The offer description
        offer: SessionDescription,
    },
    /// SDP answer (callee → caller)
    Answer {
        /// The answer description
        answer: SessionDescription,
    },
    /// ICE candidate (either → other)
    IceCandidate {
        /// The candidate
        candidate: IceCandidateInit,
    },
}

impl Signal {
    /// Wire discriminant, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CallRequest(_) => "call-request",
            Self::CallAccept {} => "call-accept",
            Self::CallReject {} => "call-reject",
            Self::CallEnd {} => "call-end",
            Self::CallBusy { .. } => "call-busy",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
        }
    }
}

/// The wire unit exchanged over the transport.
///
/// `callHistoryId` and `endedById` ride at the envelope level, alongside the
/// signal payload rather than inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    /// The signal itself (`signalType` + `signalData`)
    #[serde(flatten)]
    pub signal: Signal,
    /// Backend call-history record, where known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_history_id: Option<CallHistoryId>,
    /// Who hung up, on `call-end`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_by_id: Option<UserId>,
}

impl SignalEnvelope {
    /// Wrap a signal with no envelope metadata
    #[must_use]
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            call_history_id: None,
            ended_by_id: None,
        }
    }

    /// Attach the call-history id
    #[must_use]
    pub fn with_history(mut self, id: Option<CallHistoryId>) -> Self {
        self.call_history_id = id;
        self
    }

    /// Attach the hanging-up user
    #[must_use]
    pub fn with_ended_by(mut self, user: UserId) -> Self {
        self.ended_by_id = Some(user);
        self
    }
}

/// Publish/subscribe transport trait
///
/// Implement this for the concrete bus (STOMP over websocket, etc.). The
/// engine assumes the transport is connected; reconnection is outside its
/// authority. Subscriptions must deliver messages in the order received.
#[async_trait]
pub trait SignalTransport: Send + Sync + 'static {
    /// Publish one envelope to an address
    async fn publish(&self, address: &str, envelope: SignalEnvelope) -> Result<(), TransportError>;

    /// Subscribe to an address, returning the ordered inbound stream
    async fn subscribe(
        &self,
        address: &str,
    ) -> Result<mpsc::Receiver<SignalEnvelope>, TransportError>;

    /// Drop a subscription
    async fn unsubscribe(&self, address: &str) -> Result<(), TransportError>;
}
