//! Core call types and data structures

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Integer user identifier, assigned by the account backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a call, generated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Create a new random call ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the backend call-history record, assigned once a
/// call-request has been registered server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallHistoryId(pub i64);

impl std::fmt::Display for CallHistoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UI-visible lifecycle phase of the call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    /// No call in progress
    Idle,
    /// We initiated a call and are waiting for the remote party
    Outgoing,
    /// A remote call-request is ringing locally
    Incoming,
    /// Both parties committed; media negotiation and the call itself
    Active,
    /// Torn down, about to return to idle
    Ended,
}

impl CallPhase {
    /// Whether a session exists (anything but idle)
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Display snapshot of the remote participant, captured once at call
/// setup and never re-fetched mid-call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDisplay {
    /// Display name
    pub name: String,
    /// Avatar URL, may be empty
    pub avatar_url: String,
}

impl RemoteDisplay {
    /// Create a display snapshot
    pub fn new(name: impl Into<String>, avatar_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            avatar_url: avatar_url.into(),
        }
    }
}

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// SDP offer (caller side)
    Offer,
    /// SDP answer (callee side)
    Answer,
}

/// SDP payload exchanged as offer/answer, wire-compatible with
/// `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate payload, wire-compatible with `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    /// Candidate string
    pub candidate: String,
    /// SDP media ID
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// SDP media line index
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidateInit {
    /// Build a candidate from its candidate string
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// ICE connection state as reported by the peer-connection platform.
///
/// `Connected`/`Completed` are treated as "call is live" regardless of the
/// coarser overall connection state, since ICE state is the more reliable
/// signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Initial state
    New,
    /// Candidate pairs being checked
    Checking,
    /// A usable pair was found
    Connected,
    /// Checks finished, best pair selected
    Completed,
    /// Connectivity lost, may recover
    Disconnected,
    /// Negotiation failed
    Failed,
    /// Connection closed
    Closed,
}

impl IceConnectionState {
    /// Whether media can flow in this state
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

/// Why a session was torn down, so the UI can show distinct messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Local user hung up
    LocalEnded,
    /// Remote party hung up
    RemoteEnded,
    /// Local user declined the incoming call
    LocalRejected,
    /// Remote party declined our call
    RemoteRejected,
    /// Remote device was busy on another call
    RemoteBusy,
    /// Nobody answered within the ring timeout
    RingTimeout,
    /// ICE negotiation failed after the retry budget was exhausted
    NegotiationFailed,
}

/// Sound cue for the UI layer; the engine never plays audio itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    /// Loop the incoming-call ringtone
    Ringtone,
    /// Stop the ringtone
    RingtoneStop,
    /// Short call-connected tone
    CallStart,
    /// Short call-ended tone
    CallEnd,
}

/// Event emitted to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// The session phase changed
    PhaseChanged {
        /// New phase
        phase: CallPhase,
    },
    /// An inbound call is ringing
    IncomingCall {
        /// Who is calling
        caller: UserId,
        /// Caller display snapshot
        display: RemoteDisplay,
        /// Video call?
        is_video: bool,
    },
    /// An outbound call-request was sent and is ringing remotely
    OutgoingRinging {
        /// Who is being called
        callee: UserId,
    },
    /// Media is flowing; the duration counter is running
    CallConnected,
    /// The remote media stream was attached
    RemoteStream,
    /// The session was torn down
    CallEnded {
        /// Distinguishable teardown reason
        reason: TeardownReason,
    },
    /// The remote device replied busy
    Busy {
        /// User-visible busy notice
        message: String,
    },
    /// Play or stop a sound
    Sound(SoundCue),
}

/// Read-only snapshot of the session for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current phase
    pub phase: CallPhase,
    /// Call identifier, if a session exists
    pub call_id: Option<CallId>,
    /// Backend call-history record, once assigned
    pub call_history_id: Option<CallHistoryId>,
    /// The authenticated local user
    pub local_user: UserId,
    /// The other participant, if a session exists
    pub remote_user: Option<UserId>,
    /// Video call? Fixed for the session lifetime
    pub is_video: bool,
    /// Remote display snapshot
    pub remote_display: Option<RemoteDisplay>,
    /// Local microphone muted?
    pub muted: bool,
    /// Local camera enabled?
    pub video_enabled: bool,
    /// When the session was created (dial or ring start)
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// When both parties committed to the call
    pub connected_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Seconds since the call went live, 0 unless active
    pub duration_seconds: u64,
}
