//! Media platform seam
//!
//! Abstraction over the native `getUserMedia` / `RTCPeerConnection`
//! equivalents. The engine drives these traits; a real implementation binds
//! them to the platform media stack, tests use scripted mocks.

use crate::types::{IceCandidateInit, IceConnectionState, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Media platform errors
#[derive(Error, Debug)]
pub enum MediaError {
    /// The user or platform denied microphone/camera access
    #[error("media access denied")]
    AccessDenied,

    /// No suitable capture device exists
    #[error("no suitable media device")]
    DeviceUnavailable,

    /// Operation attempted out of sequence
    #[error("invalid media state: {0}")]
    InvalidState(&'static str),

    /// Other platform failure
    #[error("platform error: {0}")]
    Platform(String),
}

/// Event emitted by a live peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local ICE candidate was gathered and should be signaled to the
    /// remote party
    IceCandidate(IceCandidateInit),
    /// The ICE connection state changed
    IceStateChanged(IceConnectionState),
    /// The remote media stream was attached
    RemoteTrack,
}

/// Handle to the local capture stream (microphone, optionally camera).
pub trait LocalMediaHandle: Send + Sync {
    /// Enable or disable the audio tracks (mute is `enabled = false`)
    fn set_audio_enabled(&self, enabled: bool);

    /// Enable or disable the video tracks
    fn set_video_enabled(&self, enabled: bool);

    /// Whether this stream carries video
    fn has_video(&self) -> bool;

    /// Stop all tracks and release the devices; safe to call repeatedly
    fn stop(&self);
}

/// Handle to one native peer connection.
#[async_trait]
pub trait PeerConnectionApi: Send + Sync {
    /// Create an SDP offer and set it as the local description
    ///
    /// # Errors
    ///
    /// Returns error if the platform rejects offer creation
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    /// Create an SDP answer and set it as the local description
    ///
    /// # Errors
    ///
    /// Returns error if no remote offer has been applied
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    /// Apply the remote offer or answer
    ///
    /// # Errors
    ///
    /// Returns error if the description is malformed
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    /// Apply a remote ICE candidate
    ///
    /// # Errors
    ///
    /// Returns error if the candidate is malformed; callers treat this as
    /// non-fatal since late and duplicate candidates are expected
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), MediaError>;

    /// Close the connection and release native resources; safe to call
    /// repeatedly
    async fn close(&self);
}

/// Factory for local media and peer connections.
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    /// Request microphone access, and camera iff `is_video`
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::AccessDenied`] if permission is refused and
    /// [`MediaError::DeviceUnavailable`] if no suitable device exists
    async fn acquire_local_media(
        &self,
        is_video: bool,
    ) -> Result<Arc<dyn LocalMediaHandle>, MediaError>;

    /// Create a peer connection with the local tracks attached, returning
    /// the connection handle and its ordered event stream
    ///
    /// # Errors
    ///
    /// Returns error if the platform cannot create a connection
    async fn create_peer_connection(
        &self,
        local_media: Arc<dyn LocalMediaHandle>,
    ) -> Result<(Box<dyn PeerConnectionApi>, mpsc::Receiver<PeerEvent>), MediaError>;
}
