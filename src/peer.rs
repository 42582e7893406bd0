//! Peer connection lifecycle
//!
//! Owns the local media handle and the single live peer connection, and
//! enforces the ordering rules the native stack cares about: local media
//! before connection, remote description before ICE candidates. Candidates
//! arriving early are buffered and flushed once the description lands.

use crate::media::{LocalMediaHandle, MediaError, MediaPlatform, PeerEvent};
use crate::retry::RetryPolicy;
use crate::types::{IceCandidateInit, IceConnectionState, SessionDescription};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Controller for the local media and peer connection of one call.
pub struct PeerSession {
    platform: Arc<dyn MediaPlatform>,
    local_media: Option<Arc<dyn LocalMediaHandle>>,
    connection: Option<Box<dyn crate::media::PeerConnectionApi>>,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidateInit>,
    ice_state: IceConnectionState,
    retry_policy: RetryPolicy,
    retry_count: u32,
}

impl PeerSession {
    /// Create an empty controller bound to a media platform
    #[must_use]
    pub fn new(platform: Arc<dyn MediaPlatform>, retry_policy: RetryPolicy) -> Self {
        Self {
            platform,
            local_media: None,
            connection: None,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            ice_state: IceConnectionState::New,
            retry_policy,
            retry_count: 0,
        }
    }

    /// Whether local media has been acquired
    #[must_use]
    pub fn has_local_media(&self) -> bool {
        self.local_media.is_some()
    }

    /// Whether a peer connection is open
    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Last observed ICE connection state
    #[must_use]
    pub fn ice_state(&self) -> IceConnectionState {
        self.ice_state
    }

    /// Record an observed ICE state transition
    pub fn set_ice_state(&mut self, state: IceConnectionState) {
        self.ice_state = state;
    }

    /// The media platform this controller acquires from
    #[must_use]
    pub fn platform(&self) -> Arc<dyn MediaPlatform> {
        Arc::clone(&self.platform)
    }

    /// Install a local media handle acquired outside the session lock
    pub fn install_local_media(&mut self, media: Arc<dyn LocalMediaHandle>) {
        if let Some(old) = self.local_media.replace(media) {
            old.stop();
        }
    }

    /// Open a fresh peer connection over the acquired local media, returning
    /// its ordered event stream. Any previous connection is closed first.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::InvalidState`] without local media, or the
    /// platform's error if connection creation fails
    pub async fn open_connection(&mut self) -> Result<mpsc::Receiver<PeerEvent>, MediaError> {
        let media = self
            .local_media
            .as_ref()
            .ok_or(MediaError::InvalidState("no local media acquired"))?;
        if let Some(old) = self.connection.take() {
            old.close().await;
        }
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.ice_state = IceConnectionState::New;

        let (connection, events) = self
            .platform
            .create_peer_connection(Arc::clone(media))
            .await?;
        self.connection = Some(connection);
        Ok(events)
    }

    /// Create an offer on the open connection
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::InvalidState`] without a connection
    pub async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.connection()?.create_offer().await
    }

    /// Create an answer; requires the remote offer to have been applied
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::InvalidState`] without a connection or before
    /// the remote description is set
    pub async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        if !self.remote_description_set {
            return Err(MediaError::InvalidState("no remote offer applied"));
        }
        self.connection()?.create_answer().await
    }

    /// Apply the remote offer or answer, then flush any ICE candidates that
    /// arrived before it, in arrival order
    ///
    /// # Errors
    ///
    /// Returns error if the description is rejected; buffered candidates
    /// that fail to apply are logged and skipped
    pub async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), MediaError> {
        let connection = self
            .connection
            .as_ref()
            .ok_or(MediaError::InvalidState("no peer connection"))?;
        connection.set_remote_description(desc).await?;
        self.remote_description_set = true;

        let buffered = std::mem::take(&mut self.pending_candidates);
        if !buffered.is_empty() {
            tracing::debug!(count = buffered.len(), "Flushing buffered ICE candidates");
        }
        for candidate in buffered {
            if let Err(error) = connection.add_ice_candidate(candidate).await {
                tracing::warn!(%error, "Dropping buffered ICE candidate");
            }
        }
        Ok(())
    }

    /// Apply a remote ICE candidate, buffering it if the remote description
    /// has not landed yet. Malformed candidates are logged and dropped; the
    /// call survives.
    pub async fn apply_ice_candidate(&mut self, candidate: IceCandidateInit) {
        if !self.remote_description_set {
            self.pending_candidates.push(candidate);
            return;
        }
        let Some(connection) = self.connection.as_ref() else {
            tracing::warn!("ICE candidate with no peer connection, dropping");
            return;
        };
        if let Err(error) = connection.add_ice_candidate(candidate).await {
            tracing::warn!(%error, "Dropping remote ICE candidate");
        }
    }

    /// Candidates currently waiting for the remote description
    #[must_use]
    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Mute or unmute the local microphone
    pub fn set_muted(&self, muted: bool) {
        if let Some(media) = self.local_media.as_ref() {
            media.set_audio_enabled(!muted);
        }
    }

    /// Enable or disable the local camera
    pub fn set_video_enabled(&self, enabled: bool) {
        if let Some(media) = self.local_media.as_ref() {
            media.set_video_enabled(enabled);
        }
    }

    /// Backoff delay before the next re-negotiation attempt, or `None` once
    /// the budget is spent. Advances the attempt counter.
    pub fn next_retry_delay(&mut self) -> Option<Duration> {
        if self.retry_policy.exhausted(self.retry_count) {
            return None;
        }
        let delay = self.retry_policy.delay_for(self.retry_count);
        self.retry_count += 1;
        Some(delay)
    }

    /// Retries attempted since the last successful connection
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Clear the retry counter after a successful (re)connection
    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
    }

    /// Grace window to wait after `disconnected` before escalating
    #[must_use]
    pub fn disconnect_grace(&self) -> Duration {
        self.retry_policy.disconnect_grace
    }

    /// Close the connection and release all devices; idempotent
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        if let Some(media) = self.local_media.take() {
            media.stop();
        }
        self.remote_description_set = false;
        self.pending_candidates.clear();
        self.ice_state = IceConnectionState::Closed;
        self.retry_count = 0;
    }

    fn connection(&self) -> Result<&dyn crate::media::PeerConnectionApi, MediaError> {
        self.connection
            .as_deref()
            .ok_or(MediaError::InvalidState("no peer connection"))
    }
}
