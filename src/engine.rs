//! Call engine
//!
//! Single-writer orchestrator for the whole call lifecycle: the UI calls its
//! async methods, the signal router feeds it inbound envelopes, the peer
//! connection feeds it ICE/media events, and everything funnels through one
//! session lock. UI state flows back out as a broadcast event stream.
//!
//! Timed work (ring timeout, disconnect grace, retry backoff) runs in
//! spawned tasks that re-check the session epoch under the lock before
//! acting, so a torn-down or replaced session silently invalidates them.

use crate::media::{MediaError, MediaPlatform, PeerEvent};
use crate::peer::PeerSession;
use crate::retry::RetryPolicy;
use crate::router::SignalRouter;
use crate::session::CallSession;
use crate::signaling::{CallRequest, Signal, SignalEnvelope, SignalTransport, TransportError};
use crate::timer::CallTimer;
use crate::types::{
    CallEvent, CallHistoryId, CallId, CallPhase, IceConnectionState, RemoteDisplay,
    SessionSnapshot, SoundCue, TeardownReason, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Busy notice shown to a caller whose callee is already engaged
pub const BUSY_MESSAGE: &str = "User is on another call.";

/// Call engine errors surfaced to the UI layer
#[derive(Error, Debug)]
pub enum EngineError {
    /// The requested transition is not legal in the current phase
    #[error("invalid call state: {0}")]
    InvalidState(&'static str),

    /// Microphone/camera permission was refused
    #[error("media access denied")]
    MediaAccessDenied,

    /// No suitable capture device exists
    #[error("no suitable media device")]
    DeviceUnavailable,

    /// The signaling bus failed
    #[error(transparent)]
    Signaling(#[from] TransportError),

    /// ICE negotiation failed after the retry budget was exhausted
    #[error("negotiation failed")]
    NegotiationFailure,

    /// The remote device is on another call
    #[error("remote device busy")]
    PeerBusy,

    /// Media platform failure
    #[error("media failure: {0}")]
    Media(String),
}

impl From<MediaError> for EngineError {
    fn from(error: MediaError) -> Self {
        match error {
            MediaError::AccessDenied => Self::MediaAccessDenied,
            MediaError::DeviceUnavailable => Self::DeviceUnavailable,
            MediaError::InvalidState(what) => Self::InvalidState(what),
            MediaError::Platform(message) => Self::Media(message),
        }
    }
}

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an unanswered call rings before being abandoned
    pub ring_timeout: Duration,
    /// Reconnection schedule for degraded peer connections
    pub retry: RetryPolicy,
    /// Capacity of the UI event channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            event_capacity: 64,
        }
    }
}

struct Inner {
    session: CallSession,
    peer: PeerSession,
    timer: CallTimer,
    inbound_task: Option<JoinHandle<()>>,
}

/// The call engine: one per logged-in device.
///
/// Construct with [`CallEngine::new`], then [`start`](Self::start) to begin
/// receiving signals. All lifecycle methods are safe to call from any task.
pub struct CallEngine<T: SignalTransport> {
    router: SignalRouter<T>,
    platform: Arc<dyn MediaPlatform>,
    local_display: RemoteDisplay,
    config: EngineConfig,
    events: broadcast::Sender<CallEvent>,
    inner: Mutex<Inner>,
}

impl<T: SignalTransport> CallEngine<T> {
    /// Create an engine for the local user
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        platform: Arc<dyn MediaPlatform>,
        local_user: UserId,
        local_display: RemoteDisplay,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            router: SignalRouter::new(transport, local_user),
            platform: Arc::clone(&platform),
            local_display,
            config: config.clone(),
            events,
            inner: Mutex::new(Inner {
                session: CallSession::new(local_user),
                peer: PeerSession::new(platform, config.retry),
                timer: CallTimer::new(),
                inbound_task: None,
            }),
        })
    }

    /// The authenticated local user
    #[must_use]
    pub fn local_user(&self) -> UserId {
        self.router.local_user()
    }

    /// Subscribe to the UI event stream
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Read-only snapshot of the session for rendering
    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        inner.session.snapshot(inner.timer.seconds())
    }

    /// Seconds since the call went live, 0 unless connected
    pub async fn duration_seconds(&self) -> u64 {
        self.inner.lock().await.timer.seconds()
    }

    /// Subscribe to the per-user topic and start processing inbound signals.
    /// Called once per login session.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription fails
    #[tracing::instrument(skip(self), fields(user = %self.local_user()))]
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut signals = self.router.start().await?;
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(envelope) = signals.recv().await {
                engine.handle_signal(envelope).await;
            }
            tracing::debug!("Inbound signal stream closed");
        });
        self.inner.lock().await.inbound_task = Some(task);
        Ok(())
    }

    /// Tear down any live call and stop processing signals. Called on logout.
    ///
    /// # Errors
    ///
    /// Returns error if the unsubscribe fails
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.lock().await;
            if !inner.session.is_idle() {
                self.signal_hangup(&mut inner).await;
                self.teardown(&mut inner, TeardownReason::LocalEnded).await;
            }
            if let Some(task) = inner.inbound_task.take() {
                task.abort();
            }
        }
        self.router.shutdown().await?;
        Ok(())
    }

    /// Start an outbound call. Acquires local media first; the call-request
    /// only goes out once the devices are live.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] if a session already exists,
    /// [`EngineError::MediaAccessDenied`] / [`EngineError::DeviceUnavailable`]
    /// if media cannot be acquired, or a signaling error if the request
    /// cannot be published. On any error the engine is back to idle.
    #[tracing::instrument(skip(self, callee_display), fields(user = %self.local_user(), callee = %callee))]
    pub async fn initiate_call(
        self: &Arc<Self>,
        callee: UserId,
        callee_display: RemoteDisplay,
        is_video: bool,
    ) -> Result<CallId, EngineError> {
        let (call_id, epoch) = {
            let mut inner = self.inner.lock().await;
            if !inner.session.is_idle() {
                return Err(EngineError::InvalidState("call already in progress"));
            }
            let call_id = inner.session.begin_outgoing(callee, callee_display, is_video);
            inner.session.set_op_in_flight(true);
            (call_id, inner.session.epoch())
        };

        let media = self.platform.acquire_local_media(is_video).await;

        let mut inner = self.inner.lock().await;
        if inner.session.epoch() != epoch {
            // The session was torn down while we waited on the platform
            if let Ok(media) = media {
                media.stop();
            }
            return Err(EngineError::InvalidState("call ended during setup"));
        }
        inner.session.set_op_in_flight(false);
        let media = match media {
            Ok(media) => media,
            Err(error) => {
                tracing::warn!(%error, "Local media unavailable, abandoning call");
                self.quiet_reset(&mut inner).await;
                return Err(error.into());
            }
        };
        inner.peer.install_local_media(media);

        let request = CallRequest {
            caller_id: self.local_user(),
            receiver_id: callee,
            is_video_call: is_video,
            caller_name: self.local_display.name.clone(),
            caller_avatar: self.local_display.avatar_url.clone(),
        };
        if let Err(error) = self.router.send_call_request(request).await {
            tracing::error!(%error, "Failed to publish call-request");
            self.quiet_reset(&mut inner).await;
            return Err(error.into());
        }

        self.spawn_ring_timeout(epoch);
        self.emit(CallEvent::PhaseChanged {
            phase: CallPhase::Outgoing,
        });
        self.emit(CallEvent::OutgoingRinging { callee });
        tracing::info!(%call_id, "Outgoing call ringing");
        Ok(call_id)
    }

    /// Accept the ringing incoming call. The accept signal is only published
    /// after local media is live, so the caller's offer never races our
    /// device setup.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] without a ringing incoming call.
    /// If media cannot be acquired the call is rejected on our behalf and the
    /// media error is returned.
    #[tracing::instrument(skip(self), fields(user = %self.local_user()))]
    pub async fn accept_call(&self) -> Result<(), EngineError> {
        let (epoch, caller, history, is_video) = {
            let mut inner = self.inner.lock().await;
            if inner.session.phase() != CallPhase::Incoming {
                return Err(EngineError::InvalidState("no incoming call"));
            }
            if inner.session.op_in_flight() {
                return Err(EngineError::InvalidState("operation already in flight"));
            }
            let caller = inner
                .session
                .remote_user()
                .ok_or(EngineError::InvalidState("no remote party"))?;
            inner.session.set_op_in_flight(true);
            (
                inner.session.epoch(),
                caller,
                inner.session.call_history_id(),
                inner.session.is_video(),
            )
        };
        self.emit(CallEvent::Sound(SoundCue::RingtoneStop));

        let media = self.platform.acquire_local_media(is_video).await;

        let mut inner = self.inner.lock().await;
        if inner.session.epoch() != epoch {
            if let Ok(media) = media {
                media.stop();
            }
            return Err(EngineError::InvalidState("call ended during setup"));
        }
        inner.session.set_op_in_flight(false);
        let media = match media {
            Ok(media) => media,
            Err(error) => {
                tracing::warn!(%error, "Local media unavailable, rejecting call");
                let _ = self.router.send_reject(caller, history).await;
                self.teardown(&mut inner, TeardownReason::LocalRejected).await;
                return Err(error.into());
            }
        };
        inner.peer.install_local_media(media);

        if let Err(error) = self.router.send_accept(caller, history).await {
            tracing::error!(%error, "Failed to publish call-accept");
            self.quiet_reset(&mut inner).await;
            return Err(error.into());
        }
        inner.session.set_active();
        self.emit(CallEvent::PhaseChanged {
            phase: CallPhase::Active,
        });
        tracing::info!(%caller, "Call accepted, awaiting offer");
        Ok(())
    }

    /// Decline the ringing incoming call
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] without a ringing incoming call
    #[tracing::instrument(skip(self), fields(user = %self.local_user()))]
    pub async fn reject_call(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.session.phase() != CallPhase::Incoming {
            return Err(EngineError::InvalidState("no incoming call"));
        }
        let caller = inner
            .session
            .remote_user()
            .ok_or(EngineError::InvalidState("no remote party"))?;
        let history = inner.session.call_history_id();
        // Best effort; local teardown happens regardless
        if let Err(error) = self.router.send_reject(caller, history).await {
            tracing::warn!(%error, "Failed to publish call-reject");
        }
        self.teardown(&mut inner, TeardownReason::LocalRejected).await;
        Ok(())
    }

    /// Hang up. A no-op when idle; an incoming call that has not been
    /// accepted is rejected instead of ended.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for transports that
    /// must confirm the hangup
    #[tracing::instrument(skip(self), fields(user = %self.local_user()))]
    pub async fn end_call(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        match inner.session.phase() {
            CallPhase::Idle => Ok(()),
            CallPhase::Incoming => {
                let caller = inner
                    .session
                    .remote_user()
                    .ok_or(EngineError::InvalidState("no remote party"))?;
                let history = inner.session.call_history_id();
                if let Err(error) = self.router.send_reject(caller, history).await {
                    tracing::warn!(%error, "Failed to publish call-reject");
                }
                self.teardown(&mut inner, TeardownReason::LocalRejected).await;
                Ok(())
            }
            _ => {
                self.signal_hangup(&mut inner).await;
                self.teardown(&mut inner, TeardownReason::LocalEnded).await;
                Ok(())
            }
        }
    }

    /// Toggle the local microphone; returns the new muted state
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] when idle
    pub async fn toggle_mute(&self) -> Result<bool, EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.session.is_idle() {
            return Err(EngineError::InvalidState("no call in progress"));
        }
        let muted = inner.session.toggle_muted();
        inner.peer.set_muted(muted);
        tracing::debug!(muted, "Microphone toggled");
        Ok(muted)
    }

    /// Toggle the local camera; returns the new enabled state
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] when idle or on an audio-only
    /// call
    pub async fn toggle_video(&self) -> Result<bool, EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.session.is_idle() {
            return Err(EngineError::InvalidState("no call in progress"));
        }
        if !inner.session.is_video() {
            return Err(EngineError::InvalidState("audio-only call"));
        }
        let enabled = inner.session.toggle_video_enabled();
        inner.peer.set_video_enabled(enabled);
        tracing::debug!(enabled, "Camera toggled");
        Ok(enabled)
    }

    fn emit(&self, event: CallEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Publish `call-end` for the current session, best effort
    async fn signal_hangup(&self, inner: &mut Inner) {
        let Some((caller, receiver)) = inner.session.initiation_pair() else {
            return;
        };
        let history = inner.session.call_history_id();
        if let Err(error) = self.router.send_end(caller, receiver, history).await {
            tracing::warn!(%error, "Failed to publish call-end");
        }
    }

    /// The call is live: start the duration counter once and tell the UI.
    /// Fires on the first of applied answer or ICE connected.
    fn mark_connected(&self, inner: &mut Inner) {
        if inner.timer.is_running() {
            return;
        }
        inner.timer.start();
        self.emit(CallEvent::Sound(SoundCue::CallStart));
        self.emit(CallEvent::CallConnected);
    }

    /// Release everything and return to idle without emitting events
    async fn quiet_reset(&self, inner: &mut Inner) {
        inner.timer.stop();
        inner.peer.close().await;
        inner.session.reset();
    }

    /// Release everything, return to idle, and tell the UI why
    async fn teardown(&self, inner: &mut Inner, reason: TeardownReason) {
        let phase = inner.session.phase();
        self.quiet_reset(inner).await;
        if phase == CallPhase::Incoming {
            self.emit(CallEvent::Sound(SoundCue::RingtoneStop));
        }
        if phase == CallPhase::Active {
            self.emit(CallEvent::Sound(SoundCue::CallEnd));
        }
        self.emit(CallEvent::CallEnded { reason });
        self.emit(CallEvent::PhaseChanged {
            phase: CallPhase::Idle,
        });
        tracing::info!(?reason, "Call torn down");
    }

    fn spawn_ring_timeout(self: &Arc<Self>, epoch: u64) {
        let engine = Arc::clone(self);
        let timeout = self.config.ring_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            engine.ring_timed_out(epoch).await;
        });
    }

    async fn ring_timed_out(&self, epoch: u64) {
        let mut inner = self.inner.lock().await;
        if inner.session.epoch() != epoch {
            return;
        }
        match inner.session.phase() {
            CallPhase::Outgoing => {
                tracing::info!("Outgoing call unanswered, giving up");
                self.signal_hangup(&mut inner).await;
                self.teardown(&mut inner, TeardownReason::RingTimeout).await;
            }
            CallPhase::Incoming => {
                tracing::info!("Incoming call unanswered, auto-rejecting");
                if let (Some(caller), history) = (
                    inner.session.remote_user(),
                    inner.session.call_history_id(),
                ) {
                    if let Err(error) = self.router.send_reject(caller, history).await {
                        tracing::warn!(%error, "Failed to publish call-reject");
                    }
                }
                self.teardown(&mut inner, TeardownReason::RingTimeout).await;
            }
            _ => {}
        }
    }

    #[tracing::instrument(skip_all, fields(user = %self.local_user(), signal = envelope.signal.kind()))]
    async fn handle_signal(self: &Arc<Self>, envelope: SignalEnvelope) {
        let mut inner = self.inner.lock().await;
        match envelope.signal {
            Signal::CallRequest(request) => {
                self.handle_call_request(&mut inner, request, envelope.call_history_id)
                    .await;
            }
            Signal::CallAccept {} => {
                if inner.session.phase() != CallPhase::Outgoing || !inner.session.first_accept() {
                    tracing::debug!("Ignoring call-accept");
                    return;
                }
                if let Some(history) = envelope.call_history_id {
                    inner.session.set_call_history_id(history);
                }
                inner.session.set_active();
                self.emit(CallEvent::PhaseChanged {
                    phase: CallPhase::Active,
                });
                let epoch = inner.session.epoch();
                if let Err(error) = self.negotiate_as_caller(&mut inner, epoch).await {
                    tracing::warn!(%error, "Initial negotiation failed");
                    self.handle_connection_failure(&mut inner).await;
                }
            }
            Signal::CallReject {} => {
                if inner.session.phase() != CallPhase::Outgoing || !inner.session.first_reject() {
                    tracing::debug!("Ignoring call-reject");
                    return;
                }
                self.teardown(&mut inner, TeardownReason::RemoteRejected).await;
            }
            Signal::CallBusy { message } => {
                if inner.session.phase() != CallPhase::Outgoing || !inner.session.first_busy() {
                    tracing::debug!("Ignoring call-busy");
                    return;
                }
                let message = if message.is_empty() {
                    BUSY_MESSAGE.to_string()
                } else {
                    message
                };
                self.emit(CallEvent::Busy { message });
                self.teardown(&mut inner, TeardownReason::RemoteBusy).await;
            }
            Signal::CallEnd {} => {
                if inner.session.is_idle() {
                    return;
                }
                // Skip our own relayed hangup
                if envelope.ended_by_id == Some(self.local_user()) {
                    return;
                }
                self.teardown(&mut inner, TeardownReason::RemoteEnded).await;
            }
            Signal::Offer { offer } => {
                if inner.session.phase() != CallPhase::Active
                    || inner.session.is_caller()
                    || !inner.session.first_offer()
                {
                    tracing::debug!("Ignoring offer");
                    return;
                }
                if let Err(error) = self.answer_offer(&mut inner, offer).await {
                    tracing::warn!(%error, "Failed to answer offer");
                    self.handle_connection_failure(&mut inner).await;
                }
            }
            Signal::Answer { answer } => {
                if inner.session.phase() != CallPhase::Active
                    || !inner.session.is_caller()
                    || !inner.session.first_answer()
                {
                    tracing::debug!("Ignoring answer");
                    return;
                }
                match inner.peer.apply_remote_description(answer).await {
                    Ok(()) => self.mark_connected(&mut inner),
                    Err(error) => {
                        tracing::warn!(%error, "Failed to apply answer");
                        self.handle_connection_failure(&mut inner).await;
                    }
                }
            }
            Signal::IceCandidate { candidate } => {
                if inner.session.is_idle() {
                    tracing::debug!("ICE candidate with no session, dropping");
                    return;
                }
                inner.peer.apply_ice_candidate(candidate).await;
            }
        }
    }

    async fn handle_call_request(
        self: &Arc<Self>,
        inner: &mut Inner,
        request: CallRequest,
        history: Option<CallHistoryId>,
    ) {
        // The backend echoes the request to the caller, carrying the
        // freshly assigned call-history id
        if request.caller_id == self.local_user() {
            if inner.session.phase() == CallPhase::Outgoing
                && inner.session.remote_user() == Some(request.receiver_id)
            {
                if let Some(history) = history {
                    inner.session.set_call_history_id(history);
                }
            }
            return;
        }

        if inner.session.phase() == CallPhase::Outgoing
            && inner.session.remote_user() == Some(request.caller_id)
        {
            // Both sides dialed each other; the lower user id yields and
            // takes the callee role, the higher keeps ringing as caller
            if self.local_user() < request.caller_id {
                tracing::info!(caller = %request.caller_id, "Simultaneous call, yielding to remote caller");
                self.quiet_reset(inner).await;
            } else {
                tracing::info!(caller = %request.caller_id, "Simultaneous call, keeping caller role");
                return;
            }
        } else if inner.session.phase() == CallPhase::Incoming
            && inner.session.remote_user() == Some(request.caller_id)
        {
            tracing::debug!("Duplicate call-request, already ringing");
            return;
        } else if !inner.session.is_idle() {
            tracing::info!(caller = %request.caller_id, "Busy, declining new caller");
            if let Err(error) = self
                .router
                .send_busy(request.caller_id, BUSY_MESSAGE.to_string())
                .await
            {
                tracing::warn!(%error, "Failed to publish call-busy");
            }
            return;
        }

        inner.session.begin_incoming(&request, history);
        self.spawn_ring_timeout(inner.session.epoch());
        self.emit(CallEvent::PhaseChanged {
            phase: CallPhase::Incoming,
        });
        self.emit(CallEvent::IncomingCall {
            caller: request.caller_id,
            display: RemoteDisplay::new(request.caller_name, request.caller_avatar),
            is_video: request.is_video_call,
        });
        self.emit(CallEvent::Sound(SoundCue::Ringtone));
        tracing::info!(caller = %request.caller_id, "Incoming call ringing");
    }

    /// Caller side: open a connection over the already-acquired media, send
    /// the offer. Used for the first negotiation and every retry.
    async fn negotiate_as_caller(
        self: &Arc<Self>,
        inner: &mut Inner,
        epoch: u64,
    ) -> Result<(), EngineError> {
        let remote = inner
            .session
            .remote_user()
            .ok_or(EngineError::InvalidState("no remote party"))?;
        let events = inner.peer.open_connection().await?;
        self.spawn_peer_pump(epoch, events);
        let offer = inner.peer.create_offer().await?;
        self.router.send_offer(remote, offer).await?;
        tracing::debug!(%remote, "Offer sent");
        Ok(())
    }

    /// Callee side: open a connection if needed, apply the offer, answer
    async fn answer_offer(
        self: &Arc<Self>,
        inner: &mut Inner,
        offer: crate::types::SessionDescription,
    ) -> Result<(), EngineError> {
        let remote = inner
            .session
            .remote_user()
            .ok_or(EngineError::InvalidState("no remote party"))?;
        if !inner.peer.has_connection() {
            let events = inner.peer.open_connection().await?;
            self.spawn_peer_pump(inner.session.epoch(), events);
        }
        inner.peer.apply_remote_description(offer).await?;
        let answer = inner.peer.create_answer().await?;
        self.router.send_answer(remote, answer).await?;
        tracing::debug!(%remote, "Answer sent");
        Ok(())
    }

    fn spawn_peer_pump(self: &Arc<Self>, epoch: u64, mut events: mpsc::Receiver<PeerEvent>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if engine.handle_peer_event(epoch, event).await {
                    break;
                }
            }
        });
    }

    /// Process one peer event; returns true once the session it belonged to
    /// is gone and the pump should stop
    async fn handle_peer_event(self: &Arc<Self>, epoch: u64, event: PeerEvent) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.session.epoch() != epoch {
            return true;
        }
        match event {
            PeerEvent::IceCandidate(candidate) => {
                if let Some(remote) = inner.session.remote_user() {
                    if let Err(error) = self.router.send_ice_candidate(remote, candidate).await {
                        tracing::warn!(%error, "Failed to publish ICE candidate");
                    }
                }
            }
            PeerEvent::RemoteTrack => {
                self.emit(CallEvent::RemoteStream);
            }
            PeerEvent::IceStateChanged(state) => {
                tracing::debug!(?state, "ICE state changed");
                inner.peer.set_ice_state(state);
                match state {
                    IceConnectionState::Connected | IceConnectionState::Completed => {
                        inner.peer.reset_retries();
                        self.mark_connected(&mut inner);
                    }
                    IceConnectionState::Disconnected => {
                        self.spawn_disconnect_grace(epoch, inner.peer.disconnect_grace());
                    }
                    IceConnectionState::Failed => {
                        self.handle_connection_failure(&mut inner).await;
                    }
                    _ => {}
                }
            }
        }
        false
    }

    fn spawn_disconnect_grace(self: &Arc<Self>, epoch: u64, grace: Duration) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut inner = engine.inner.lock().await;
            if inner.session.epoch() != epoch {
                return;
            }
            if inner.peer.ice_state() == IceConnectionState::Disconnected {
                tracing::warn!("Connection did not recover within grace window");
                engine.handle_connection_failure(&mut inner).await;
            }
        });
    }

    /// The connection degraded past recovery: the caller re-negotiates with
    /// backoff until the budget runs out, the callee reopens its duplicate
    /// guards and waits for the re-offer
    async fn handle_connection_failure(self: &Arc<Self>, inner: &mut Inner) {
        let epoch = inner.session.epoch();
        if inner.session.is_caller() {
            match inner.peer.next_retry_delay() {
                Some(delay) => {
                    tracing::warn!(
                        ?delay,
                        attempt = inner.peer.retry_count(),
                        "Scheduling renegotiation"
                    );
                    self.schedule_reconnect(epoch, delay);
                }
                None => {
                    tracing::error!("Renegotiation budget exhausted");
                    self.teardown(inner, TeardownReason::NegotiationFailed).await;
                }
            }
        } else if inner.peer.next_retry_delay().is_some() {
            inner.session.reopen_negotiation();
            tracing::warn!("Awaiting renegotiation from caller");
        } else {
            tracing::error!("Renegotiation budget exhausted");
            self.teardown(inner, TeardownReason::NegotiationFailed).await;
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, epoch: u64, delay: Duration) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.attempt_reconnect(epoch).await;
        });
    }

    async fn attempt_reconnect(self: Arc<Self>, epoch: u64) {
        let mut inner = self.inner.lock().await;
        if inner.session.epoch() != epoch || inner.session.phase() != CallPhase::Active {
            return;
        }
        inner.session.reopen_negotiation();
        if let Err(error) = self.negotiate_as_caller(&mut inner, epoch).await {
            tracing::warn!(%error, "Renegotiation attempt failed");
            self.handle_connection_failure(&mut inner).await;
        }
    }
}
