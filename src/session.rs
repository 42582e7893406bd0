//! Call session state
//!
//! The single mutable aggregate tracking one call per device. Only the
//! engine mutates it, in response to local actions or inbound signals; the
//! epoch counter lets asynchronous completions detect that the session they
//! were started for is gone.

use crate::signaling::CallRequest;
use crate::types::{
    CallHistoryId, CallId, CallPhase, RemoteDisplay, SessionSnapshot, UserId,
};
use chrono::{DateTime, Utc};

/// Ground-truth state of the device's (at most one) call.
#[derive(Debug)]
pub struct CallSession {
    phase: CallPhase,
    call_id: Option<CallId>,
    call_history_id: Option<CallHistoryId>,
    local_user: UserId,
    remote_user: Option<UserId>,
    is_caller: bool,
    is_video: bool,
    remote_display: Option<RemoteDisplay>,
    muted: bool,
    video_enabled: bool,
    started_at: Option<DateTime<Utc>>,
    connected_at: Option<DateTime<Utc>>,
    epoch: u64,
    op_in_flight: bool,
    // One-shot guards against duplicate inbound signals
    accept_seen: bool,
    reject_seen: bool,
    busy_seen: bool,
    offer_seen: bool,
    answer_seen: bool,
}

impl CallSession {
    /// Create an idle session for the authenticated user
    #[must_use]
    pub fn new(local_user: UserId) -> Self {
        Self {
            phase: CallPhase::Idle,
            call_id: None,
            call_history_id: None,
            local_user,
            remote_user: None,
            is_caller: false,
            is_video: false,
            remote_display: None,
            muted: false,
            video_enabled: true,
            started_at: None,
            connected_at: None,
            epoch: 0,
            op_in_flight: false,
            accept_seen: false,
            reject_seen: false,
            busy_seen: false,
            offer_seen: false,
            answer_seen: false,
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    /// Whether no call exists
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phase == CallPhase::Idle
    }

    /// The local user
    #[must_use]
    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    /// The other participant, if a session exists
    #[must_use]
    pub fn remote_user(&self) -> Option<UserId> {
        self.remote_user
    }

    /// Whether the local user initiated this call
    #[must_use]
    pub fn is_caller(&self) -> bool {
        self.is_caller
    }

    /// Video call?
    #[must_use]
    pub fn is_video(&self) -> bool {
        self.is_video
    }

    /// Microphone muted?
    #[must_use]
    pub fn muted(&self) -> bool {
        self.muted
    }

    /// Camera enabled?
    #[must_use]
    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    /// Backend call-history record, once known
    #[must_use]
    pub fn call_history_id(&self) -> Option<CallHistoryId> {
        self.call_history_id
    }

    /// Session generation; bumped on every begin/reset so stale async
    /// completions can be detected and ignored
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether an asynchronous transition (media acquisition, SDP work) is
    /// pending on this session
    #[must_use]
    pub fn op_in_flight(&self) -> bool {
        self.op_in_flight
    }

    /// Mark the start/end of an in-flight asynchronous transition
    pub fn set_op_in_flight(&mut self, in_flight: bool) {
        self.op_in_flight = in_flight;
    }

    /// The (caller, receiver) pair in initiation order, used for addressing
    #[must_use]
    pub fn initiation_pair(&self) -> Option<(UserId, UserId)> {
        let remote = self.remote_user?;
        if self.is_caller {
            Some((self.local_user, remote))
        } else {
            Some((remote, self.local_user))
        }
    }

    /// Enter `Outgoing` for a call we initiate; returns the new call id
    pub fn begin_outgoing(
        &mut self,
        callee: UserId,
        callee_display: RemoteDisplay,
        is_video: bool,
    ) -> CallId {
        self.reset_flags();
        let call_id = CallId::new();
        tracing::debug!(old_phase = ?self.phase, new_phase = ?CallPhase::Outgoing, %call_id, "Phase transition");
        self.phase = CallPhase::Outgoing;
        self.call_id = Some(call_id);
        self.remote_user = Some(callee);
        self.remote_display = Some(callee_display);
        self.is_caller = true;
        self.is_video = is_video;
        self.started_at = Some(Utc::now());
        self.epoch += 1;
        call_id
    }

    /// Enter `Incoming` for a remote call-request
    pub fn begin_incoming(&mut self, request: &CallRequest, history: Option<CallHistoryId>) {
        self.reset_flags();
        tracing::debug!(old_phase = ?self.phase, new_phase = ?CallPhase::Incoming, caller = %request.caller_id, "Phase transition");
        self.phase = CallPhase::Incoming;
        self.call_id = Some(CallId::new());
        self.call_history_id = history;
        self.remote_user = Some(request.caller_id);
        self.remote_display = Some(RemoteDisplay::new(
            request.caller_name.clone(),
            request.caller_avatar.clone(),
        ));
        self.is_caller = false;
        self.is_video = request.is_video_call;
        self.started_at = Some(Utc::now());
        self.epoch += 1;
    }

    /// Move to `Active` once both parties have committed
    pub fn set_active(&mut self) {
        tracing::debug!(old_phase = ?self.phase, new_phase = ?CallPhase::Active, "Phase transition");
        self.phase = CallPhase::Active;
        self.connected_at = Some(Utc::now());
    }

    /// Record the backend-assigned call-history id
    pub fn set_call_history_id(&mut self, id: CallHistoryId) {
        self.call_history_id = Some(id);
    }

    /// Flip the local mute toggle; returns the new value
    pub fn toggle_muted(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }

    /// Flip the local camera toggle; returns the new value
    pub fn toggle_video_enabled(&mut self) -> bool {
        self.video_enabled = !self.video_enabled;
        self.video_enabled
    }

    /// First `call-accept` for this session? Duplicates return false
    pub fn first_accept(&mut self) -> bool {
        !std::mem::replace(&mut self.accept_seen, true)
    }

    /// First `call-reject` for this session?
    pub fn first_reject(&mut self) -> bool {
        !std::mem::replace(&mut self.reject_seen, true)
    }

    /// First `call-busy` for this session?
    pub fn first_busy(&mut self) -> bool {
        !std::mem::replace(&mut self.busy_seen, true)
    }

    /// First `offer` for this session?
    pub fn first_offer(&mut self) -> bool {
        !std::mem::replace(&mut self.offer_seen, true)
    }

    /// First `answer` for this session?
    pub fn first_answer(&mut self) -> bool {
        !std::mem::replace(&mut self.answer_seen, true)
    }

    /// Allow the next offer to be processed again after a failed attempt or
    /// a re-negotiation round
    pub fn reopen_negotiation(&mut self) {
        self.offer_seen = false;
        self.answer_seen = false;
    }

    /// Destroy the session: back to `Idle`, toggles reset, epoch bumped so
    /// pending async completions become stale
    pub fn reset(&mut self) {
        self.reset_flags();
        tracing::debug!(old_phase = ?self.phase, new_phase = ?CallPhase::Idle, "Phase transition");
        self.phase = CallPhase::Idle;
        self.call_id = None;
        self.call_history_id = None;
        self.remote_user = None;
        self.remote_display = None;
        self.is_caller = false;
        self.is_video = false;
        self.muted = false;
        self.video_enabled = true;
        self.started_at = None;
        self.connected_at = None;
        self.epoch += 1;
    }

    fn reset_flags(&mut self) {
        self.op_in_flight = false;
        self.accept_seen = false;
        self.reject_seen = false;
        self.busy_seen = false;
        self.offer_seen = false;
        self.answer_seen = false;
    }

    /// Read-only snapshot for the UI
    #[must_use]
    pub fn snapshot(&self, duration_seconds: u64) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            call_id: self.call_id,
            call_history_id: self.call_history_id,
            local_user: self.local_user,
            remote_user: self.remote_user,
            is_video: self.is_video,
            remote_display: self.remote_display.clone(),
            muted: self.muted,
            video_enabled: self.video_enabled,
            started_at: self.started_at,
            connected_at: self.connected_at,
            duration_seconds,
        }
    }
}
