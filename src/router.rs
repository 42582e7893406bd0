//! Signal routing between the engine and the pub/sub bus
//!
//! Maps semantic signals onto the bus addressing scheme and hands the
//! inbound stream back to the engine. Every device subscribes once to its
//! own per-user topic; outbound addresses carry the (caller, receiver) pair,
//! with dedicated verbs for the lifecycle signals.

use crate::signaling::{
    CallRequest, Signal, SignalEnvelope, SignalTransport, TransportError,
};
use crate::types::{CallHistoryId, IceCandidateInit, SessionDescription, UserId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-user inbound topic
#[must_use]
pub fn inbound_topic(user: UserId) -> String {
    format!("/topic/call/{user}")
}

/// Pair address for SDP/ICE traffic, sender first
#[must_use]
pub fn pair_address(from: UserId, to: UserId) -> String {
    format!("/app/call/{from}/{to}")
}

/// Lifecycle verb address, ordered (caller, receiver) as at initiation
#[must_use]
pub fn verb_address(caller: UserId, receiver: UserId, verb: &str) -> String {
    format!("/app/call/{caller}/{receiver}/{verb}")
}

/// Maps semantic call signals to bus addresses and demultiplexes the inbound
/// per-user topic back to the engine, preserving arrival order.
pub struct SignalRouter<T: SignalTransport> {
    transport: Arc<T>,
    local_user: UserId,
}

impl<T: SignalTransport> SignalRouter<T> {
    /// Create a router for the local user
    #[must_use]
    pub fn new(transport: Arc<T>, local_user: UserId) -> Self {
        Self {
            transport,
            local_user,
        }
    }

    /// The local user this router signals for
    #[must_use]
    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    /// Subscribe to the local user's topic and return the ordered inbound
    /// stream. Called once per login session.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription fails
    #[tracing::instrument(skip(self), fields(user = %self.local_user))]
    pub async fn start(&self) -> Result<mpsc::Receiver<SignalEnvelope>, TransportError> {
        let topic = inbound_topic(self.local_user);
        tracing::info!(topic = %topic, "Subscribing to call signals");
        self.transport.subscribe(&topic).await
    }

    /// Drop the per-user subscription. Called on logout.
    ///
    /// # Errors
    ///
    /// Returns error if the unsubscribe fails
    pub async fn shutdown(&self) -> Result<(), TransportError> {
        self.transport
            .unsubscribe(&inbound_topic(self.local_user))
            .await
    }

    async fn publish(
        &self,
        address: String,
        envelope: SignalEnvelope,
    ) -> Result<(), TransportError> {
        tracing::debug!(address = %address, signal = envelope.signal.kind(), "Publishing signal");
        self.transport.publish(&address, envelope).await
    }

    /// Send the initial call-request; addressed with the pair as it exists
    /// at initiation time, before any session state is shared.
    ///
    /// # Errors
    ///
    /// Returns error if publish fails
    pub async fn send_call_request(&self, request: CallRequest) -> Result<(), TransportError> {
        let address = verb_address(request.caller_id, request.receiver_id, "initiate");
        self.publish(address, SignalEnvelope::new(Signal::CallRequest(request)))
            .await
    }

    /// Accept an incoming call from `caller`
    ///
    /// # Errors
    ///
    /// Returns error if publish fails
    pub async fn send_accept(
        &self,
        caller: UserId,
        history: Option<CallHistoryId>,
    ) -> Result<(), TransportError> {
        let address = verb_address(caller, self.local_user, "accept");
        self.publish(
            address,
            SignalEnvelope::new(Signal::CallAccept {}).with_history(history),
        )
        .await
    }

    /// Reject an incoming call from `caller`
    ///
    /// # Errors
    ///
    /// Returns error if publish fails
    pub async fn send_reject(
        &self,
        caller: UserId,
        history: Option<CallHistoryId>,
    ) -> Result<(), TransportError> {
        let address = verb_address(caller, self.local_user, "reject");
        self.publish(
            address,
            SignalEnvelope::new(Signal::CallReject {}).with_history(history),
        )
        .await
    }

    /// Hang up; the pair keeps initiation order regardless of which side ends
    ///
    /// # Errors
    ///
    /// Returns error if publish fails
    pub async fn send_end(
        &self,
        caller: UserId,
        receiver: UserId,
        history: Option<CallHistoryId>,
    ) -> Result<(), TransportError> {
        let address = verb_address(caller, receiver, "end");
        self.publish(
            address,
            SignalEnvelope::new(Signal::CallEnd {})
                .with_history(history)
                .with_ended_by(self.local_user),
        )
        .await
    }

    /// Reply busy on a new caller's channel without touching the current
    /// session
    ///
    /// # Errors
    ///
    /// Returns error if publish fails
    pub async fn send_busy(
        &self,
        new_caller: UserId,
        message: String,
    ) -> Result<(), TransportError> {
        let address = pair_address(self.local_user, new_caller);
        self.publish(address, SignalEnvelope::new(Signal::CallBusy { message }))
            .await
    }

    /// Send an SDP offer to the remote party
    ///
    /// # Errors
    ///
    /// Returns error if publish fails
    pub async fn send_offer(
        &self,
        to: UserId,
        offer: SessionDescription,
    ) -> Result<(), TransportError> {
        let address = pair_address(self.local_user, to);
        self.publish(address, SignalEnvelope::new(Signal::Offer { offer }))
            .await
    }

    /// Send an SDP answer to the remote party
    ///
    /// # Errors
    ///
    /// Returns error if publish fails
    pub async fn send_answer(
        &self,
        to: UserId,
        answer: SessionDescription,
    ) -> Result<(), TransportError> {
        let address = pair_address(self.local_user, to);
        self.publish(address, SignalEnvelope::new(Signal::Answer { answer }))
            .await
    }

    /// Forward a locally generated ICE candidate; candidates are sent in
    /// generation order
    ///
    /// # Errors
    ///
    /// Returns error if publish fails
    pub async fn send_ice_candidate(
        &self,
        to: UserId,
        candidate: IceCandidateInit,
    ) -> Result<(), TransportError> {
        let address = pair_address(self.local_user, to);
        self.publish(
            address,
            SignalEnvelope::new(Signal::IceCandidate { candidate }),
        )
        .await
    }
}
