//! Chat call core - peer-to-peer call signaling and session management
//!
//! This library drives one-to-one audio/video calls for a chat application:
//! a single call session per device, WebRTC offer/answer/ICE exchange over a
//! server-relayed pub/sub bus, and the full lifecycle around it. It features:
//!
//! - **Call State Machine**: idle → outgoing/incoming → active, with busy
//!   detection, glare resolution and ring timeouts
//! - **Server-Relayed Signaling**: JSON envelopes over per-user topics,
//!   transport-agnostic behind [`SignalTransport`]
//! - **Media Seam**: platform microphone/camera and peer connections behind
//!   traits, so the engine runs headless in tests
//! - **Resilience**: ICE candidate buffering, duplicate-signal suppression,
//!   reconnection with exponential backoff
//!
//! # Examples
//!
//! ```rust,no_run
//! use chat_call_core::{CallEngine, EngineConfig, RemoteDisplay, UserId};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     transport: Arc<impl chat_call_core::SignalTransport>,
//! #     platform: Arc<dyn chat_call_core::MediaPlatform>,
//! # ) -> Result<(), chat_call_core::EngineError> {
//! let engine = CallEngine::new(
//!     transport,
//!     platform,
//!     UserId(7),
//!     RemoteDisplay::new("Alice", "https://cdn.example/alice.png"),
//!     EngineConfig::default(),
//! );
//! engine.start().await?;
//!
//! // Start a video call
//! let call_id = engine
//!     .initiate_call(UserId(12), RemoteDisplay::new("Bob", ""), true)
//!     .await?;
//!
//! // Render state changes
//! let mut events = engine.subscribe_events();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Core call types and data structures
pub mod types;

/// Signaling wire protocol and transport seam
pub mod signaling;

/// Signal routing and bus addressing
pub mod router;

/// Media platform seam
pub mod media;

/// Reconnection policy
pub mod retry;

/// Call duration timer
pub mod timer;

/// Call session state
pub mod session;

/// Peer connection lifecycle
pub mod peer;

/// The call engine
pub mod engine;

// Re-export main types at crate root
pub use engine::{CallEngine, EngineConfig, EngineError, BUSY_MESSAGE};
pub use media::{LocalMediaHandle, MediaError, MediaPlatform, PeerConnectionApi, PeerEvent};
pub use retry::RetryPolicy;
pub use router::SignalRouter;
pub use session::CallSession;
pub use signaling::{CallRequest, Signal, SignalEnvelope, SignalTransport, TransportError};
pub use timer::CallTimer;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{CallEngine, EngineConfig, EngineError};
    pub use crate::media::{MediaPlatform, PeerEvent};
    pub use crate::retry::RetryPolicy;
    pub use crate::signaling::{SignalEnvelope, SignalTransport};
    pub use crate::types::{
        CallEvent, CallId, CallPhase, RemoteDisplay, SessionSnapshot, TeardownReason, UserId,
    };
}
