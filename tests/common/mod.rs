//! Shared test doubles: an in-process signaling bus that mimics the backend
//! relay, and a scripted media platform.

#![allow(dead_code)]

use async_trait::async_trait;
use chat_call_core::{
    CallEngine, CallEvent, CallHistoryId, EngineConfig, IceCandidateInit, LocalMediaHandle,
    MediaError, MediaPlatform, PeerConnectionApi, PeerEvent, RemoteDisplay, SessionDescription,
    SignalEnvelope, SignalTransport, TransportError, UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// In-process stand-in for the server-side relay: routes verb and pair
/// addresses onto per-user topics, assigns call-history ids, and echoes
/// call-requests back to the caller the way the backend does.
pub struct LoopbackBus {
    topics: Mutex<HashMap<String, mpsc::Sender<SignalEnvelope>>>,
    log: Mutex<Vec<(UserId, String, SignalEnvelope)>>,
    next_history: AtomicI64,
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            next_history: AtomicI64::new(1),
        })
    }

    pub fn endpoint(self: &Arc<Self>, user: UserId) -> Arc<BusEndpoint> {
        Arc::new(BusEndpoint {
            bus: Arc::clone(self),
            user,
        })
    }

    /// Everything published, in publish order: (publisher, address, envelope)
    pub fn log(&self) -> Vec<(UserId, String, SignalEnvelope)> {
        self.log.lock().unwrap().clone()
    }

    /// Push an envelope straight onto a user's topic, bypassing routing
    pub async fn inject(&self, user: UserId, envelope: SignalEnvelope) {
        self.deliver(user, envelope).await;
    }

    async fn deliver(&self, user: UserId, envelope: SignalEnvelope) {
        let tx = self
            .topics
            .lock()
            .unwrap()
            .get(&format!("/topic/call/{user}"))
            .cloned();
        if let Some(tx) = tx {
            let _ = tx.send(envelope).await;
        }
    }
}

/// One user's view of the bus.
pub struct BusEndpoint {
    bus: Arc<LoopbackBus>,
    user: UserId,
}

#[async_trait]
impl SignalTransport for BusEndpoint {
    async fn publish(&self, address: &str, envelope: SignalEnvelope) -> Result<(), TransportError> {
        self.bus
            .log
            .lock()
            .unwrap()
            .push((self.user, address.to_string(), envelope.clone()));

        let parts: Vec<&str> = address.trim_start_matches('/').split('/').collect();
        let parse = |s: &str| -> Result<UserId, TransportError> {
            s.parse::<i64>()
                .map(UserId)
                .map_err(|_| TransportError::PublishFailed(format!("bad address: {address}")))
        };
        match parts.as_slice() {
            // Pair address: deliver to whichever side is not the publisher
            ["app", "call", a, b] => {
                let (a, b) = (parse(a)?, parse(b)?);
                let to = if a == self.user { b } else { a };
                self.bus.deliver(to, envelope).await;
            }
            ["app", "call", a, b, verb] => {
                let (caller, receiver) = (parse(a)?, parse(b)?);
                match *verb {
                    // The backend records the call and relays the request to
                    // the callee, echoing it to the caller with the id
                    "initiate" => {
                        let history =
                            CallHistoryId(self.bus.next_history.fetch_add(1, Ordering::SeqCst));
                        let envelope = envelope.with_history(Some(history));
                        self.bus.deliver(receiver, envelope.clone()).await;
                        self.bus.deliver(caller, envelope).await;
                    }
                    "accept" | "reject" => {
                        self.bus.deliver(caller, envelope).await;
                    }
                    "end" => {
                        self.bus.deliver(caller, envelope.clone()).await;
                        self.bus.deliver(receiver, envelope).await;
                    }
                    _ => {
                        return Err(TransportError::PublishFailed(format!(
                            "unknown verb: {verb}"
                        )))
                    }
                }
            }
            _ => {
                return Err(TransportError::PublishFailed(format!(
                    "unroutable address: {address}"
                )))
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        address: &str,
    ) -> Result<mpsc::Receiver<SignalEnvelope>, TransportError> {
        let (tx, rx) = mpsc::channel(64);
        self.bus
            .topics
            .lock()
            .unwrap()
            .insert(address.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, address: &str) -> Result<(), TransportError> {
        self.bus.topics.lock().unwrap().remove(address);
        Ok(())
    }
}

struct TestMedia;

impl LocalMediaHandle for TestMedia {
    fn set_audio_enabled(&self, _enabled: bool) {}
    fn set_video_enabled(&self, _enabled: bool) {}
    fn has_video(&self) -> bool {
        false
    }
    fn stop(&self) {}
}

struct TestConnection;

#[async_trait]
impl PeerConnectionApi for TestConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::offer("v=0 test-offer"))
    }
    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::answer("v=0 test-answer"))
    }
    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), MediaError> {
        Ok(())
    }
    async fn add_ice_candidate(&self, _candidate: IceCandidateInit) -> Result<(), MediaError> {
        Ok(())
    }
    async fn close(&self) {}
}

/// Scripted media platform: grants canned media and connections, and lets
/// tests push peer events into the most recent connection.
pub struct TestMediaPlatform {
    deny_media: AtomicBool,
    event_txs: Mutex<Vec<mpsc::Sender<PeerEvent>>>,
}

impl TestMediaPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deny_media: AtomicBool::new(false),
            event_txs: Mutex::new(Vec::new()),
        })
    }

    pub fn deny_media(&self) {
        self.deny_media.store(true, Ordering::SeqCst);
    }

    pub async fn push_event(&self, event: PeerEvent) {
        let tx = self.event_txs.lock().unwrap().last().cloned().unwrap();
        tx.send(event).await.unwrap();
    }
}

#[async_trait]
impl MediaPlatform for TestMediaPlatform {
    async fn acquire_local_media(
        &self,
        _is_video: bool,
    ) -> Result<Arc<dyn LocalMediaHandle>, MediaError> {
        if self.deny_media.load(Ordering::SeqCst) {
            return Err(MediaError::AccessDenied);
        }
        Ok(Arc::new(TestMedia))
    }

    async fn create_peer_connection(
        &self,
        _local_media: Arc<dyn LocalMediaHandle>,
    ) -> Result<(Box<dyn PeerConnectionApi>, mpsc::Receiver<PeerEvent>), MediaError> {
        let (tx, rx) = mpsc::channel(16);
        self.event_txs.lock().unwrap().push(tx);
        Ok((Box::new(TestConnection), rx))
    }
}

/// One user with a started engine on the shared bus.
pub struct Party {
    pub engine: Arc<CallEngine<BusEndpoint>>,
    pub platform: Arc<TestMediaPlatform>,
    pub events: broadcast::Receiver<CallEvent>,
}

/// Honor `RUST_LOG` when debugging a failing flow
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn party(bus: &Arc<LoopbackBus>, user: i64, name: &str) -> Party {
    init_tracing();
    let platform = TestMediaPlatform::new();
    let engine = CallEngine::new(
        bus.endpoint(UserId(user)),
        Arc::clone(&platform) as Arc<dyn MediaPlatform>,
        UserId(user),
        RemoteDisplay::new(name, ""),
        EngineConfig::default(),
    );
    engine.start().await.unwrap();
    let events = engine.subscribe_events();
    Party {
        engine,
        platform,
        events,
    }
}

/// Receive events until one matches, failing the test after a timeout
pub async fn wait_for(
    rx: &mut broadcast::Receiver<CallEvent>,
    mut pred: impl FnMut(&CallEvent) -> bool,
) -> CallEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Let spawned tasks drain their queues
pub async fn settle() {
    for _ in 0..12 {
        tokio::task::yield_now().await;
    }
}
