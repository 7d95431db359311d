//! The peer endpoint: one WebRTC peer connection, one outbound data
//! channel, and the signalling state machine driving them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use tether_protocol::{CandidateInit, EndpointConfig, MAX_MESSAGE_SIZE, SignalMessage};

use crate::lock;
use crate::sdp::{extract_candidates, extract_mids};
use crate::worker::WorkerQueue;

/// Label of the single outbound data channel per endpoint.
const DATA_CHANNEL_LABEL: &str = "DataConnectionChannel";

/// Signalling lifecycle of an endpoint. Ordering matters: comparisons like
/// `state < Offered` gate the responder's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Startup,
    Signup,
    Offered,
    Connected,
    Closed,
    RtcError,
}

/// Whether this endpoint sends the first SDP or waits for the remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Policy knobs for chunked buffer transfers.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Per-acknowledgement wait before a transfer step counts as timed out.
    pub timeout: Duration,
    /// Abort the transfer on a timed-out acknowledgement instead of
    /// pushing on regardless.
    pub fail_if_not_complete: bool,
    /// Fire-and-forget mode: skip all acknowledgement waits.
    pub dont_wait_for_answer: bool,
    /// Let `send_geometry` retry a whole attribute after a peer error.
    pub retry_on_error_response: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            fail_if_not_complete: true,
            dont_wait_for_answer: false,
            retry_on_error_response: false,
        }
    }
}

pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;
pub type DataCallback = Arc<dyn Fn(Bytes) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn() + Send + Sync>;
pub type SdpCallback = Arc<dyn Fn(String) + Send + Sync>;

pub struct Endpoint {
    config: Mutex<EndpointConfig>,
    role: Mutex<Role>,
    state_tx: watch::Sender<ConnectionState>,
    peer: Mutex<Option<Arc<RTCPeerConnection>>>,
    pub(crate) channel: Mutex<Option<Arc<RTCDataChannel>>>,
    pub(crate) max_message_size: AtomicUsize,
    /// MIDs of the remote description still waiting for an ICE candidate.
    /// The responder's answer is held back until this drains.
    required_candidates: Mutex<HashSet<String>>,
    remote_applied: AtomicBool,
    queue: WorkerQueue,
    signal_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pub(crate) message_callback: Mutex<Option<MessageCallback>>,
    pub(crate) data_callback: Mutex<Option<DataCallback>>,
    on_closed: Mutex<Option<EventCallback>>,
    on_failed: Mutex<Option<EventCallback>>,
    on_ice_complete: Mutex<Option<EventCallback>>,
    on_remote_description: Mutex<Option<SdpCallback>>,
    /// `peerConnectionOptions` from the signalling server, applied at the
    /// next peer-connection construction.
    rtc_options: Mutex<Option<Value>>,
    pub(crate) transfer_options: Mutex<TransferOptions>,
    /// Chunked transfers swap the message callback; two at once on the
    /// same channel would race each other's acknowledgements.
    pub(crate) transfer_lock: tokio::sync::Mutex<()>,
    handle: Mutex<Option<tokio::runtime::Handle>>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig, role: Role) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Startup);
        Arc::new(Self {
            config: Mutex::new(config),
            role: Mutex::new(role),
            state_tx,
            peer: Mutex::new(None),
            channel: Mutex::new(None),
            max_message_size: AtomicUsize::new(MAX_MESSAGE_SIZE),
            required_candidates: Mutex::new(HashSet::new()),
            remote_applied: AtomicBool::new(false),
            queue: WorkerQueue::new("tether-signalling"),
            signal_tx: Mutex::new(None),
            message_callback: Mutex::new(None),
            data_callback: Mutex::new(None),
            on_closed: Mutex::new(None),
            on_failed: Mutex::new(None),
            on_ice_complete: Mutex::new(None),
            on_remote_description: Mutex::new(None),
            rtc_options: Mutex::new(None),
            transfer_options: Mutex::new(TransferOptions::default()),
            transfer_lock: tokio::sync::Mutex::new(()),
            handle: Mutex::new(None),
        })
    }

    /// Build the peer connection and its data channel, wiring all library
    /// callbacks. Also called to reconstruct the endpoint after a
    /// disconnect released the previous peer connection.
    pub async fn initialize(self: &Arc<Self>) -> anyhow::Result<()> {
        *lock(&self.handle) = Some(tokio::runtime::Handle::current());
        self.set_state(ConnectionState::Startup);
        self.remote_applied.store(false, Ordering::Release);
        lock(&self.required_candidates).clear();

        let mut media_engine = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .context("Failed to register interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .context("Failed to create peer connection")?,
        );

        let weak = Arc::downgrade(self);
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(endpoint) = weak.upgrade() else { return };
                match state {
                    RTCPeerConnectionState::Failed => {
                        warn!("Peer connection failed");
                        endpoint.set_state(ConnectionState::RtcError);
                        endpoint.fire(&endpoint.on_failed);
                    }
                    _ => debug!(?state, "Peer connection state changed"),
                }
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_ice_candidate(Box::new(move |candidate| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(endpoint) = weak.upgrade() else { return };
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        endpoint.send_message(SignalMessage::IceCandidate {
                            candidate: CandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid.unwrap_or_default(),
                                sdp_mline_index: init.sdp_mline_index.unwrap_or(0),
                            },
                        });
                    }
                    Err(e) => warn!("Failed to serialize ICE candidate: {e}"),
                }
            })
        }));

        // The remote side opens its own channel towards us; accept it and
        // feed its messages through the same reception path.
        let weak = Arc::downgrade(self);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let weak = weak.clone();
            Box::pin(async move {
                info!(label = dc.label(), "Remote peer opened a data channel");
                let on_message = weak.clone();
                dc.on_message(Box::new(move |msg| {
                    let on_message = on_message.clone();
                    Box::pin(async move {
                        if let Some(endpoint) = on_message.upgrade() {
                            endpoint.handle_channel_message(&msg);
                        }
                    })
                }));
            })
        }));

        let dc = pc
            .create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .context("Failed to create data channel")?;

        let weak = Arc::downgrade(self);
        let pc_weak = Arc::downgrade(&pc);
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                let Some(endpoint) = weak.upgrade() else { return };
                // Cap the negotiated SCTP limit so body lengths always fit
                // the envelope's 16-bit length field. A zero capability
                // means the transport did not report one.
                let negotiated = pc_weak
                    .upgrade()
                    .map(|pc| pc.sctp().get_capabilities().max_message_size as usize)
                    .unwrap_or(0);
                let max = if negotiated == 0 {
                    MAX_MESSAGE_SIZE
                } else {
                    negotiated.min(MAX_MESSAGE_SIZE)
                };
                endpoint.max_message_size.store(max, Ordering::Release);
                info!(max_message_size = max, "Data channel open");
                endpoint.set_state(ConnectionState::Connected);
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_message(Box::new(move |msg| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(endpoint) = weak.upgrade() {
                    endpoint.handle_channel_message(&msg);
                }
            })
        }));

        let weak = Arc::downgrade(self);
        dc.on_close(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(endpoint) = weak.upgrade() else { return };
                info!("Data channel closed");
                endpoint.set_state(ConnectionState::Closed);
                endpoint.fire(&endpoint.on_closed);
            })
        }));

        dc.on_error(Box::new(move |error| {
            Box::pin(async move {
                warn!("Data channel error: {error}");
            })
        }));

        *lock(&self.channel) = Some(dc);

        if self.role() == Role::Initiator {
            // Have the offer ready so signup can publish it immediately.
            let offer = pc
                .create_offer(None)
                .await
                .context("Failed to create offer")?;
            pc.set_local_description(offer)
                .await
                .context("Failed to set local description")?;
        }

        *lock(&self.peer) = Some(pc);
        info!(role = ?self.role(), "Endpoint initialized");
        Ok(())
    }

    // --- accessors -------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    pub fn role(&self) -> Role {
        *lock(&self.role)
    }

    pub fn set_role(&self, role: Role) {
        *lock(&self.role) = role;
    }

    pub fn config(&self) -> EndpointConfig {
        lock(&self.config).clone()
    }

    pub fn id(&self) -> u32 {
        lock(&self.config).id
    }

    pub fn set_id(&self, id: u32) {
        lock(&self.config).id = id;
    }

    /// True while the endpoint can still make progress: not yet torn down,
    /// or the signalling socket is still attached.
    pub fn is_running(&self) -> bool {
        self.state() < ConnectionState::Closed
            || lock(&self.signal_tx)
                .as_ref()
                .is_some_and(|tx| !tx.is_closed())
    }

    /// MIDs still awaiting a remote candidate, sorted for inspection.
    pub fn required_candidates(&self) -> Vec<String> {
        let mut mids: Vec<String> = lock(&self.required_candidates).iter().cloned().collect();
        mids.sort();
        mids
    }

    /// ICE is satisfied once a remote description was applied and every
    /// one of its media sections has received a candidate.
    pub fn ice_satisfied(&self) -> bool {
        self.remote_applied.load(Ordering::Acquire) && lock(&self.required_candidates).is_empty()
    }

    /// Whether a remote description has been applied to the current peer
    /// connection.
    pub fn has_remote_description(&self) -> bool {
        self.remote_applied.load(Ordering::Acquire)
    }

    pub async fn local_description(&self) -> Option<String> {
        let pc = self.peer()?;
        pc.local_description().await.map(|desc| desc.sdp)
    }

    /// Yield until the data channel is up, then wait `extra` on top. Does
    /// not time out on its own; bound it externally if needed.
    pub async fn lock_until_connected(&self, extra: Duration) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Connected).await;
        if !extra.is_zero() {
            tokio::time::sleep(extra).await;
        }
    }

    // --- callbacks -------------------------------------------------------

    pub fn set_message_callback(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        *lock(&self.message_callback) = Some(Arc::new(callback));
    }

    pub fn clear_message_callback(&self) {
        *lock(&self.message_callback) = None;
    }

    pub fn set_data_callback(&self, callback: impl Fn(Bytes) + Send + Sync + 'static) {
        *lock(&self.data_callback) = Some(Arc::new(callback));
    }

    pub fn set_on_closed(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock(&self.on_closed) = Some(Arc::new(callback));
    }

    pub fn set_on_failed(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock(&self.on_failed) = Some(Arc::new(callback));
    }

    pub fn set_on_ice_complete(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock(&self.on_ice_complete) = Some(Arc::new(callback));
    }

    pub fn set_on_remote_description(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        *lock(&self.on_remote_description) = Some(Arc::new(callback));
    }

    pub fn set_transfer_options(&self, options: TransferOptions) {
        *lock(&self.transfer_options) = options;
    }

    pub(crate) fn transfer_options(&self) -> TransferOptions {
        lock(&self.transfer_options).clone()
    }

    // --- signalling ------------------------------------------------------

    /// Attach the sink for outbound signalling JSON. The signalling loop
    /// calls this on connect; tests and the bridge inject their own.
    pub fn attach_signal_sender(&self, tx: mpsc::UnboundedSender<String>) {
        *lock(&self.signal_tx) = Some(tx);
    }

    /// Post an outbound signalling message. All signalling writes funnel
    /// through the worker queue so emission order matches causal order
    /// regardless of which library thread triggered them.
    pub(crate) fn send_message(&self, message: SignalMessage) {
        match serde_json::to_string(&message) {
            Ok(text) => self.send_signal_text(text),
            Err(e) => warn!("Could not serialize signalling message: {e}"),
        }
    }

    pub(crate) fn send_signal_text(&self, text: String) {
        let Some(tx) = lock(&self.signal_tx).clone() else {
            debug!("No signalling sink attached; dropping outbound message");
            return;
        };
        self.queue.add_task(move || {
            let _ = tx.send(text);
        });
    }

    /// Dispatch one inbound signalling message. Malformed or unknown
    /// messages are logged and ignored, never propagated.
    pub async fn handle_signal(self: &Arc<Self>, text: &str) {
        let message: SignalMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unhandled signalling message: {e}");
                debug!(raw = text, "Offending signalling payload");
                return;
            }
        };
        match message {
            SignalMessage::Offer { sdp, .. } => {
                if self.role() == Role::Initiator {
                    warn!("Ignoring remote offer while taking the first step");
                    return;
                }
                self.apply_remote_description(&sdp, true).await;
            }
            SignalMessage::Answer { sdp } => {
                if self.remote_applied.load(Ordering::Acquire) {
                    debug!("Ignoring answer: a remote description is already applied");
                    return;
                }
                self.apply_remote_description(&sdp, false).await;
            }
            SignalMessage::IceCandidate { candidate } => {
                self.handle_remote_candidate(candidate).await;
            }
            SignalMessage::Id { id } => {
                info!(id, "Received server-assigned id");
                self.set_id(id);
            }
            SignalMessage::Role { role } => {
                self.handle_role(&role).await;
            }
            SignalMessage::Config {
                peer_connection_options,
            } => {
                info!("Stored peer connection options for the next initialize");
                *lock(&self.rtc_options) = Some(peer_connection_options);
            }
            SignalMessage::PlayerCount { count } => {
                info!(count, "Players connected");
            }
            SignalMessage::PlayerConnected => {
                info!("Player connected; publishing session description");
                self.enqueue_offer_publication();
            }
            SignalMessage::PlayerDisconnected => {
                warn!("Player disconnected; releasing the peer connection");
                self.reset_peer().await;
            }
            SignalMessage::ServerDisconnected => {
                warn!("Server disconnected; releasing the peer connection");
                self.reset_peer().await;
            }
            SignalMessage::Control { message } => {
                debug!(%message, "Control message");
            }
        }
    }

    /// Bridge-relayed information for this endpoint; shaped like a
    /// signalling message.
    pub async fn on_remote_information(self: &Arc<Self>, message: Value) {
        self.handle_signal(&message.to_string()).await;
    }

    async fn apply_remote_description(self: &Arc<Self>, sdp: &str, is_offer: bool) {
        if let Some(callback) = lock(&self.on_remote_description).clone() {
            callback(sdp.to_string());
        }
        let Some(pc) = self.peer() else {
            warn!("No peer connection to apply the remote description to");
            return;
        };
        let description = if is_offer {
            RTCSessionDescription::offer(sdp.to_string())
        } else {
            RTCSessionDescription::answer(sdp.to_string())
        };
        let description = match description {
            Ok(description) => description,
            Err(e) => {
                warn!("Could not parse remote description: {e}");
                return;
            }
        };
        if let Err(e) = pc.set_remote_description(description).await {
            warn!("Could not apply remote description: {e}");
            return;
        }
        if !self.remote_applied.swap(true, Ordering::AcqRel) {
            let mids = extract_mids(sdp);
            info!(
                required = mids.len(),
                "Remote description applied; awaiting one candidate per media section"
            );
            *lock(&self.required_candidates) = mids.into_iter().collect();
        }
        if is_offer {
            // Produce the answer now; sending it stays gated on the
            // required-candidate set draining.
            match pc.create_answer(None).await {
                Ok(answer) => {
                    if let Err(e) = pc.set_local_description(answer).await {
                        warn!("Could not set local answer: {e}");
                        return;
                    }
                }
                Err(e) => {
                    warn!("Could not create answer: {e}");
                    return;
                }
            }
            self.enqueue_sdp_exchange();
        }
    }

    async fn handle_remote_candidate(self: &Arc<Self>, candidate: CandidateInit) {
        let Some(pc) = self.peer() else {
            warn!("No peer connection to add the remote candidate to");
            return;
        };
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: Some(candidate.sdp_mid.clone()),
            sdp_mline_index: Some(candidate.sdp_mline_index),
            ..Default::default()
        };
        if let Err(e) = pc.add_ice_candidate(init).await {
            warn!(mid = %candidate.sdp_mid, "Could not add remote candidate: {e}");
            return;
        }
        debug!(mid = %candidate.sdp_mid, "Remote candidate added");

        let became_empty = {
            let mut required = lock(&self.required_candidates);
            required.remove(&candidate.sdp_mid) && required.is_empty()
        };
        if became_empty {
            info!("All required candidates received");
            self.fire(&self.on_ice_complete);
            if self.role() == Role::Responder && self.state() < ConnectionState::Offered {
                self.set_state(ConnectionState::Offered);
                self.enqueue_sdp_exchange();
            }
        }
    }

    async fn handle_role(self: &Arc<Self>, role: &str) {
        if role == "server" {
            info!("Assigned the server role; responding from here on");
            self.set_role(Role::Responder);
            // Prepare a local offer so playerConnected can publish at once.
            let Some(pc) = self.peer() else { return };
            if pc.local_description().await.is_none()
                && !self.remote_applied.load(Ordering::Acquire)
            {
                match pc.create_offer(None).await {
                    Ok(offer) => {
                        if let Err(e) = pc.set_local_description(offer).await {
                            warn!("Could not set local description for server role: {e}");
                        }
                    }
                    Err(e) => warn!("Could not create offer for server role: {e}"),
                }
            }
        } else {
            info!(role, "Assigned a non-server role; taking the first step");
            self.set_role(Role::Initiator);
        }
    }

    /// Queue the answer-plus-candidates exchange. The task re-checks the
    /// candidate gate when it actually runs.
    fn enqueue_sdp_exchange(self: &Arc<Self>) {
        let Some(handle) = lock(&self.handle).clone() else {
            warn!("Endpoint not initialized; cannot queue SDP exchange");
            return;
        };
        let weak = Arc::downgrade(self);
        self.queue.add_task(move || {
            let Some(endpoint) = weak.upgrade() else { return };
            handle.block_on(endpoint.communicate_sdps());
        });
    }

    async fn communicate_sdps(self: &Arc<Self>) {
        let Some(pc) = self.peer() else { return };
        let Some(local) = pc.local_description().await else {
            debug!("No local description to communicate yet");
            return;
        };
        if self.role() == Role::Responder {
            if !lock(&self.required_candidates).is_empty() {
                debug!("Holding the answer until all required candidates arrive");
                return;
            }
            self.send_message(SignalMessage::Answer {
                sdp: local.sdp.clone(),
            });
        }
        for candidate in extract_candidates(&local.sdp) {
            self.send_message(SignalMessage::IceCandidate { candidate });
        }
    }

    /// Publish the local description as an offer, then its candidates.
    fn enqueue_offer_publication(self: &Arc<Self>) {
        let Some(handle) = lock(&self.handle).clone() else {
            warn!("Endpoint not initialized; cannot publish an offer");
            return;
        };
        let weak = Arc::downgrade(self);
        self.queue.add_task(move || {
            let Some(endpoint) = weak.upgrade() else { return };
            handle.block_on(async {
                let Some(sdp) = endpoint.local_description().await else {
                    warn!("No local description to publish");
                    return;
                };
                endpoint.send_message(SignalMessage::Offer {
                    sdp: sdp.clone(),
                    endpoint: Some("data".to_string()),
                });
                for candidate in extract_candidates(&sdp) {
                    endpoint.send_message(SignalMessage::IceCandidate { candidate });
                }
            });
        });
    }

    /// Release the peer connection and data channel. The endpoint can be
    /// rebuilt afterwards with another `initialize()`.
    pub async fn reset_peer(&self) {
        let channel = lock(&self.channel).take();
        let peer = lock(&self.peer).take();
        self.remote_applied.store(false, Ordering::Release);
        lock(&self.required_candidates).clear();
        if let Some(dc) = channel {
            let _ = dc.close().await;
        }
        if let Some(pc) = peer {
            let _ = pc.close().await;
        }
    }

    /// Called by the signalling loop when the socket closes cleanly.
    pub(crate) fn signalling_closed(&self) {
        self.set_state(ConnectionState::Closed);
        self.fire(&self.on_closed);
    }

    // --- internals -------------------------------------------------------

    pub(crate) fn peer(&self) -> Option<Arc<RTCPeerConnection>> {
        lock(&self.peer).clone()
    }

    pub(crate) fn data_channel(&self) -> Option<Arc<RTCDataChannel>> {
        lock(&self.channel).clone()
    }

    fn fire(&self, slot: &Mutex<Option<EventCallback>>) {
        if let Some(callback) = lock(slot).clone() {
            callback();
        }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let mut ice_servers = Vec::new();
        if let Some(options) = lock(&self.rtc_options).clone() {
            for server in options
                .get("iceServers")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let urls: Vec<String> = match server.get("urls") {
                    Some(Value::String(url)) => vec![url.clone()],
                    Some(Value::Array(urls)) => urls
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                    _ => Vec::new(),
                };
                if urls.is_empty() {
                    continue;
                }
                ice_servers.push(RTCIceServer {
                    urls,
                    username: server
                        .get("username")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    credential: server
                        .get("credential")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    ..Default::default()
                });
            }
        }
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}
