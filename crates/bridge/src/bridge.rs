//! The multiplexer: owns the per-endpoint registry, the UDP control and
//! data sockets towards the rendering back-end, the dispatcher, and the
//! shared signalling connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use tether_endpoint::{Endpoint, Role, WorkerQueue};
use tether_protocol::{BridgeConfig, DEFAULT_PLAYER_ID_OFFSET, EndpointConfig, rewrite_player_id};

use crate::dispatch::{DispatchMode, Dispatcher, StreamRegistry, StreamSink};
use crate::lock;
use crate::socket::DatagramSocket;

/// How loudly bridgehead synchronization timeouts are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    Silent,
    Critical,
    All,
}

/// An outbound per-endpoint submission towards the back-end.
pub enum Submission {
    Text(String),
    Binary(Vec<u8>),
}

pub struct Bridge {
    config: BridgeConfig,
    endpoints: Mutex<HashMap<u32, Arc<Endpoint>>>,
    next_id: AtomicU32,
    out_socket: Mutex<DatagramSocket>,
    in_socket: Mutex<DatagramSocket>,
    data_out_socket: Mutex<DatagramSocket>,
    registry: Arc<Mutex<StreamRegistry>>,
    dispatcher: Mutex<Option<Dispatcher>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    queue: WorkerQueue,
    signal_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    need_info: AtomicBool,
    running: Arc<AtomicBool>,
    /// Byte offset of the routing `player_id` field rewritten on outbound
    /// data packets. The back-end has authority over the header layout.
    header_byte_start: AtomicUsize,
    timeout_policy: Mutex<TimeoutPolicy>,
    handle: Mutex<Option<tokio::runtime::Handle>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let out_socket =
            DatagramSocket::new(config.local_address.clone(), config.local_port, true);
        let in_socket =
            DatagramSocket::new(config.remote_address.clone(), config.remote_port, false);
        let data_out_socket =
            DatagramSocket::new(config.local_address.clone(), config.data_out_port(), true);
        Arc::new(Self {
            config,
            endpoints: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            out_socket: Mutex::new(out_socket),
            in_socket: Mutex::new(in_socket),
            data_out_socket: Mutex::new(data_out_socket),
            registry: Arc::new(Mutex::new(StreamRegistry::default())),
            dispatcher: Mutex::new(None),
            listener: Mutex::new(None),
            queue: WorkerQueue::new("tether-bridge"),
            signal_tx: Mutex::new(None),
            need_info: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(true)),
            header_byte_start: AtomicUsize::new(DEFAULT_PLAYER_ID_OFFSET),
            timeout_policy: Mutex::new(TimeoutPolicy::Critical),
            handle: Mutex::new(None),
        })
    }

    /// Open the control sockets towards the back-end.
    pub fn init_connection(&self) -> anyhow::Result<()> {
        {
            let mut out = lock(&self.out_socket);
            out.connect().context("Could not open the bridge OUT socket")?;
        }
        {
            let mut incoming = lock(&self.in_socket);
            incoming
                .connect()
                .context("Could not open the bridge IN socket")?;
            incoming
                .set_receive_timeout(Some(Duration::from_secs(2)))
                .context("Could not bound the bridge IN socket wait")?;
        }
        {
            let mut data_out = lock(&self.data_out_socket);
            data_out
                .connect()
                .context("Could not open the bridge data OUT socket")?;
        }
        info!(
            out_port = self.config.local_port,
            in_port = lock(&self.in_socket).port(),
            data_out_port = self.config.data_out_port(),
            "Bridge sockets open"
        );
        Ok(())
    }

    /// Liveness handshake: send a ping over the OUT socket and wait for
    /// the bridgehead to echo `{"ping":1}` on the IN socket.
    pub fn establish(&self) -> bool {
        if lock(&self.out_socket)
            .send(json!({ "ping": 0 }).to_string().as_bytes())
            .is_err()
        {
            return false;
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let mut socket = lock(&self.in_socket);
            if socket.peek() == 0 {
                drop(socket);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            if socket.receive(true) == 0 {
                continue;
            }
            let pong = socket.string_data().to_string();
            drop(socket);
            match serde_json::from_str::<Value>(&pong) {
                Ok(value) if value["ping"] == 1 => return true,
                Ok(_) | Err(_) => return false,
            }
        }
        false
    }

    /// Whether the control path towards the back-end is set up.
    pub fn established_connection(&self) -> bool {
        lock(&self.in_socket).is_open() && lock(&self.out_socket).is_open()
    }

    pub fn check_signalling_active(&self) -> bool {
        lock(&self.signal_tx)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn set_timeout_policy(&self, policy: TimeoutPolicy) {
        *lock(&self.timeout_policy) = policy;
    }

    /// The back-end dictates where the routing id sits in its packets.
    pub fn set_header_byte_start(&self, offset: usize) {
        self.header_byte_start.store(offset, Ordering::Release);
    }

    pub fn set_need_info(&self, need_info: bool) {
        self.need_info.store(need_info, Ordering::Release);
    }

    /// Serialize work that touches signalling or bridge sockets.
    pub fn create_task(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.add_task(task);
    }

    pub fn endpoint_count(&self) -> usize {
        lock(&self.endpoints).len()
    }

    pub fn endpoint_by_id(&self, id: u32) -> Option<Arc<Endpoint>> {
        lock(&self.endpoints).get(&id).cloned()
    }

    /// Register a WebRTC stream for RTP fan-out and return its local
    /// registry index.
    pub fn add_stream(&self, player_id: u16, sink: StreamSink) -> usize {
        lock(&self.registry).add_stream(player_id, sink)
    }

    pub fn remove_stream(&self, index: usize) {
        lock(&self.registry).remove_stream(index);
    }

    /// Start the RTP receive path.
    pub fn start_dispatcher(&self, mode: DispatchMode) -> anyhow::Result<()> {
        let mut socket = DatagramSocket::new(
            self.config.remote_address.clone(),
            self.config.data_in_port(),
            false,
        );
        socket
            .connect()
            .context("Could not open the bridge data IN socket")?;
        let dispatcher = Dispatcher::spawn(
            socket,
            Arc::clone(&self.registry),
            mode,
            tokio::runtime::Handle::current(),
        );
        *lock(&self.dispatcher) = Some(dispatcher);
        info!(port = self.config.data_in_port(), ?mode, "Dispatcher running");
        Ok(())
    }

    /// Start the listener that drains asynchronous bridgehead JSON off the
    /// IN socket and routes it by endpoint id. Gated by `set_need_info`.
    pub fn start_listener(self: &Arc<Self>) {
        let bridge = Arc::downgrade(self);
        let running = Arc::clone(&self.running);
        let thread = std::thread::Builder::new()
            .name("tether-listen".to_string())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    let Some(bridge) = bridge.upgrade() else { break };
                    if !bridge.need_info.load(Ordering::Acquire) {
                        drop(bridge);
                        std::thread::sleep(Duration::from_millis(20));
                        continue;
                    }
                    let text = {
                        let mut socket = lock(&bridge.in_socket);
                        if socket.peek() == 0 || socket.receive(true) == 0 {
                            None
                        } else {
                            Some(socket.string_data().to_string())
                        }
                    };
                    let Some(text) = text else {
                        drop(bridge);
                        std::thread::sleep(Duration::from_millis(10));
                        continue;
                    };
                    bridge.route_remote_information(&text);
                }
            })
            .expect("failed to spawn listener thread");
        *lock(&self.listener) = Some(thread);
    }

    fn route_remote_information(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!("Discarding unreadable bridgehead message: {e}");
                return;
            }
        };
        let Some(id) = find_id(&value) else {
            debug!("Bridgehead message without an endpoint id");
            return;
        };
        let endpoint = self.endpoint_by_id(id);
        let handle = lock(&self.handle).clone();
        match (endpoint, handle) {
            (Some(endpoint), Some(handle)) => {
                handle.block_on(endpoint.on_remote_information(value));
            }
            (None, _) => warn!(id, "Bridgehead message for unknown endpoint"),
            (_, None) => warn!("Bridge not attached to a runtime yet"),
        }
    }

    /// Send a control message to the bridgehead and wait for its reply on
    /// the IN socket. Blocking; call from a worker task, not an async
    /// context.
    pub fn synchronize(
        &self,
        endpoint: Option<&Arc<Endpoint>>,
        mut message: Value,
        fail_if_not_resolved: bool,
    ) -> anyhow::Result<()> {
        message["id"] = match endpoint {
            Some(endpoint) => json!(endpoint.id()),
            None => json!(-1),
        };
        let transmission = message.to_string();
        lock(&self.out_socket)
            .send(transmission.as_bytes())
            .context("Could not reach the bridgehead")?;

        let answer = {
            let mut socket = lock(&self.in_socket);
            let len = socket.receive(true);
            if len == 0 {
                if *lock(&self.timeout_policy) != TimeoutPolicy::Silent {
                    warn!("No response from the bridgehead");
                }
                if fail_if_not_resolved {
                    anyhow::bail!(
                        "no answer from the bridgehead for a critical synchronization:\n{transmission}"
                    );
                }
                return Ok(());
            }
            socket.string_data().to_string()
        };

        let answer: Value = match serde_json::from_str(&answer) {
            Ok(value) => value,
            Err(e) => {
                if fail_if_not_resolved {
                    return Err(e).context(format!(
                        "unreadable bridgehead response to:\n{transmission}"
                    ));
                }
                return Ok(());
            }
        };
        if answer["type"] == "ok" {
            return Ok(());
        }
        match (endpoint, lock(&self.handle).clone()) {
            (Some(endpoint), Some(handle)) => {
                handle.block_on(endpoint.on_remote_information(answer));
            }
            _ => debug!("Unrouted bridgehead response"),
        }
        Ok(())
    }

    /// Forward an endpoint's traffic to the back-end: JSON goes over the
    /// control OUT socket with the endpoint id injected, binary packets
    /// get their routing id rewritten and leave over the data OUT socket.
    pub fn submit(&self, endpoint: &Endpoint, message: Submission) -> anyhow::Result<()> {
        match message {
            Submission::Text(text) => {
                let value = json!({ "id": endpoint.id(), "data": text });
                lock(&self.out_socket)
                    .send(value.to_string().as_bytes())
                    .context("Could not submit a control message")?;
            }
            Submission::Binary(mut data) => {
                let offset = self.header_byte_start.load(Ordering::Acquire);
                rewrite_player_id(&mut data, offset, endpoint.id() as u16);
                lock(&self.data_out_socket)
                    .send(&data)
                    .context("Could not submit a data packet")?;
            }
        }
        Ok(())
    }

    /// Allocate the next endpoint id, build its peer, and announce it.
    /// Ids are unique and strictly increasing for the bridge's lifetime.
    pub async fn signal_new_endpoint(self: &Arc<Self>) -> anyhow::Result<Arc<Endpoint>> {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let config = EndpointConfig {
            signalling_ip: self.config.signalling_ip.clone(),
            signalling_port: self.config.signalling_port,
            id,
        };
        let endpoint = Endpoint::new(config, Role::Responder);
        endpoint
            .initialize()
            .await
            .context("Failed to initialize the new endpoint")?;

        // The endpoint's outbound signalling is funneled through the
        // bridge connection with its id stamped in.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        endpoint.attach_signal_sender(tx);
        let bridge = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                let Some(bridge) = bridge.upgrade() else { break };
                bridge.submit_to_signalling(&text, id);
            }
        });

        lock(&self.endpoints).insert(id, Arc::clone(&endpoint));
        self.send_signal_text(json!({ "type": "endpoint", "id": id }).to_string());
        info!(id, "Endpoint allocated");
        Ok(endpoint)
    }

    /// Stamp an endpoint id into a signalling message and post it.
    pub fn submit_to_signalling(&self, text: &str, id: u32) {
        let mut value: Value = serde_json::from_str(text).unwrap_or(Value::Null);
        if !value.is_object() {
            value = json!({ "data": text });
        }
        value["id"] = json!(id);
        self.send_signal_text(value.to_string());
    }

    fn send_signal_text(&self, text: String) {
        let Some(tx) = lock(&self.signal_tx).clone() else {
            debug!("No signalling connection; dropping outbound message");
            return;
        };
        self.queue.add_task(move || {
            let _ = tx.send(text);
        });
    }

    /// Connect to the signalling server and route its traffic by endpoint
    /// id until the socket closes.
    pub async fn start_signalling(self: &Arc<Self>) -> anyhow::Result<()> {
        *lock(&self.handle) = Some(tokio::runtime::Handle::current());
        let url = self.config.signalling_url();
        info!(url = %url, "Connecting to signalling server");
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .context("Signalling connection failed")?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<String>();
        *lock(&self.signal_tx) = Some(outbox_tx);
        info!("Signalling server connected");

        loop {
            tokio::select! {
                message = ws_rx.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.on_signalling_message(&text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(len = data.len(), "Ignoring binary signalling payload");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Signalling connection closed");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(e).context("Signalling socket error");
                    }
                    _ => {}
                },
                Some(text) = outbox_rx.recv() => {
                    ws_tx.send(Message::Text(text.into()))
                        .await
                        .context("Failed to write signalling message")?;
                }
            }
        }
    }

    /// Route one inbound signalling message: by endpoint id when one is
    /// present, to bridge-level handling otherwise.
    pub async fn on_signalling_message(self: &Arc<Self>, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Could not read signalling payload: {e}");
                return;
            }
        };
        if let Some(id) = find_id(&message) {
            match self.endpoint_by_id(id) {
                Some(endpoint) => endpoint.handle_signal(text).await,
                None => warn!(id, "Signalling message for unknown endpoint"),
            }
            return;
        }
        match message["type"].as_str() {
            Some("playerConnected") => match self.signal_new_endpoint().await {
                Ok(endpoint) => info!(id = endpoint.id(), "Player connected"),
                Err(e) => warn!("Could not allocate an endpoint: {e:#}"),
            },
            Some("playerCount") => {
                info!(count = message["count"].as_u64().unwrap_or(0), "Players connected");
            }
            other => debug!(?other, "Unrouted signalling message"),
        }
    }

    /// Cooperative shutdown: stop the worker, the dispatcher, and the
    /// listener. The signalling loop ends when its socket closes.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(dispatcher) = lock(&self.dispatcher).take() {
            dispatcher.stop();
        }
        if let Some(listener) = lock(&self.listener).take() {
            let _ = listener.join();
        }
        self.queue.stop();
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Endpoint id carried by a bridge-protocol message, under any of the
/// key names the back-end uses.
fn find_id(message: &Value) -> Option<u32> {
    for key in ["id", "player_id", "app_id"] {
        if let Some(id) = message.get(key).and_then(Value::as_u64) {
            return u32::try_from(id).ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    fn test_config(local_port: u16, data_out_port: u16) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.local_address = "127.0.0.1".to_string();
        config.local_port = local_port;
        config.remote_address = "127.0.0.1".to_string();
        config.remote_port = 0; // ephemeral, learned after bind
        config.data_out_port = Some(data_out_port);
        config
    }

    fn bound() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        socket
    }

    #[test]
    fn find_id_checks_known_keys() {
        assert_eq!(find_id(&json!({"id": 4})), Some(4));
        assert_eq!(find_id(&json!({"player_id": 9})), Some(9));
        assert_eq!(find_id(&json!({"app_id": 1})), Some(1));
        assert_eq!(find_id(&json!({"type": "offer"})), None);
        assert_eq!(find_id(&json!({"id": "7"})), None);
        assert_eq!(find_id(&json!({"id": -3})), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn endpoint_ids_are_monotonic_from_one() {
        let bridge = Bridge::new(test_config(1, 2));
        let first = bridge.signal_new_endpoint().await.unwrap();
        let second = bridge.signal_new_endpoint().await.unwrap();
        let third = bridge.signal_new_endpoint().await.unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(third.id(), 3);
        assert_eq!(bridge.endpoint_count(), 3);
        assert!(bridge.endpoint_by_id(2).is_some());
        assert!(bridge.endpoint_by_id(4).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_rewrites_the_routing_id() {
        let control = bound();
        let data = bound();
        let bridge = Bridge::new(test_config(
            control.local_addr().unwrap().port(),
            data.local_addr().unwrap().port(),
        ));
        bridge.init_connection().unwrap();

        let endpoint = Endpoint::new(EndpointConfig::default(), Role::Responder);
        endpoint.set_id(3);

        // binary submissions leave via the data socket with the id stamped in
        let mut packet = vec![0u8; tether_protocol::RTP_HEADER_LEN];
        packet[0] = 0x80;
        tether_protocol::RouteHeader {
            player_id: 0xFFFF,
            streamer_id: 1,
            meta: 0,
        }
        .append_to(&mut packet);
        bridge
            .submit(&endpoint, Submission::Binary(packet))
            .unwrap();

        let mut buf = [0u8; 2048];
        let (len, _) = data.recv_from(&mut buf).unwrap();
        let (header, _) = tether_protocol::RouteHeader::parse(&buf[..len]).unwrap();
        assert_eq!(header.player_id, 3);
        assert_eq!(header.streamer_id, 1);

        // text submissions leave via the control socket with the id injected
        bridge
            .submit(&endpoint, Submission::Text("status".to_string()))
            .unwrap();
        let (len, _) = control.recv_from(&mut buf).unwrap();
        let value: Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["data"], "status");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn synchronize_resolves_on_ok_answer() {
        let bridgehead = bound();
        let data = bound();
        let bridge = Bridge::new(test_config(
            bridgehead.local_addr().unwrap().port(),
            data.local_addr().unwrap().port(),
        ));
        bridge.init_connection().unwrap();
        let reply_to = ("127.0.0.1", lock(&bridge.in_socket).port());

        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; 2048];
            let (len, _) = bridgehead.recv_from(&mut buf).unwrap();
            let request: Value = serde_json::from_slice(&buf[..len]).unwrap();
            assert_eq!(request["id"], -1);
            assert_eq!(request["probe"], true);
            bridgehead
                .send_to(json!({"type": "ok"}).to_string().as_bytes(), reply_to)
                .unwrap();
        });

        let bridge_for_sync = Arc::clone(&bridge);
        tokio::task::spawn_blocking(move || {
            bridge_for_sync
                .synchronize(None, json!({"probe": true}), true)
                .unwrap();
        })
        .await
        .unwrap();
        responder.join().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn synchronize_fails_closed_without_an_answer() {
        let silent = bound();
        let data = bound();
        let bridge = Bridge::new(test_config(
            silent.local_addr().unwrap().port(),
            data.local_addr().unwrap().port(),
        ));
        bridge.init_connection().unwrap();

        let bridge_for_sync = Arc::clone(&bridge);
        let result = tokio::task::spawn_blocking(move || {
            bridge_for_sync.synchronize(None, json!({"probe": true}), true)
        })
        .await
        .unwrap();
        assert!(result.is_err());

        // without the flag the miss is ignored
        let bridge_for_sync = Arc::clone(&bridge);
        let result = tokio::task::spawn_blocking(move || {
            bridge_for_sync.synchronize(None, json!({"probe": true}), false)
        })
        .await
        .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn establish_ping_pong() {
        let bridgehead = bound();
        let data = bound();
        let bridge = Bridge::new(test_config(
            bridgehead.local_addr().unwrap().port(),
            data.local_addr().unwrap().port(),
        ));
        bridge.init_connection().unwrap();
        let reply_to = ("127.0.0.1", lock(&bridge.in_socket).port());

        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; 256];
            let (len, _) = bridgehead.recv_from(&mut buf).unwrap();
            let request: Value = serde_json::from_slice(&buf[..len]).unwrap();
            assert_eq!(request["ping"], 0);
            bridgehead
                .send_to(json!({"ping": 1}).to_string().as_bytes(), reply_to)
                .unwrap();
        });

        let bridge_for_ping = Arc::clone(&bridge);
        let alive = tokio::task::spawn_blocking(move || bridge_for_ping.establish())
            .await
            .unwrap();
        assert!(alive);
        responder.join().unwrap();
    }
}
