//! Non-blocking UDP dispatcher: reads RTP datagrams off the back-end
//! socket, routes them by the routing extension's player id, and hands
//! them to the registered per-endpoint stream unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use tether_protocol::{RTP_HEADER_LEN, RouteHeader};

use crate::socket::DatagramSocket;

/// How the dispatcher treats incoming datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Forward every routable packet as-is.
    Direct,
    /// Forward in-order packets only; late packets are discarded by RTP
    /// sequence number.
    Locked,
    /// Bridge relay; identical to `Direct` on the receive path.
    Bridge,
}

/// A per-endpoint destination, polymorphic over `send_bytes`.
pub enum StreamSink {
    Channel(Arc<RTCDataChannel>),
    Track(Arc<TrackLocalStaticRTP>),
}

impl StreamSink {
    pub async fn send_bytes(&self, data: &[u8]) -> Result<usize, webrtc::Error> {
        match self {
            StreamSink::Channel(channel) => channel.send(&Bytes::copy_from_slice(data)).await,
            StreamSink::Track(track) => track.write(data).await,
        }
    }
}

/// Registered streams, addressable by routing player id. Registration
/// hands out a local index used for removal.
#[derive(Default)]
pub struct StreamRegistry {
    next_index: usize,
    by_index: HashMap<usize, (u16, Arc<StreamSink>)>,
    by_player: HashMap<u16, usize>,
}

impl StreamRegistry {
    pub fn add_stream(&mut self, player_id: u16, sink: StreamSink) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.by_index.insert(index, (player_id, Arc::new(sink)));
        self.by_player.insert(player_id, index);
        index
    }

    pub fn remove_stream(&mut self, index: usize) {
        if let Some((player_id, _)) = self.by_index.remove(&index)
            && self.by_player.get(&player_id) == Some(&index)
        {
            self.by_player.remove(&player_id);
        }
    }

    pub fn lookup(&self, player_id: u16) -> Option<Arc<StreamSink>> {
        self.by_player
            .get(&player_id)
            .and_then(|index| self.by_index.get(index))
            .map(|(_, sink)| Arc::clone(sink))
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RouteDecision {
    Deliver(u16),
    DropShort,
    DropUnroutable,
    DropOutOfOrder,
}

/// Pure routing decision for one datagram. `last_sequences` tracks the
/// newest RTP sequence number seen per player for `Locked` mode.
fn route_packet(
    packet: &[u8],
    mode: DispatchMode,
    last_sequences: &mut HashMap<u16, u16>,
) -> RouteDecision {
    if packet.len() < RTP_HEADER_LEN {
        return RouteDecision::DropShort;
    }
    let Ok((header, _)) = RouteHeader::parse(packet) else {
        return RouteDecision::DropUnroutable;
    };
    if mode == DispatchMode::Locked {
        let sequence = u16::from_be_bytes([packet[2], packet[3]]);
        match last_sequences.get(&header.player_id).copied() {
            Some(last) => {
                let advance = sequence.wrapping_sub(last);
                if advance == 0 || advance >= 0x8000 {
                    return RouteDecision::DropOutOfOrder;
                }
            }
            None => {}
        }
        last_sequences.insert(header.player_id, sequence);
    }
    RouteDecision::Deliver(header.player_id)
}

/// The dispatcher thread. Owns its socket exclusively; the registry is
/// shared with the bridge, which registers streams as endpoints connect.
pub struct Dispatcher {
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn spawn(
        mut socket: DatagramSocket,
        registry: Arc<Mutex<StreamRegistry>>,
        mode: DispatchMode,
        handle: tokio::runtime::Handle,
    ) -> Self {
        // A bounded wait keeps the loop responsive to `stop` without
        // turning the receive path into a busy poll.
        if let Err(e) = socket.set_receive_timeout(Some(Duration::from_millis(250))) {
            warn!("Could not set dispatcher receive timeout: {e}");
        }
        let running = Arc::new(AtomicBool::new(true));
        let run_flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("tether-dispatch".to_string())
            .spawn(move || {
                let mut last_sequences = HashMap::new();
                while run_flag.load(Ordering::Acquire) {
                    let len = socket.receive(true);
                    if len == 0 {
                        continue;
                    }
                    let packet = socket.binary_data();
                    match route_packet(packet, mode, &mut last_sequences) {
                        RouteDecision::Deliver(player_id) => {
                            let sink = registry
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .lookup(player_id);
                            match sink {
                                Some(sink) => {
                                    if let Err(e) = handle.block_on(sink.send_bytes(packet)) {
                                        debug!(player_id, "Stream rejected packet: {e}");
                                    }
                                }
                                None => trace!(player_id, "No stream registered; packet dropped"),
                            }
                        }
                        RouteDecision::DropShort => {
                            trace!(len, "Dropping runt datagram");
                        }
                        RouteDecision::DropUnroutable => {
                            trace!(len, "Dropping datagram without routing extension");
                        }
                        RouteDecision::DropOutOfOrder => {
                            trace!(len, "Dropping out-of-order datagram");
                        }
                    }
                }
            })
            .expect("failed to spawn dispatcher thread");
        Self {
            running,
            thread: Mutex::new(Some(thread)),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
