//! Application payload traffic over the data channel.
//!
//! Everything the endpoint sends is either a single envelope frame
//! (strings, JSON) or a chunked buffer transfer: a START message, one
//! envelope per chunk, a STOP message, each acknowledged by the peer with
//! `{type:"buffer"}` or rejected with `{type:"error"}`.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;

use tether_protocol::{
    APPLICATION_TAG, ClientMessageTag, ENVELOPE_OVERHEAD, base64_len, buffer_start, buffer_stop,
    chunk_count, encode_envelope, extract_json_payload, wrap_text,
};

use crate::connector::{ConnectionState, Endpoint, MessageCallback, TransferOptions};
use crate::lock;

/// Encoding applied to a buffer before chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    /// Bytes as-is.
    Raw,
    /// Base64-encoded before chunking; the advertised size is the encoded one.
    Base64,
    /// Reserved by the protocol, not implemented.
    Ascii,
}

impl BufferFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            BufferFormat::Raw => "raw",
            BufferFormat::Base64 => "base64",
            BufferFormat::Ascii => "ascii",
        }
    }
}

/// Mesh attributes for `send_geometry`. Vertices and indices are
/// mandatory, the rest optional.
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    pub vertices: Vec<f64>,
    pub indices: Vec<u32>,
    pub normals: Option<Vec<f64>>,
    pub uvs: Option<Vec<f64>>,
    pub tangents: Option<Vec<f64>>,
}

enum BufferAck {
    Confirmed,
    Rejected,
}

impl Endpoint {
    /// Largest single data-channel message the peer accepts.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size.load(Ordering::Acquire)
    }

    /// Send raw bytes as one message. Payloads over the channel limit are
    /// refused; bulk data belongs in `send_buffer`.
    pub async fn send_bytes(&self, data: &[u8]) -> anyhow::Result<()> {
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        let max = self.max_message_size();
        if data.len() > max {
            anyhow::bail!(
                "payload of {} bytes exceeds the channel limit of {max}; use send_buffer",
                data.len()
            );
        }
        let Some(dc) = self.data_channel() else {
            return Ok(());
        };
        dc.send(&Bytes::copy_from_slice(data))
            .await
            .context("Failed to send binary message")?;
        Ok(())
    }

    /// Send a plain string, wrapped in the origin envelope the renderer
    /// expects.
    pub async fn send_string(&self, message: &str) -> anyhow::Result<()> {
        self.send_envelope(wrap_text(message)).await
    }

    /// Send a JSON value as a single envelope frame.
    pub async fn send_json(&self, message: Value) -> anyhow::Result<()> {
        self.send_envelope(message).await
    }

    async fn send_envelope(&self, message: Value) -> anyhow::Result<()> {
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        let Some(dc) = self.data_channel() else {
            return Ok(());
        };
        let body = message.to_string();
        let frame = encode_envelope(APPLICATION_TAG, body.as_bytes())?;
        debug!(len = body.len(), "Sending envelope frame");
        dc.send(&Bytes::from(frame))
            .await
            .context("Failed to send envelope frame")?;
        Ok(())
    }

    /// Transfer a buffer that may exceed the channel limit, chunk by
    /// chunk, waiting for the peer to acknowledge every step unless
    /// configured otherwise. Returns whether the transfer completed (or
    /// was fire-and-forget).
    pub async fn send_buffer(
        &self,
        buffer: &[u8],
        name: &str,
        format: BufferFormat,
    ) -> anyhow::Result<bool> {
        if self.state() != ConnectionState::Connected {
            return Ok(false);
        }
        // One transfer at a time per endpoint: the callback swap below
        // would otherwise eat a concurrent transfer's acknowledgements.
        let _transfer = self.transfer_lock.lock().await;
        let options = self.transfer_options();

        let encoded;
        let source: &[u8] = match format {
            BufferFormat::Raw => buffer,
            BufferFormat::Base64 => {
                encoded = BASE64.encode(buffer).into_bytes();
                &encoded
            }
            BufferFormat::Ascii => anyhow::bail!("the ascii buffer format is reserved"),
        };
        let total_size = source.len();
        let chunk_size = self.max_message_size() - ENVELOPE_OVERHEAD;
        let chunks = chunk_count(total_size, chunk_size);

        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let prior = self.install_ack_filter(ack_tx);

        info!(
            name,
            total_size, chunks, chunk_size, "Starting buffer transfer"
        );
        let mut aborted = false;

        if let Err(e) = self
            .send_json(buffer_start(name, total_size, format.as_str()))
            .await
        {
            warn!("Could not open buffer transfer: {e:#}");
            aborted = true;
        }
        if !aborted && !options.dont_wait_for_answer {
            aborted = !self.await_ack(&mut ack_rx, &options).await;
        }

        for (index, span) in chunk_spans(total_size, chunk_size).enumerate() {
            if aborted {
                break;
            }
            let (begin, end) = span;
            debug!(index, len = end - begin, "Sending chunk");
            match encode_envelope(APPLICATION_TAG, &source[begin..end]) {
                Ok(frame) => {
                    if let Err(e) = self.send_chunk(frame).await {
                        warn!("Chunk transmission failed: {e:#}");
                        aborted = true;
                        break;
                    }
                }
                Err(e) => {
                    warn!("Chunk framing failed: {e}");
                    aborted = true;
                    break;
                }
            }
            if !options.dont_wait_for_answer {
                aborted = !self.await_ack(&mut ack_rx, &options).await;
            }
        }

        if let Err(e) = self.send_json(buffer_stop(name)).await {
            warn!("Could not close buffer transfer: {e:#}");
            aborted = true;
        } else if !options.dont_wait_for_answer {
            aborted = !self.await_ack(&mut ack_rx, &options).await || aborted;
        }

        self.restore_message_callback(prior);
        let completed = options.dont_wait_for_answer || !aborted;
        info!(name, completed, "Buffer transfer finished");
        Ok(completed)
    }

    /// Send one geometry attribute via the chunked-buffer protocol.
    async fn send_attribute(
        &self,
        buffer: &[u8],
        name: &str,
        _retry: bool,
    ) -> anyhow::Result<bool> {
        self.send_buffer(buffer, name, BufferFormat::Base64).await
    }

    pub async fn send_f64_buffer(
        &self,
        values: &[f64],
        name: &str,
        format: BufferFormat,
    ) -> anyhow::Result<bool> {
        self.send_buffer(&f64_bytes(values), name, format).await
    }

    pub async fn send_f32_buffer(
        &self,
        values: &[f32],
        name: &str,
        format: BufferFormat,
    ) -> anyhow::Result<bool> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.send_buffer(&bytes, name, format).await
    }

    pub async fn send_i32_buffer(
        &self,
        values: &[i32],
        name: &str,
        format: BufferFormat,
    ) -> anyhow::Result<bool> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.send_buffer(&bytes, name, format).await
    }

    /// Ship a mesh to the renderer. Small geometries travel as one
    /// `directbase64` message; larger ones fall back to a chunked transfer
    /// per attribute, optionally followed by a spawn request.
    pub async fn send_geometry(
        &self,
        geometry: &Geometry,
        name: &str,
        auto_spawn: bool,
    ) -> anyhow::Result<()> {
        if self.state() != ConnectionState::Connected {
            return Ok(());
        }
        let mut total = 3;
        total += base64_len(geometry.vertices.len() * 8);
        total += base64_len(geometry.indices.len() * 4);
        for attribute in [&geometry.normals, &geometry.uvs, &geometry.tangents]
            .into_iter()
            .flatten()
        {
            total += base64_len(attribute.len() * 8);
        }

        if total < self.max_message_size() {
            let mut message = json!({ "type": "directbase64", "name": name });
            message["points"] = BASE64.encode(f64_bytes(&geometry.vertices)).into();
            message["triangles"] = BASE64.encode(u32_bytes(&geometry.indices)).into();
            if let Some(normals) = &geometry.normals {
                message["normals"] = BASE64.encode(f64_bytes(normals)).into();
            }
            if let Some(uvs) = &geometry.uvs {
                message["texcoords"] = BASE64.encode(f64_bytes(uvs)).into();
            }
            if let Some(tangents) = &geometry.tangents {
                message["tangents"] = BASE64.encode(f64_bytes(tangents)).into();
            }
            return self.send_json(message).await;
        }

        let retry = self.transfer_options().retry_on_error_response;
        self.send_attribute(&f64_bytes(&geometry.vertices), "points", retry)
            .await?;
        self.send_attribute(&u32_bytes(&geometry.indices), "triangles", retry)
            .await?;
        if let Some(normals) = &geometry.normals {
            self.send_attribute(&f64_bytes(normals), "normals", retry)
                .await?;
        }
        if let Some(uvs) = &geometry.uvs {
            self.send_attribute(&f64_bytes(uvs), "uvs", retry).await?;
        }
        if let Some(tangents) = &geometry.tangents {
            self.send_attribute(&f64_bytes(tangents), "tangents", retry)
                .await?;
        }
        if auto_spawn {
            self.send_json(json!({ "type": "spawn", "object": "ProceduralMeshComponent" }))
                .await?;
        }
        Ok(())
    }

    /// Log label, protocol, and negotiated limit of the data channel.
    pub fn log_channel_info(&self) {
        if let Some(dc) = self.data_channel() {
            info!(
                label = dc.label(),
                protocol = dc.protocol(),
                max_message_size = self.max_message_size(),
                "Data channel"
            );
        }
    }

    /// Inbound data-channel traffic. Strings go straight to the message
    /// callback; binary frames are tag-dispatched, and the ones carrying
    /// JSON have their payload cut out by brace matching.
    pub(crate) fn handle_channel_message(&self, msg: &DataChannelMessage) {
        if msg.is_string {
            let text = String::from_utf8_lossy(&msg.data).to_string();
            debug!(len = text.len(), "Direct message reception");
            if let Some(callback) = lock(&self.message_callback).clone() {
                callback(text);
            }
            return;
        }
        let data = &msg.data;
        if data.len() < 5 {
            self.deliver_binary(data.clone());
            return;
        }
        match ClientMessageTag::from_u8(data[0]) {
            None => {
                debug!(tag = data[0], "Unknown channel message tag");
            }
            Some(tag) if !tag.carries_json() => {
                debug!(?tag, "Status-only channel message");
            }
            Some(tag) => match extract_json_payload(data) {
                Some(payload) => {
                    debug!(?tag, len = payload.len(), "Decoded message reception");
                    if let Some(callback) = lock(&self.message_callback).clone() {
                        callback(payload);
                    }
                }
                None => self.deliver_binary(data.clone()),
            },
        }
    }

    fn deliver_binary(&self, data: Bytes) {
        debug!(len = data.len(), "Binary data reception");
        if let Some(callback) = lock(&self.data_callback).clone() {
            callback(data);
        }
    }

    async fn send_chunk(&self, frame: Vec<u8>) -> anyhow::Result<()> {
        let Some(dc) = self.data_channel() else {
            anyhow::bail!("data channel is gone");
        };
        dc.send(&Bytes::from(frame))
            .await
            .context("Failed to send chunk")?;
        Ok(())
    }

    /// Replace the message callback with one that counts transfer
    /// acknowledgements and forwards everything else to the previous
    /// callback. Returns the previous callback for restoration.
    fn install_ack_filter(
        &self,
        ack_tx: mpsc::UnboundedSender<BufferAck>,
    ) -> Option<MessageCallback> {
        let prior = lock(&self.message_callback).take();
        let forward = prior.clone();
        let filter: MessageCallback = Arc::new(move |message: String| {
            match serde_json::from_str::<Value>(&message) {
                Ok(content) if content["type"] == "buffer" => {
                    let _ = ack_tx.send(BufferAck::Confirmed);
                }
                Ok(content) if content["type"] == "error" => {
                    let _ = ack_tx.send(BufferAck::Rejected);
                }
                _ => {
                    if let Some(callback) = &forward {
                        callback(message);
                    }
                }
            }
        });
        *lock(&self.message_callback) = Some(filter);
        prior
    }

    fn restore_message_callback(&self, prior: Option<MessageCallback>) {
        *lock(&self.message_callback) = prior;
    }

    /// Wait for the next acknowledgement. Returns whether the transfer may
    /// continue: a peer error always aborts, a timeout only aborts when
    /// `fail_if_not_complete` is set.
    async fn await_ack(
        &self,
        ack_rx: &mut mpsc::UnboundedReceiver<BufferAck>,
        options: &TransferOptions,
    ) -> bool {
        match tokio::time::timeout(options.timeout, ack_rx.recv()).await {
            Ok(Some(BufferAck::Confirmed)) => true,
            Ok(Some(BufferAck::Rejected)) => {
                warn!("Peer rejected the buffer transfer");
                false
            }
            Ok(None) => false,
            Err(_) => {
                warn!(
                    timeout_ms = options.timeout.as_millis() as u64,
                    "Timed out waiting for a transfer acknowledgement"
                );
                !options.fail_if_not_complete
            }
        }
    }
}

/// Byte ranges of each chunk of a payload.
pub(crate) fn chunk_spans(
    total_size: usize,
    chunk_size: usize,
) -> impl Iterator<Item = (usize, usize)> {
    (0..chunk_count(total_size, chunk_size)).map(move |index| {
        let begin = index * chunk_size;
        (begin, (begin + chunk_size).min(total_size))
    })
}

fn f64_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn u32_bytes(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
