//! Signalling WebSocket client loop.
//!
//! One task per endpoint: inbound JSON is dispatched to the endpoint's
//! signalling handler, outbound JSON drains from the worker-queue-fed
//! outbox so emission order is preserved end to end.

use std::sync::Arc;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use tether_protocol::SignalMessage;

use crate::connector::{ConnectionState, Endpoint, Role};
use crate::sdp::extract_candidates;

/// Connect to the signalling server and run the exchange until the socket
/// closes. Returns `Ok` on a clean close; a transport error puts the
/// endpoint back into `Startup` so a later call can try again.
pub async fn run_signalling(endpoint: &Arc<Endpoint>) -> anyhow::Result<()> {
    let url = endpoint.config().signalling_url();
    endpoint.set_state(ConnectionState::Startup);
    info!(url = %url, "Connecting to signalling server");

    let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .context("Signalling connection failed")?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<String>();
    endpoint.attach_signal_sender(outbox_tx);
    endpoint.set_state(ConnectionState::Signup);
    info!("Signalling server connected");

    // Initiator fast path: the offer was prepared during initialize, so
    // signup publishes it (and any already-gathered candidates) at once.
    if endpoint.role() == Role::Initiator {
        if let Some(sdp) = endpoint.local_description().await {
            endpoint.send_message(SignalMessage::Offer {
                sdp: sdp.clone(),
                endpoint: Some("data".to_string()),
            });
            for candidate in extract_candidates(&sdp) {
                endpoint.send_message(SignalMessage::IceCandidate { candidate });
            }
            endpoint.set_state(ConnectionState::Offered);
        }
    }

    loop {
        tokio::select! {
            message = ws_rx.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    endpoint.handle_signal(&text).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(len = data.len(), "Ignoring binary signalling payload");
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Signalling connection closed");
                    endpoint.signalling_closed();
                    return Ok(());
                }
                Some(Err(e)) => {
                    endpoint.set_state(ConnectionState::Startup);
                    return Err(e).context("Signalling socket error");
                }
                _ => {}
            },
            Some(text) = outbox_rx.recv() => {
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    endpoint.set_state(ConnectionState::Startup);
                    return Err(e).context("Failed to write signalling message");
                }
            }
        }
    }
}

impl Endpoint {
    /// Convenience wrapper; see [`run_signalling`].
    pub async fn start_signalling(self: &Arc<Self>) -> anyhow::Result<()> {
        run_signalling(self).await
    }
}
