//! WebSocket write pump.
//!
//! Drains the frames queued on a [`QueuedSocket`](crate::QueuedSocket) into
//! the write half of an axum WebSocket.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tracing::{debug, warn};

use crate::queue::{Outbound, OutboundReceiver};

/// Forward queued frames to the client until the queue closes, a close is
/// requested, or the client goes away.
///
/// Returns the number of text frames written.
pub async fn pump(mut queue: OutboundReceiver, mut sink: SplitSink<WebSocket, Message>) -> usize {
    let mut written = 0;

    while let Some(outbound) = queue.recv().await {
        match outbound {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(error = %e, "WebSocket write failed");
                    break;
                }
                written += 1;
            }
            Outbound::Close(reason) => {
                let frame = reason.map(|r| CloseFrame {
                    code: r.code,
                    reason: r.reason.into(),
                });
                if let Err(e) = sink.send(Message::Close(frame)).await {
                    warn!(error = %e, "Failed to send close frame");
                }
                break;
            }
        }
    }

    let _ = sink.close().await;
    written
}
