//! In-process transport.
//!
//! `link` joins two routers with a pair of channels. Envelopes are moved,
//! never encoded, so this is the transport of choice for tests and for
//! single-process clusters.

use crate::connection::{ConnectionId, ConnectionPort};
use crate::router::Router;
use shared_types::Envelope;
use tokio::sync::mpsc;

/// Connect `a` and `b`. Returns the connection ids as seen from `a` and
/// from `b`.
pub fn link(a: &Router, b: &Router) -> (ConnectionId, ConnectionId) {
    let (a_out, a_rx) = mpsc::unbounded_channel();
    let (b_out, b_rx) = mpsc::unbounded_channel();
    let a_port = a.attach(a_out);
    let b_port = b.attach(b_out);
    let ids = (a_port.id(), b_port.id());

    tokio::spawn(pump(a_rx, b_port));
    tokio::spawn(pump(b_rx, a_port));
    ids
}

/// Move envelopes sent on one side into the other side's router. When the
/// sending side drops its connection, the receiving side sees it closed.
async fn pump(mut outbound: mpsc::UnboundedReceiver<Envelope>, peer: ConnectionPort) {
    while let Some(envelope) = outbound.recv().await {
        if !peer.deliver(envelope) {
            return;
        }
    }
    peer.close();
}
