//! TCP transport.
//!
//! Each connection gets a reader task (frames to the router) and a writer
//! task (router to frames). Either side ending closes the connection.

use crate::codec::{read_frame, write_frame};
use crate::connection::{ConnectionId, ConnectionPort};
use crate::router::Router;
use shared_types::{ConversationError, Envelope};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connect to a listening node.
pub async fn connect(
    router: &Router,
    addr: SocketAddr,
    max_frame: usize,
) -> Result<ConnectionId, ConversationError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ConversationError::Unreachable(format!("{addr}: {e}")))?;
    let id = attach_stream(router, stream, max_frame);
    info!(role = %router.role(), %addr, connection = %id, "[conversation] connected");
    Ok(id)
}

/// Bind `addr` and accept connections until the returned task is aborted.
/// Returns the bound address, useful with port 0.
pub async fn serve(
    router: Router,
    addr: SocketAddr,
    max_frame: usize,
) -> Result<(SocketAddr, JoinHandle<()>), ConversationError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ConversationError::Unreachable(format!("{addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| ConversationError::Unreachable(e.to_string()))?;
    info!(role = %router.role(), addr = %local, "[conversation] listening");

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let id = attach_stream(&router, stream, max_frame);
                    debug!(%peer, connection = %id, "[conversation] accepted");
                }
                Err(e) => {
                    error!(error = %e, "[conversation] accept failed");
                    break;
                }
            }
        }
    });
    Ok((local, task))
}

fn attach_stream(router: &Router, stream: TcpStream, max_frame: usize) -> ConnectionId {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let port = router.attach(outbound);
    let id = port.id();

    tokio::spawn(write_loop(writer, outbound_rx, max_frame));
    tokio::spawn(read_loop(reader, port, max_frame));
    id
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    max_frame: usize,
) {
    while let Some(envelope) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &envelope, max_frame).await {
            warn!(error = %e, "[conversation] write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(mut reader: OwnedReadHalf, port: ConnectionPort, max_frame: usize) {
    loop {
        match read_frame(&mut reader, max_frame).await {
            Ok(Some(envelope)) => {
                if !port.deliver(envelope) {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                if e.is_fatal() {
                    error!(connection = %port.id(), error = %e, "[conversation] bad frame, closing");
                } else {
                    debug!(connection = %port.id(), error = %e, "[conversation] read ended");
                }
                break;
            }
        }
    }
    port.close();
}
