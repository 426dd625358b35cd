//! UDP sync ingest
//!
//! Receives bincode-encoded sync messages over UDP and forwards them through
//! a channel to the reconciler task. The socket loop never touches shared
//! state itself; decoding failures are logged and dropped so one malformed
//! datagram cannot stall the stream behind it.

use crate::context::SharedContext;
use crate::sync::PlayerId;
use log::{debug, info, warn};
use shared::SyncMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const RECV_BUFFER_SIZE: usize = 2048;

pub struct SyncReceiver {
    socket: Arc<UdpSocket>,
}

impl SyncReceiver {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Sync ingest listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns the receive loop. The returned channel yields decoded messages
    /// with their source address; it closes when the receiver is dropped.
    pub fn spawn_receiver(&self) -> mpsc::UnboundedReceiver<(SyncMessage, SocketAddr)> {
        let socket = Arc::clone(&self.socket);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, addr)) => match bincode::deserialize::<SyncMessage>(&buf[..len]) {
                        Ok(message) => {
                            if tx.send((message, addr)).is_err() {
                                debug!("Sync channel closed, stopping receive loop");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Discarding malformed sync packet from {}: {}", addr, e);
                        }
                    },
                    Err(e) => {
                        warn!("UDP receive error: {}", e);
                    }
                }
            }
        });

        rx
    }
}

/// Drains the ingest channel into the reconciler. Each message takes the
/// main-loop lock only for the duration of its own apply.
pub async fn run_sync_ingest(
    context: SharedContext,
    mut rx: mpsc::UnboundedReceiver<(SyncMessage, SocketAddr)>,
) {
    while let Some((message, addr)) = rx.recv().await {
        let player = PlayerId(message.player_id);
        let mut ctx = context.lock().await;
        if !ctx.sync.apply_packet(player, &message.packet) {
            debug!("Ignored sync packet from {} for player {}", addr, message.player_id);
        }
    }
}
