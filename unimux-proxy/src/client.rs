//! Client role
//!
//! A client relays its local caller's messages over the hub link and the
//! hub's messages back, unchanged. It does no id rewriting of its own; the
//! only message it originates is a replay of the caller's handshake when
//! it joins a hub after a role change.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use unimux_protocol::{LineCodec, Message};

use crate::local::LocalCaller;

type LinkSink = SplitSink<Framed<TcpStream, LineCodec>, Message>;
type LinkStream = SplitStream<Framed<TcpStream, LineCodec>>;

/// Why a client session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The local caller ended its input; the link was closed
    SessionEnded,
    /// The hub link failed or was closed by the hub
    LinkLost,
    /// Termination was requested
    Cancelled,
}

/// Relay between `local` and the hub on `stream` until one side stops
///
/// A message that could not be written to a failing link is requeued on
/// `local`, so it is sent again after re-resolution.
pub async fn run_client(
    stream: TcpStream,
    local: &mut LocalCaller,
    cancel: &CancellationToken,
) -> ClientExit {
    if let Ok(peer) = stream.peer_addr() {
        info!("Connected to hub at {}", peer);
    }

    let (mut sink, mut link) = Framed::new(stream, LineCodec::new()).split();

    if let Some(handshake) = local.handshake_replay() {
        if let Err(exit) = replay_handshake(handshake, &mut sink, &mut link, local, cancel).await {
            return exit;
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return ClientExit::Cancelled;
            }
            outbound = local.recv() => {
                let Some(msg) = outbound else {
                    debug!("Local input ended, closing hub link");
                    let _ = sink.close().await;
                    return ClientExit::SessionEnded;
                };
                if let Err(e) = sink.send(msg.clone()).await {
                    warn!("Hub link write failed: {}", e);
                    local.requeue(msg);
                    return ClientExit::LinkLost;
                }
            }
            inbound = link.next() => {
                match inbound {
                    Some(Ok(msg)) => local.send(msg),
                    Some(Err(e)) => {
                        warn!("Hub link read failed: {}", e);
                        return ClientExit::LinkLost;
                    }
                    None => {
                        warn!("Hub closed the link");
                        return ClientExit::LinkLost;
                    }
                }
            }
        }
    }
}

/// Send the caller's remembered handshake and consume its reply
///
/// Anything else the hub sends meanwhile is relayed to the caller. Caller
/// input waits until the reply has arrived.
async fn replay_handshake(
    handshake: Message,
    sink: &mut LinkSink,
    link: &mut LinkStream,
    local: &LocalCaller,
    cancel: &CancellationToken,
) -> Result<(), ClientExit> {
    let replay_id = handshake.id().cloned();
    debug!("Replaying caller handshake to hub");
    if let Err(e) = sink.send(handshake).await {
        warn!("Hub link write failed: {}", e);
        return Err(ClientExit::LinkLost);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return Err(ClientExit::Cancelled);
            }
            inbound = link.next() => match inbound {
                Some(Ok(msg)) if msg.id() == replay_id.as_ref() => {
                    if msg.result().is_some() {
                        info!("Handshake replayed");
                    } else {
                        warn!("Replayed handshake was rejected by the hub");
                    }
                    return Ok(());
                }
                Some(Ok(msg)) => local.send(msg),
                Some(Err(e)) => {
                    warn!("Hub link read failed: {}", e);
                    return Err(ClientExit::LinkLost);
                }
                None => {
                    warn!("Hub closed the link");
                    return Err(ClientExit::LinkLost);
                }
            },
        }
    }
}
