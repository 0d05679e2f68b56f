//! Client link listener
//!
//! Each accepted connection becomes a client session speaking
//! newline-delimited JSON. Sessions live in a [`JoinSet`] owned by the
//! accept loop, so aborting the loop closes every client link at once.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{debug, error, trace};

use unimux_protocol::LineCodec;

use super::router::{Origin, Router};

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Run the accept loop until aborted
pub(crate) async fn run_accept_loop(listener: TcpListener, router: Arc<Router>) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("New client link from {}", peer_addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            trace!("Failed to set TCP_NODELAY: {}", e);
                        }
                        sessions.spawn(handle_client(stream, Arc::clone(&router)));
                    }
                    Err(e) => {
                        error!("Hub accept error: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
}

/// Serve one client link until either side closes it
async fn handle_client(stream: TcpStream, router: Arc<Router>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = router.register_client(tx);
    let origin = Origin::Client(id);

    let (mut sink, mut link) = Framed::new(stream, LineCodec::new()).split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(msg) = outbound else {
                    debug!("{} closed by hub", id);
                    break;
                };
                if let Err(e) = sink.send(msg).await {
                    debug!("{} write failed: {}", id, e);
                    break;
                }
            }
            inbound = link.next() => {
                match inbound {
                    Some(Ok(msg)) => router.forward(origin, msg),
                    Some(Err(e)) => {
                        debug!("{} read failed: {}", id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    router.unregister_client(id);
}
