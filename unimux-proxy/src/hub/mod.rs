//! Hub role
//!
//! The hub owns the shared loopback listener and the single downstream
//! connection. Its own caller and every client link feed one [`Router`].
//! It runs until the downstream tool exits, a termination signal arrives,
//! or its local input has ended with no client left.

mod downstream;
mod listener;
mod router;

pub use downstream::{CommandLauncher, Downstream, Launcher};
pub use router::{ClientId, Origin, Router};

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use unimux_protocol::{HeaderCodec, Message};
use unimux_utils::{Result, UnimuxError};

use crate::local::LocalCaller;

/// Why a hub stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubExit {
    /// Local input ended and the last client left
    SessionEnded,
    /// The downstream tool exited or closed its output
    DownstreamExited,
    /// Termination was requested
    Cancelled,
}

/// A bound but not yet running hub
pub struct Hub {
    listener: TcpListener,
    addr: SocketAddr,
}

impl Hub {
    /// Claim the shared port
    ///
    /// Fails when another instance won the race for it.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| UnimuxError::Bind { addr, source })?;
        let addr = listener.local_addr()?;
        info!("Hub listening on {}", addr);
        Ok(Self { listener, addr })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the hub's exit condition, then tear everything down
    pub async fn run(
        self,
        downstream: Downstream,
        local: LocalCaller,
        cancel: CancellationToken,
    ) -> HubExit {
        let replay = local.handshake_replay();
        let (stashed, mut inbound, output) = local.into_parts();
        let (router, downstream_rx) = Router::new(output.sender());
        let router = Arc::new(router);
        let mut idle = router.subscribe_idle();

        let Downstream {
            reader,
            writer,
            mut child,
        } = downstream;

        let writer_task = tokio::spawn(write_downstream(writer, downstream_rx));
        let mut reader_task = tokio::spawn(read_downstream(reader, Arc::clone(&router)));
        let accept_task = tokio::spawn(listener::run_accept_loop(
            self.listener,
            Arc::clone(&router),
        ));

        let local_router = Arc::clone(&router);
        let local_task = tokio::spawn(async move {
            if let Some(handshake) = replay {
                replay_handshake(&local_router, handshake).await;
            }
            if let Some(msg) = stashed {
                local_router.forward(Origin::Local, msg);
            }
            while let Some(msg) = inbound.recv().await {
                local_router.forward(Origin::Local, msg);
            }
            local_router.close_local_input();
        });

        let exit = tokio::select! {
            _ = cancel.cancelled() => HubExit::Cancelled,
            _ = &mut reader_task => {
                warn!("Downstream closed its output");
                HubExit::DownstreamExited
            }
            _ = downstream::wait_exit(&mut child) => HubExit::DownstreamExited,
            _ = idle.wait_for(|idle| *idle) => HubExit::SessionEnded,
        };
        info!(
            "Hub on {} stopping: {:?} ({} clients, {} calls pending)",
            self.addr,
            exit,
            router.client_count(),
            router.pending_count()
        );

        // Close the listener and every client link before anything else
        accept_task.abort();
        let _ = accept_task.await;

        local_task.abort();
        reader_task.abort();
        writer_task.abort();
        router.close();

        downstream::terminate(child).await;

        drop(router);
        output.finish().await;
        exit
    }
}

/// Initialize a fresh downstream with the caller's remembered handshake
///
/// The reply is consumed here. The replay is registered as a short-lived
/// client so the router treats it like any other handshake and the hub
/// stays up until it completes.
async fn replay_handshake(router: &Router, handshake: Message) {
    let replay_id = handshake.id().cloned();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = router.register_client(tx);

    debug!("Replaying caller handshake downstream");
    router.forward(Origin::Client(id), handshake);
    while let Some(msg) = rx.recv().await {
        if msg.id() == replay_id.as_ref() {
            if msg.result().is_some() {
                info!("Handshake replayed on new downstream");
            } else {
                warn!("Replayed handshake was rejected downstream");
            }
            break;
        }
    }

    router.unregister_client(id);
}

async fn read_downstream<R>(reader: R, router: Arc<Router>)
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(reader, HeaderCodec::new());
    while let Some(result) = framed.next().await {
        match result {
            Ok(msg) => router.route_downstream(msg),
            Err(e) => {
                warn!("Downstream read error: {}", e);
                break;
            }
        }
    }
    debug!("Downstream output ended");
}

async fn write_downstream<W>(writer: W, mut rx: mpsc::UnboundedReceiver<Message>)
where
    W: AsyncWrite + Unpin,
{
    let mut framed = FramedWrite::new(writer, HeaderCodec::new());
    while let Some(msg) = rx.recv().await {
        if let Err(e) = framed.send(msg).await {
            warn!("Downstream write error: {}", e);
            break;
        }
    }
}
