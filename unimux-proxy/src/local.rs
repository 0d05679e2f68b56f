//! Local caller session
//!
//! The process's own stdin/stdout speak the header-framed protocol. The
//! session outlives any single role: when a client loses its hub and is
//! re-resolved into a new client or a hub, the same [`LocalCaller`] is
//! handed over, and anything the caller sent in between stays queued.
//!
//! The session also remembers the caller's handshake. A hub that takes
//! over after the old one died runs a fresh downstream tool that has never
//! been initialized, and the caller will not handshake again, so every new
//! role first replays the remembered handshake under [`REPLAY_ID`].

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use unimux_protocol::{HeaderCodec, Message};

/// Request id carried by a replayed handshake
///
/// Its reply is consumed by the proxy and never reaches the caller.
pub const REPLAY_ID: &str = "unimux-handshake-replay";

/// Header-framed session with the process's own caller
pub struct LocalCaller {
    /// Messages decoded from the caller; closes when its input ends
    inbound: mpsc::UnboundedReceiver<Message>,
    /// Message taken from `inbound` but not delivered, replayed first
    stash: Option<Message>,
    /// Messages to encode back to the caller
    outbound: mpsc::UnboundedSender<Message>,
    /// Last handshake request the caller sent
    handshake: Option<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LocalCaller {
    /// Attach to the process's stdin/stdout
    pub fn stdio() -> Self {
        Self::from_io(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Attach to arbitrary byte streams
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(FramedRead::new(reader, HeaderCodec::new()), inbound_tx));
        let writer = tokio::spawn(write_loop(
            FramedWrite::new(writer, HeaderCodec::new()),
            outbound_rx,
        ));

        Self {
            inbound,
            stash: None,
            outbound,
            handshake: None,
            reader,
            writer,
        }
    }

    /// Next message from the caller, `None` once its input has ended
    pub async fn recv(&mut self) -> Option<Message> {
        let msg = match self.stash.take() {
            Some(msg) => msg,
            None => self.inbound.recv().await?,
        };
        if msg.is_handshake() && msg.id().is_some() {
            debug!("Remembering caller handshake");
            self.handshake = Some(msg.clone());
        }
        Some(msg)
    }

    /// The caller's handshake, re-addressed to [`REPLAY_ID`]
    ///
    /// `None` until the caller has sent one.
    pub fn handshake_replay(&self) -> Option<Message> {
        let mut msg = self.handshake.clone()?;
        msg.set_id(Value::from(REPLAY_ID));
        Some(msg)
    }

    /// Put back a message that could not be delivered upstream
    ///
    /// It is returned by the next [`recv`](Self::recv), ahead of newer input.
    pub fn requeue(&mut self, msg: Message) {
        self.stash = Some(msg);
    }

    /// Handle for delivering messages to the caller
    pub fn sender(&self) -> mpsc::UnboundedSender<Message> {
        self.outbound.clone()
    }

    /// Deliver a message to the caller
    pub fn send(&self, msg: Message) {
        if self.outbound.send(msg).is_err() {
            debug!("Local output closed, dropping message");
        }
    }

    /// Split into the inbound stream and the outbound half
    ///
    /// The reader task keeps feeding the inbound stream until input ends.
    /// A requeued message is returned separately.
    pub fn into_parts(
        self,
    ) -> (
        Option<Message>,
        mpsc::UnboundedReceiver<Message>,
        LocalOutput,
    ) {
        (
            self.stash,
            self.inbound,
            LocalOutput {
                outbound: self.outbound,
                writer: self.writer,
            },
        )
    }

    /// Stop reading and flush everything queued for the caller
    pub async fn finish(self) {
        self.reader.abort();
        let output = LocalOutput {
            outbound: self.outbound,
            writer: self.writer,
        };
        output.finish().await;
    }
}

/// Outbound half of a [`LocalCaller`]
pub struct LocalOutput {
    outbound: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
}

impl LocalOutput {
    /// Handle for delivering messages to the caller
    pub fn sender(&self) -> mpsc::UnboundedSender<Message> {
        self.outbound.clone()
    }

    /// Flush everything queued for the caller
    ///
    /// Completes once every other sender clone has been dropped too.
    pub async fn finish(self) {
        drop(self.outbound);
        if let Err(e) = self.writer.await {
            if !e.is_cancelled() {
                warn!("Local writer task failed: {}", e);
            }
        }
    }
}

async fn read_loop<R>(mut framed: FramedRead<R, HeaderCodec>, tx: mpsc::UnboundedSender<Message>)
where
    R: AsyncRead + Unpin,
{
    while let Some(result) = framed.next().await {
        match result {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("Local input error: {}", e);
                break;
            }
        }
    }
    debug!("Local input ended");
}

async fn write_loop<W>(mut framed: FramedWrite<W, HeaderCodec>, mut rx: mpsc::UnboundedReceiver<Message>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        if let Err(e) = framed.send(msg).await {
            warn!("Local output error: {}", e);
            break;
        }
    }
}
