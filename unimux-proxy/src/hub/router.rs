//! Hub message router
//!
//! All mutable hub state (id counter, pending calls, handshake cache,
//! connected clients) lives in one [`HubState`] behind a single mutex.
//! Every origin's reader task calls into the router synchronously, so
//! messages from one origin reach the downstream tool in arrival order and
//! remapped ids are allocated by a single authority.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use unimux_protocol::Message;

/// Identifier of a connected client link
///
/// Never reused within a hub's lifetime, so a late reply can not reach a
/// different client that happened to connect afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Client({})", self.0)
    }
}

/// Where a forwarded request came from, and where its reply goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The hub process's own caller
    Local,
    /// A connected client
    Client(ClientId),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "Local"),
            Origin::Client(id) => write!(f, "{}", id),
        }
    }
}

/// A request forwarded downstream and awaiting its reply
#[derive(Debug)]
struct PendingCall {
    /// Id as the origin sent it
    original_id: Value,
    origin: Origin,
    /// Whether this is the handshake call
    handshake: bool,
}

/// Handshake progress for the single downstream connection
#[derive(Debug)]
enum Handshake {
    /// Not attempted yet
    Uninitialized,
    /// Sent downstream; later handshakes wait here for the same result
    InFlight { waiters: Vec<(Origin, Value)> },
    /// Completed; replayed to every later handshake, and every later
    /// acknowledgement is swallowed
    Cached { result: Value },
}

/// Mutable hub state, guarded by [`Router::state`]
struct HubState {
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
    handshake: Handshake,
    clients: HashMap<ClientId, mpsc::UnboundedSender<Message>>,
    next_client_id: u64,
    /// Channel to the hub's own caller, taken on close
    local: Option<mpsc::UnboundedSender<Message>>,
    local_input_closed: bool,
}

impl HubState {
    fn deliver(&self, origin: Origin, msg: Message) {
        let sender = match origin {
            Origin::Local => self.local.as_ref(),
            Origin::Client(id) => self.clients.get(&id),
        };

        match sender {
            Some(tx) => {
                if tx.send(msg).is_err() {
                    debug!("{} channel closed, reply dropped", origin);
                }
            }
            None => debug!("{} is gone, discarding reply", origin),
        }
    }

    fn broadcast(&self, msg: Message) {
        trace!("Broadcasting to local caller and {} clients", self.clients.len());
        if let Some(local) = &self.local {
            let _ = local.send(msg.clone());
        }
        for tx in self.clients.values() {
            let _ = tx.send(msg.clone());
        }
    }

    fn is_idle(&self) -> bool {
        self.local_input_closed && self.clients.is_empty()
    }

    /// Settle the handshake state from its downstream reply
    ///
    /// Returns the replies owed to origins that queued behind it.
    fn complete_handshake(&mut self, reply: &Message) -> Vec<(Origin, Message)> {
        let waiters = match &mut self.handshake {
            Handshake::InFlight { waiters } => std::mem::take(waiters),
            Handshake::Cached { .. } => return Vec::new(),
            Handshake::Uninitialized => Vec::new(),
        };

        match reply.result() {
            Some(result) => {
                info!("Handshake completed, caching result");
                self.handshake = Handshake::Cached {
                    result: result.clone(),
                };
                waiters
                    .into_iter()
                    .map(|(origin, id)| (origin, Message::response(id, result.clone())))
                    .collect()
            }
            None => {
                warn!("Handshake failed downstream, next handshake will be retried");
                self.handshake = Handshake::Uninitialized;
                waiters
                    .into_iter()
                    .map(|(origin, id)| {
                        let mut failed = reply.clone();
                        failed.set_id(id);
                        (origin, failed)
                    })
                    .collect()
            }
        }
    }
}

/// Routes messages between origins and the downstream tool
pub struct Router {
    state: Mutex<HubState>,
    downstream: mpsc::UnboundedSender<Message>,
    idle_tx: watch::Sender<bool>,
}

impl Router {
    /// Create a router delivering local replies to `local`
    ///
    /// Returns the receiving end of the downstream channel.
    pub fn new(local: mpsc::UnboundedSender<Message>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (downstream, downstream_rx) = mpsc::unbounded_channel();
        let (idle_tx, _) = watch::channel(false);

        let router = Self {
            state: Mutex::new(HubState {
                next_id: 1,
                pending: HashMap::new(),
                handshake: Handshake::Uninitialized,
                clients: HashMap::new(),
                next_client_id: 1,
                local: Some(local),
                local_input_closed: false,
            }),
            downstream,
            idle_tx,
        };

        (router, downstream_rx)
    }

    /// Watch whether the hub is ready to shut down
    ///
    /// Becomes `true` once local input has ended and no client remains.
    pub fn subscribe_idle(&self) -> watch::Receiver<bool> {
        self.idle_tx.subscribe()
    }

    /// Forward a message from `origin` towards the downstream tool
    pub fn forward(&self, origin: Origin, mut msg: Message) {
        let mut state = self.state.lock();

        // Once a handshake is under way the tool never sees another one,
        // whether or not it carries an id
        if msg.is_handshake() {
            let id = msg.id().cloned();
            let cached = match &mut state.handshake {
                Handshake::Cached { result } => Some(result.clone()),
                Handshake::InFlight { waiters } => {
                    match id {
                        Some(id) => {
                            debug!("Handshake from {} queued behind the one in flight", origin);
                            waiters.push((origin, id));
                        }
                        None => debug!("Dropping id-less handshake from {}", origin),
                    }
                    return;
                }
                Handshake::Uninitialized => None,
            };

            if let Some(result) = cached {
                match id {
                    Some(id) => {
                        debug!("Answering handshake from {} with cached result", origin);
                        state.deliver(origin, Message::response(id, result));
                    }
                    None => debug!("Dropping id-less handshake from {}", origin),
                }
                return;
            }
        }

        if msg.is_handshake_ack() && matches!(state.handshake, Handshake::Cached { .. }) {
            debug!("Swallowing handshake acknowledgement from {}", origin);
            return;
        }

        if let Some(original_id) = msg.id().cloned() {
            let remapped = state.next_id;
            state.next_id += 1;

            let handshake = msg.is_handshake();
            if handshake {
                state.handshake = Handshake::InFlight { waiters: Vec::new() };
            }

            trace!("{} request {} -> {}", origin, original_id, remapped);
            state.pending.insert(
                remapped,
                PendingCall {
                    original_id,
                    origin,
                    handshake,
                },
            );
            msg.set_id(Value::from(remapped));
        }

        // Sent under the lock so wire order matches id allocation order
        if self.downstream.send(msg).is_err() {
            warn!("Downstream writer closed, dropping message from {}", origin);
        }
    }

    /// Route a message read from the downstream tool
    pub fn route_downstream(&self, mut msg: Message) {
        let mut state = self.state.lock();

        let call = msg
            .id()
            .and_then(Value::as_u64)
            .and_then(|id| state.pending.remove(&id));

        let Some(call) = call else {
            state.broadcast(msg);
            return;
        };

        let waiters = if call.handshake {
            state.complete_handshake(&msg)
        } else {
            Vec::new()
        };

        msg.set_id(call.original_id);
        state.deliver(call.origin, msg);

        for (origin, reply) in waiters {
            state.deliver(origin, reply);
        }
    }

    /// Add a client to the set, returning its id
    pub fn register_client(&self, tx: mpsc::UnboundedSender<Message>) -> ClientId {
        let mut state = self.state.lock();
        let id = ClientId(state.next_client_id);
        state.next_client_id += 1;
        state.clients.insert(id, tx);

        info!("{} connected ({} total)", id, state.clients.len());
        self.publish_idle(&state);
        id
    }

    /// Remove a client from the set
    ///
    /// Its pending calls stay open so their replies are consumed and
    /// discarded instead of being mistaken for notifications.
    pub fn unregister_client(&self, id: ClientId) {
        let mut state = self.state.lock();
        if state.clients.remove(&id).is_some() {
            info!("{} disconnected ({} remaining)", id, state.clients.len());
        }
        self.publish_idle(&state);
    }

    /// Record that the hub's own caller has ended its input
    pub fn close_local_input(&self) {
        let mut state = self.state.lock();
        state.local_input_closed = true;
        info!(
            "Local input closed, {} clients still connected",
            state.clients.len()
        );
        self.publish_idle(&state);
    }

    /// Drop every outbound channel during teardown
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.local = None;
        state.clients.clear();
    }

    /// Number of requests awaiting a downstream reply
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    fn publish_idle(&self, state: &HubState) {
        self.idle_tx.send_replace(state.is_idle());
    }
}
