//! unimux-protocol: Wire definitions shared by the hub and its clients
//!
//! This crate defines the opaque [`Message`] passed through the proxy and
//! the two framings it travels in:
//! - [`HeaderCodec`]: `Content-Length` framed JSON, spoken by the downstream
//!   tool and by every local caller
//! - [`LineCodec`]: newline-delimited JSON, used only on the private
//!   hub <-> client TCP link

pub mod codec;
pub mod message;

// Re-export main types at crate root
pub use codec::{CodecError, HeaderCodec, LineCodec, MAX_MESSAGE_SIZE};
pub use message::{Message, HANDSHAKE_ACK_METHOD, HANDSHAKE_METHOD, JSONRPC_VERSION};
