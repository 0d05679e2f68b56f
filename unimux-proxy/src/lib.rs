//! unimux-proxy: exclusive-upstream multiplexing proxy
//!
//! Many local processes each believe they own a private stdio connection
//! to one downstream tool. The first to start becomes the hub: it launches
//! the tool and listens on a loopback port. Later processes become clients
//! of that hub. The hub remaps request ids so replies find their origin,
//! answers repeated handshakes from a cache and broadcasts unsolicited
//! messages to everyone.

pub mod cli;
pub mod client;
pub mod config;
pub mod hub;
pub mod local;
pub mod resolver;
pub mod signals;
pub mod supervisor;

pub use client::{run_client, ClientExit};
pub use config::{AppConfig, ConfigLoader};
pub use hub::{CommandLauncher, Downstream, Hub, HubExit, Launcher, Router};
pub use local::LocalCaller;
pub use resolver::{resolve_role, Role};
pub use supervisor::{Outcome, Supervisor};
