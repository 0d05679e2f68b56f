//! Role resolution
//!
//! Every instance starts by probing the shared loopback port. A live hub
//! answering means this instance becomes its client; anything else
//! (refused, timed out, unreachable) means it should try to become the hub.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Outcome of a resolution attempt
pub enum Role {
    /// A hub is running; the connected link to it
    Client(TcpStream),
    /// No hub answered; attempt to bind the shared port
    Hub,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client(_) => write!(f, "client"),
            Role::Hub => write!(f, "hub"),
        }
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Probe `addr` for a running hub, giving up after `timeout`
pub async fn resolve_role(addr: SocketAddr, timeout: Duration) -> Role {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY on hub link: {}", e);
            }
            Role::Client(stream)
        }
        Ok(Err(e)) => {
            debug!("No hub at {}: {}", addr, e);
            Role::Hub
        }
        Err(_) => {
            debug!("Probe of {} timed out after {:?}", addr, timeout);
            Role::Hub
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_resolves_client_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let role = resolve_role(addr, Duration::from_secs(2)).await;
        assert!(matches!(role, Role::Client(_)));
        assert_eq!(role.to_string(), "client");
    }

    #[tokio::test]
    async fn test_resolves_hub_when_refused() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let role = resolve_role(addr, Duration::from_secs(2)).await;
        assert!(matches!(role, Role::Hub));
    }
}
