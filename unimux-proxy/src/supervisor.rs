//! Role supervisor
//!
//! Drives one process through role resolution: probe for a hub, serve as
//! its client, and when the link drops resolve again. A process that finds
//! no hub races for the shared port; the loser of that race backs off and
//! resolves again. The local caller session persists across every role
//! change.

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::{run_client, ClientExit};
use crate::config::AppConfig;
use crate::hub::{Hub, HubExit, Launcher};
use crate::local::LocalCaller;
use crate::resolver::{resolve_role, Role};

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ended as a client whose local caller finished
    ClientFinished,
    /// Ended as a hub, for the given reason
    Hub(HubExit),
    /// Termination was requested
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::ClientFinished => write!(f, "client session finished"),
            Outcome::Hub(HubExit::SessionEnded) => write!(f, "hub session finished"),
            Outcome::Hub(HubExit::DownstreamExited) => write!(f, "downstream exited"),
            Outcome::Hub(HubExit::Cancelled) | Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Runs the resolve, serve, re-resolve loop for one process
pub struct Supervisor<L> {
    config: AppConfig,
    launcher: L,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(config: AppConfig, launcher: L) -> Self {
        Self { config, launcher }
    }

    /// Serve `local` until its session ends or `cancel` fires
    pub async fn run(&self, mut local: LocalCaller, cancel: CancellationToken) -> Outcome {
        let addr = self.config.hub_addr();

        loop {
            let role = tokio::select! {
                role = resolve_role(addr, self.config.connect_timeout()) => role,
                _ = cancel.cancelled() => {
                    local.finish().await;
                    return Outcome::Cancelled;
                }
            };
            info!("Resolved role: {}", role);

            match role {
                Role::Client(stream) => match run_client(stream, &mut local, &cancel).await {
                    ClientExit::SessionEnded => {
                        local.finish().await;
                        return Outcome::ClientFinished;
                    }
                    ClientExit::Cancelled => {
                        local.finish().await;
                        return Outcome::Cancelled;
                    }
                    ClientExit::LinkLost => {
                        let delay = self.config.reconnect_delay();
                        warn!("Lost hub link, re-resolving in {:?}", delay);
                        if !sleep_unless_cancelled(delay, &cancel).await {
                            local.finish().await;
                            return Outcome::Cancelled;
                        }
                    }
                },
                Role::Hub => {
                    let hub = match Hub::bind(addr).await {
                        Ok(hub) => hub,
                        Err(e) => {
                            info!("Lost race for hub: {}", e);
                            if !self.back_off(&cancel).await {
                                local.finish().await;
                                return Outcome::Cancelled;
                            }
                            continue;
                        }
                    };

                    let downstream = match self.launcher.launch() {
                        Ok(downstream) => downstream,
                        Err(e) => {
                            error!("Failed to launch downstream: {}", e);
                            drop(hub);
                            if !self.back_off(&cancel).await {
                                local.finish().await;
                                return Outcome::Cancelled;
                            }
                            continue;
                        }
                    };

                    return Outcome::Hub(hub.run(downstream, local, cancel).await);
                }
            }
        }
    }

    /// Wait out the randomized race backoff; `false` when cancelled
    async fn back_off(&self, cancel: &CancellationToken) -> bool {
        let delay = self.config.race_backoff();
        info!("Retrying role resolution in {:?}", delay);
        sleep_unless_cancelled(delay, cancel).await
    }
}

async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
