//! Downstream tool process
//!
//! The hub owns exactly one downstream connection: a child process speaking
//! header-framed messages on its stdin/stdout. Its stderr is inherited so
//! diagnostics land wherever the hub's own stderr goes.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use unimux_utils::{Result, UnimuxError};

use crate::config::DownstreamConfig;

/// Grace period between the termination signal and a hard kill
const KILL_GRACE: Duration = Duration::from_secs(2);

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// A launched downstream connection
pub struct Downstream {
    pub(crate) reader: BoxedReader,
    pub(crate) writer: BoxedWriter,
    pub(crate) child: Option<Child>,
}

impl Downstream {
    /// Wrap a pair of byte streams with no backing process
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    /// Take over a spawned child's piped stdin and stdout
    pub fn from_child(mut child: Child) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| UnimuxError::ProcessSpawn("child stdout not piped".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| UnimuxError::ProcessSpawn("child stdin not piped".into()))?;

        Ok(Self {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }

    /// Launch the configured tool
    pub fn spawn(config: &DownstreamConfig) -> Result<Self> {
        let mut cmd = build_command(config);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // Own process group, so teardown reaches anything a shell started
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            UnimuxError::ProcessSpawn(format!("{}: {}", config.command_line(), e))
        })?;

        info!(
            "Spawned downstream `{}` (pid {:?})",
            config.command_line(),
            child.id()
        );
        Self::from_child(child)
    }
}

fn build_command(config: &DownstreamConfig) -> Command {
    if !config.shell {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        return cmd;
    }

    // Each word is quoted separately so arguments keep their boundaries
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(&config.command).args(&config.args);
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(config.command_line());
        cmd
    }
}

/// Wait for the child to exit, or forever when there is none
pub(crate) async fn wait_exit(child: &mut Option<Child>) {
    match child.as_mut() {
        Some(child) => match child.wait().await {
            Ok(status) => info!("Downstream exited with {}", status),
            Err(e) => warn!("Failed to wait on downstream: {}", e),
        },
        None => std::future::pending().await,
    }
}

/// Stop the child and everything it started
pub(crate) async fn terminate(child: Option<Child>) {
    let Some(mut child) = child else {
        return;
    };

    if let Ok(Some(status)) = child.try_wait() {
        debug!("Downstream already exited with {}", status);
        return;
    }

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: signalling a process group we created; no memory is touched
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            if let Ok(Ok(status)) = tokio::time::timeout(KILL_GRACE, child.wait()).await {
                debug!("Downstream terminated with {}", status);
                return;
            }
        }
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }

    if let Err(e) = child.kill().await {
        debug!("Failed to kill downstream: {}", e);
    }
}

/// Produces a fresh downstream connection for a new hub
pub trait Launcher: Send + Sync {
    fn launch(&self) -> Result<Downstream>;
}

impl<F> Launcher for F
where
    F: Fn() -> Result<Downstream> + Send + Sync,
{
    fn launch(&self) -> Result<Downstream> {
        self()
    }
}

/// Launches the tool described by a [`DownstreamConfig`]
pub struct CommandLauncher {
    config: DownstreamConfig,
}

impl CommandLauncher {
    pub fn new(config: DownstreamConfig) -> Self {
        Self { config }
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self) -> Result<Downstream> {
        Downstream::spawn(&self.config)
    }
}
