//! Session driver subprocess.
//!
//! Each connection attempt spawns the configured driver command and speaks
//! the JSON Lines protocol from `herald-session-protocol` over its stdio.
//! Lifecycle events are forwarded on the connection's event channel; command
//! replies are matched to their request by `request_id`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use ulid::Ulid;

use herald_session_protocol::{DriverCommand, DriverEvent, env};

use crate::delivery::{SendReceipt, TransportError};

use super::error::{SessionError, SessionResult};
use super::events::SessionEvent;
use super::link::{Connection, SessionConnector, SessionLink};

/// How long the driver gets to exit after a `shutdown` command.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on waiting for a `logged_out` reply.
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 32;

type PendingReplies = Arc<DashMap<String, oneshot::Sender<DriverEvent>>>;

/// How to launch the session driver.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Passed to the driver as `HERALD_SESSION_STORE_URL`.
    pub store_url: Option<String>,
}

// ============================================================================
// Connector
// ============================================================================

/// Connector that runs one driver process per session.
pub struct SubprocessConnector {
    config: DriverConfig,
}

impl SubprocessConnector {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    fn spawn_child(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(url) = &self.config.store_url {
            cmd.env(env::SESSION_STORE_URL, url);
        }

        // Tie the driver to our lifetime so a crash never leaves it running.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn()
    }
}

#[async_trait]
impl SessionConnector for SubprocessConnector {
    async fn connect(&self) -> SessionResult<Connection> {
        info!(command = %self.config.command, "Spawning session driver");

        let mut child = self.spawn_child().map_err(|e| {
            SessionError::init(format!(
                "failed to spawn session driver '{}': {e}",
                self.config.command
            ))
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SessionError::init("session driver stdio is not piped"));
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let pending: PendingReplies = Arc::new(DashMap::new());

        let bridge = Bridge {
            child,
            stdin,
            stdout,
            commands: command_rx,
            events: event_tx,
            pending: pending.clone(),
        };
        tokio::spawn(bridge.run());

        let link = DriverLink {
            commands: command_tx,
            pending,
            shut_down: AtomicBool::new(false),
        };
        Ok(Connection::new(Arc::new(link), event_rx))
    }
}

// ============================================================================
// Link
// ============================================================================

struct DriverLink {
    commands: mpsc::Sender<DriverCommand>,
    pending: PendingReplies,
    shut_down: AtomicBool,
}

/// Removes a pending reply slot when the request finishes or is abandoned.
struct PendingSlot<'a> {
    pending: &'a DashMap<String, oneshot::Sender<DriverEvent>>,
    request_id: String,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
    }
}

impl DriverLink {
    async fn request(
        &self,
        build: impl FnOnce(String) -> DriverCommand,
    ) -> Result<DriverEvent, TransportError> {
        let request_id = Ulid::new().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            request_id: request_id.clone(),
        };

        self.commands
            .send(build(request_id))
            .await
            .map_err(|_| TransportError::ChannelClosed)?;
        rx.await.map_err(|_| TransportError::ChannelClosed)
    }
}

#[async_trait]
impl SessionLink for DriverLink {
    async fn send(&self, to: &str, content: &str) -> Result<SendReceipt, TransportError> {
        let reply = self
            .request(|request_id| DriverCommand::SendMessage {
                request_id,
                to: to.to_string(),
                content: content.to_string(),
            })
            .await?;

        match reply {
            DriverEvent::MessageSent {
                message_id,
                timestamp,
                ..
            } => Ok(SendReceipt {
                message_id,
                timestamp,
            }),
            DriverEvent::CommandError { message, .. } => Err(TransportError::Rejected(message)),
            other => Err(TransportError::Rejected(format!(
                "unexpected driver reply: {other:?}"
            ))),
        }
    }

    async fn logout(&self) -> SessionResult<()> {
        let reply = tokio::time::timeout(
            LOGOUT_TIMEOUT,
            self.request(|request_id| DriverCommand::Logout { request_id }),
        )
        .await
        .map_err(|_| SessionError::command("logout timed out"))?
        .map_err(|e| SessionError::command(e.to_string()))?;

        match reply {
            DriverEvent::LoggedOut { .. } => Ok(()),
            DriverEvent::CommandError { message, .. } => Err(SessionError::Command(message)),
            other => Err(SessionError::command(format!(
                "unexpected driver reply: {other:?}"
            ))),
        }
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.commands.send(DriverCommand::Shutdown).await.is_err() {
            debug!("Session driver already stopped");
        }
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// Pumps stdio between the driver process and the link.
struct Bridge {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    commands: mpsc::Receiver<DriverCommand>,
    events: mpsc::Sender<SessionEvent>,
    pending: PendingReplies,
}

impl Bridge {
    async fn run(self) {
        let Bridge {
            mut child,
            mut stdin,
            stdout,
            mut commands,
            events,
            pending,
        } = self;
        let mut lines = BufReader::new(stdout).lines();

        // Some(reason) when the driver went away on its own.
        let lost = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => Self::dispatch(&line, &events, &pending).await,
                    Ok(None) => break Some(Self::exit_reason(&mut child).await),
                    Err(e) => break Some(format!("error reading session driver output: {e}")),
                },

                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("Session link dropped");
                        break None;
                    };
                    let is_shutdown = matches!(command, DriverCommand::Shutdown);
                    if let Err(e) = Self::write_command(&mut stdin, &command).await {
                        break Some(format!("failed to write to session driver: {e}"));
                    }
                    if is_shutdown {
                        let _ = tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await;
                        debug!("Session driver shut down");
                        break None;
                    }
                },

                status = child.wait() => {
                    break Some(match status {
                        Ok(status) => format!("session driver exited: {status}"),
                        Err(e) => format!("session driver wait failed: {e}"),
                    });
                }
            }
        };

        if let Some(reason) = lost {
            warn!(reason = %reason, "Session driver stopped");
            let _ = events.send(SessionEvent::Disconnected(reason)).await;
        }

        if let Err(e) = child.kill().await {
            debug!(error = %e, "Session driver already reaped");
        }
        // Close commands before failing outstanding requests so no new
        // request can register after the sweep.
        commands.close();
        pending.clear();
    }

    /// Reason to report once the driver closed its output.
    async fn exit_reason(child: &mut Child) -> String {
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => format!("session driver exited: {status}"),
            _ => "session driver closed its output".to_string(),
        }
    }

    async fn dispatch(
        line: &str,
        events: &mpsc::Sender<SessionEvent>,
        pending: &DashMap<String, oneshot::Sender<DriverEvent>>,
    ) {
        let event = match serde_json::from_str::<DriverEvent>(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = %line, error = %e, "Failed to parse session driver event");
                return;
            }
        };

        if let Some(request_id) = event.reply_to() {
            match pending.remove(request_id) {
                Some((_, reply)) => {
                    let _ = reply.send(event);
                }
                None => debug!(request_id, "Reply for unknown or abandoned request"),
            }
            return;
        }

        if let Some(signal) = SessionEvent::from_driver(event) {
            // The receiver is gone once the session has been reset.
            let _ = events.send(signal).await;
        }
    }

    async fn write_command(stdin: &mut ChildStdin, command: &DriverCommand) -> std::io::Result<()> {
        let mut line = serde_json::to_string(command)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const FAKE_DRIVER: &str = r#"
printf '{"type":"qr","data":"2@abc"}\n'
printf '{"type":"ready","account":"15550001111"}\n'
while read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"type":"send_message"'*)
      printf '{"type":"message_sent","request_id":"%s","message_id":"wamid.1","timestamp":"2024-01-01T00:00:00Z"}\n' "$id" ;;
    *'"type":"logout"'*)
      printf '{"type":"logged_out","request_id":"%s"}\n' "$id" ;;
    *'"type":"shutdown"'*)
      exit 0 ;;
  esac
done
"#;

    fn sh(script: &str) -> SubprocessConnector {
        SubprocessConnector::new(DriverConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..DriverConfig::default()
        })
    }

    async fn next(events: &mut mpsc::Receiver<SessionEvent>) -> Option<SessionEvent> {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("driver event")
    }

    #[tokio::test]
    async fn driver_lifecycle_and_replies() {
        let mut connection = sh(FAKE_DRIVER).connect().await.unwrap();

        assert_eq!(
            next(&mut connection.events).await,
            Some(SessionEvent::QrChallenge("2@abc".to_string()))
        );
        assert_eq!(
            next(&mut connection.events).await,
            Some(SessionEvent::Ready {
                account: Some("15550001111".to_string())
            })
        );

        let receipt = connection.link.send("15550002222", "hi").await.unwrap();
        assert_eq!(receipt.message_id, "wamid.1");

        connection.link.logout().await.unwrap();

        connection.link.shutdown().await;
        connection.link.shutdown().await;
        assert_eq!(next(&mut connection.events).await, None);
    }

    #[tokio::test]
    async fn driver_exit_reports_disconnect() {
        let mut connection = sh("exit 3").connect().await.unwrap();

        match next(&mut connection.events).await {
            Some(SessionEvent::Disconnected(reason)) => {
                assert!(reason.contains("exited"), "reason: {reason}");
            }
            other => panic!("expected disconnect, got {other:?}"),
        }

        let err = connection.link.send("1", "x").await.unwrap_err();
        assert_eq!(err, TransportError::ChannelClosed);
    }

    #[tokio::test]
    async fn missing_driver_binary_is_an_init_error() {
        let connector = SubprocessConnector::new(DriverConfig {
            command: "/nonexistent/herald-driver".to_string(),
            ..DriverConfig::default()
        });

        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, SessionError::Init(_)));
    }
}
