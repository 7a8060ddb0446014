//! Session bridge: one WebSocket connection to one shell process.
//!
//! The bridge is transport-agnostic. It consumes decoded [`ClientMessage`]s
//! and produces [`ServerMessage`]s over channels; `ws.rs` adapts those to
//! an actual socket.
//!
//! Lifecycle: `AwaitingProcess -> Bridged -> TornDown`. The shell is spawned
//! at the size carried by a resize that arrives within the grace window, or
//! at the default size otherwise. Process exit ends the bridge (and so
//! closes the socket); a closed socket kills the process.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use wired_proto::{ClientMessage, ServerMessage, Utf8Decoder};
use wired_pty::{ExitStatus, PtyHandle, SpawnOptions};

use crate::state::ConnectionId;

/// How long to keep forwarding output after the shell exits, in case
/// something else still holds the PTY open.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for a killed shell to be reaped, SIGKILL escalation included.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    AwaitingProcess,
    Bridged,
    TornDown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TeardownReason {
    /// The client went away; the shell was killed.
    ChannelClosed,
    /// The shell exited on its own.
    ProcessExited(ExitStatus),
    /// The shell could not be started.
    SpawnFailed(String),
}

/// Summary of a finished bridge, mostly for logs and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeReport {
    pub pid: Option<u32>,
    pub reason: TeardownReason,
    /// Whether this bridge delivered the kill signal.
    pub killed: bool,
}

struct Bridge {
    id: ConnectionId,
    state: BridgeState,
    pty: PtyHandle,
    outbound: mpsc::Sender<ServerMessage>,
    decoder: Utf8Decoder,
}

/// Run one bridge to completion.
pub async fn run_bridge(
    id: ConnectionId,
    mut options: SpawnOptions,
    grace: Duration,
    mut inbound: mpsc::Receiver<ClientMessage>,
    outbound: mpsc::Sender<ServerMessage>,
    mut notices: broadcast::Receiver<String>,
) -> BridgeReport {
    let mut state = BridgeState::AwaitingProcess;
    log::debug!("[conn {id}] {state:?}");

    // A resize sent right after connecting decides the initial size; any
    // other early message is replayed once the shell is up.
    let mut pending = None;
    match timeout(grace, inbound.recv()).await {
        Ok(Some(message)) => match message.requested_size() {
            Some(size) => options.size = size,
            None => pending = Some(message),
        },
        Ok(None) => {
            log::info!("[conn {id}] closed before the shell started");
            enter(id, &mut state, BridgeState::TornDown);
            return BridgeReport {
                pid: None,
                reason: TeardownReason::ChannelClosed,
                killed: false,
            };
        }
        Err(_) => {}
    }

    let mut pty = match PtyHandle::spawn(&options) {
        Ok(pty) => pty,
        Err(e) => {
            log::error!("[conn {id}] {e}");
            enter(id, &mut state, BridgeState::TornDown);
            return BridgeReport {
                pid: None,
                reason: TeardownReason::SpawnFailed(e.to_string()),
                killed: false,
            };
        }
    };
    let pid = pty.pid();
    let (Some(mut output), Some(mut exit)) = (pty.take_output(), pty.take_exit()) else {
        // Fresh handles always carry both; treat anything else as a failed start.
        return BridgeReport {
            pid,
            reason: TeardownReason::SpawnFailed("process streams unavailable".to_string()),
            killed: pty.kill(),
        };
    };

    log::info!(
        "[conn {id}] bridged to {} (pid {pid:?}) at {}x{}",
        options.shell,
        options.size.cols,
        options.size.rows
    );

    enter(id, &mut state, BridgeState::Bridged);
    let mut bridge = Bridge {
        id,
        state,
        pty,
        outbound,
        decoder: Utf8Decoder::new(),
    };

    let mut client_open = true;
    if let Some(message) = pending {
        client_open = bridge.handle_client(message).await;
    }

    let mut output_open = true;
    let mut notices_open = true;
    let reason = loop {
        if !client_open {
            break TeardownReason::ChannelClosed;
        }
        tokio::select! {
            chunk = output.recv(), if output_open => match chunk {
                Some(bytes) => client_open = bridge.forward_output(&bytes).await,
                // EOF; the exit notification follows.
                None => output_open = false,
            },
            status = &mut exit => {
                let status = status.unwrap_or(ExitStatus { code: 1, signal: None });
                bridge.drain(&mut output, output_open).await;
                break TeardownReason::ProcessExited(status);
            }
            message = inbound.recv() => match message {
                Some(message) => client_open = bridge.handle_client(message).await,
                None => client_open = false,
            },
            notice = notices.recv(), if notices_open => match notice {
                Ok(line) => client_open = bridge.send(ServerMessage::Output {
                    data: format!("\r\n{line}\r\n"),
                }).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("[conn {id}] missed {missed} notice(s)");
                }
                Err(broadcast::error::RecvError::Closed) => notices_open = false,
            },
        }
    };

    bridge.teardown(pid, reason, exit).await
}

fn enter(id: ConnectionId, state: &mut BridgeState, next: BridgeState) {
    log::debug!("[conn {id}] {state:?} -> {next:?}");
    *state = next;
}

impl Bridge {
    /// Apply one client message. Returns `false` once the client is gone.
    async fn handle_client(&mut self, message: ClientMessage) -> bool {
        match message {
            ClientMessage::Input { data } => {
                if let Err(e) = self.pty.write(data.as_bytes()) {
                    log::debug!("[conn {}] input dropped: {e}", self.id);
                }
                true
            }
            message @ ClientMessage::Resize { .. } => {
                if let Some(size) = message.requested_size() {
                    if let Err(e) = self.pty.resize(size) {
                        log::debug!("[conn {}] resize dropped: {e}", self.id);
                    }
                }
                true
            }
            ClientMessage::Heartbeat { timestamp } => {
                self.send(ServerMessage::Heartbeat { timestamp }).await
            }
        }
    }

    async fn forward_output(&mut self, bytes: &[u8]) -> bool {
        let data = self.decoder.decode(bytes);
        if data.is_empty() {
            return true;
        }
        self.send(ServerMessage::Output { data }).await
    }

    async fn send(&mut self, message: ServerMessage) -> bool {
        self.outbound.send(message).await.is_ok()
    }

    /// Forward whatever the shell wrote before it exited.
    async fn drain(&mut self, output: &mut mpsc::UnboundedReceiver<Vec<u8>>, open: bool) {
        if open {
            let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
            while let Ok(Some(bytes)) = tokio::time::timeout_at(deadline, output.recv()).await {
                if !self.forward_output(&bytes).await {
                    return;
                }
            }
        }
        let rest = self.decoder.finish();
        if !rest.is_empty() {
            self.send(ServerMessage::Output { data: rest }).await;
        }
    }

    async fn teardown(
        mut self,
        pid: Option<u32>,
        reason: TeardownReason,
        exit: oneshot::Receiver<ExitStatus>,
    ) -> BridgeReport {
        enter(self.id, &mut self.state, BridgeState::TornDown);
        let mut killed = false;
        match &reason {
            TeardownReason::ChannelClosed => {
                killed = self.pty.kill();
                match timeout(REAP_TIMEOUT, exit).await {
                    Ok(Ok(status)) => {
                        log::info!("[conn {}] client left, shell ended with {status}", self.id)
                    }
                    _ => log::warn!("[conn {}] client left, shell {pid:?} not reaped yet", self.id),
                }
            }
            TeardownReason::ProcessExited(status) => {
                log::info!("[conn {}] shell exited with {status}", self.id);
            }
            TeardownReason::SpawnFailed(_) => {}
        }
        BridgeReport {
            pid,
            reason,
            killed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tokio::time::Instant;

    struct Harness {
        inbound: mpsc::Sender<ClientMessage>,
        outbound: mpsc::Receiver<ServerMessage>,
        notices: broadcast::Sender<String>,
        task: tokio::task::JoinHandle<BridgeReport>,
    }

    fn start(options: SpawnOptions, grace: Duration) -> Harness {
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(64);
        let (notices, notice_rx) = broadcast::channel(8);
        let task = tokio::spawn(run_bridge(1, options, grace, in_rx, out_tx, notice_rx));
        Harness {
            inbound: in_tx,
            outbound: out_rx,
            notices,
            task,
        }
    }

    fn sh() -> SpawnOptions {
        SpawnOptions::new("/bin/sh").with_env("PS1", "$ ")
    }

    /// Collect output until `needle` shows up or five seconds pass.
    async fn read_until(rx: &mut mpsc::Receiver<ServerMessage>, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = String::new();
        while !seen.contains(needle) {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(ServerMessage::Output { data })) => seen.push_str(&data),
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        seen
    }

    async fn input(h: &Harness, data: &str) {
        h.inbound
            .send(ClientMessage::Input {
                data: data.to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_input_reaches_shell_and_output_returns() {
        let mut h = start(sh(), Duration::from_millis(10));
        input(&h, "echo hel''lo\n").await;
        let out = read_until(&mut h.outbound, "hello").await;
        assert!(out.contains("hello"), "got {out:?}");
    }

    #[tokio::test]
    async fn test_first_resize_sets_initial_size() {
        let mut h = start(sh(), Duration::from_secs(2));
        h.inbound
            .send(ClientMessage::Resize { cols: 120, rows: 40 })
            .await
            .unwrap();
        input(&h, "stty size\n").await;
        let out = read_until(&mut h.outbound, "40 120").await;
        assert!(out.contains("40 120"), "got {out:?}");
    }

    #[tokio::test]
    async fn test_default_size_without_resize() {
        let mut h = start(sh(), Duration::from_millis(10));
        input(&h, "stty size\n").await;
        let out = read_until(&mut h.outbound, "30 80").await;
        assert!(out.contains("30 80"), "got {out:?}");
    }

    #[tokio::test]
    async fn test_out_of_range_resize_is_clamped() {
        let mut h = start(sh(), Duration::from_millis(10));
        h.inbound
            .send(ClientMessage::Resize {
                cols: 5_000,
                rows: -3,
            })
            .await
            .unwrap();
        input(&h, "stty size\n").await;
        let out = read_until(&mut h.outbound, "1 1000").await;
        assert!(out.contains("1 1000"), "got {out:?}");
    }

    #[tokio::test]
    async fn test_heartbeat_is_echoed() {
        let mut h = start(sh(), Duration::from_millis(10));
        h.inbound
            .send(ClientMessage::Heartbeat { timestamp: 1234 })
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, h.outbound.recv()).await {
                Ok(Some(ServerMessage::Heartbeat { timestamp })) => {
                    assert_eq!(timestamp, 1234);
                    break;
                }
                Ok(Some(_)) => {}
                other => panic!("no heartbeat echo: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_process_exit_ends_bridge_with_trailing_output() {
        let mut h = start(sh(), Duration::from_millis(10));
        input(&h, "printf 'by%s\\n' e; exit 3\n").await;
        let out = read_until(&mut h.outbound, "bye").await;
        assert!(out.contains("bye"));

        let report = tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            report.reason,
            TeardownReason::ProcessExited(ExitStatus {
                code: 3,
                signal: None
            })
        );
        assert!(!report.killed);
    }

    #[tokio::test]
    async fn test_channel_close_kills_process_once() {
        let mut h = start(sh(), Duration::from_millis(10));
        input(&h, "echo ready\n").await;
        read_until(&mut h.outbound, "ready").await;

        drop(h.inbound);
        let report = tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.reason, TeardownReason::ChannelClosed);
        assert!(report.killed);

        let pid = report.pid.unwrap();
        let proc_dir = format!("/proc/{pid}");
        let deadline = Instant::now() + Duration::from_secs(3);
        while Path::new(&proc_dir).exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!Path::new(&proc_dir).exists(), "shell {pid} still running");
    }

    #[tokio::test]
    async fn test_channel_close_kills_process_ignoring_hangup() {
        let mut h = start(sh(), Duration::from_millis(10));
        input(&h, "trap '' HUP; echo re''ady; exec sleep 1000\n").await;
        read_until(&mut h.outbound, "ready").await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        drop(h.inbound);
        let report = tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .unwrap()
            .unwrap();
        assert!(report.killed);

        let pid = report.pid.unwrap();
        assert!(
            !Path::new(&format!("/proc/{pid}")).exists(),
            "process {pid} survived channel close"
        );
    }

    #[tokio::test]
    async fn test_close_before_spawn() {
        let h = start(sh(), Duration::from_secs(5));
        drop(h.inbound);
        let report = h.task.await.unwrap();
        assert_eq!(report.pid, None);
        assert_eq!(report.reason, TeardownReason::ChannelClosed);
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let h = start(
            SpawnOptions::new("/definitely/not/a/shell"),
            Duration::from_millis(10),
        );
        let report = h.task.await.unwrap();
        assert!(matches!(report.reason, TeardownReason::SpawnFailed(_)));
        drop(h.inbound);
    }

    #[tokio::test]
    async fn test_notices_are_forwarded() {
        let mut h = start(sh(), Duration::from_millis(10));
        input(&h, "echo ready\n").await;
        read_until(&mut h.outbound, "ready").await;

        h.notices.send("Uploaded: a.txt -> /tmp".to_string()).unwrap();
        let out = read_until(&mut h.outbound, "Uploaded: a.txt").await;
        assert!(out.contains("\r\nUploaded: a.txt -> /tmp\r\n"));
    }

    #[tokio::test]
    async fn test_early_input_is_replayed_after_spawn() {
        let mut h = start(sh(), Duration::from_secs(2));
        input(&h, "echo ear''ly\n").await;
        let out = read_until(&mut h.outbound, "early").await;
        assert!(out.contains("early"));
    }
}
