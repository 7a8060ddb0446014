use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};
use wired_proto::TermSize;

/// Terminal type advertised to every spawned shell.
pub const TERM_NAME: &str = "xterm-256color";

/// Size of a single PTY read.
const READ_BUF_SIZE: usize = 65536;

/// How long a hung-up shell gets to exit before it is sent SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(200);

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    WriteFailed(String),
    ResizeFailed(String),
    IoError(std::io::Error),
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "PTY spawn failed: {msg}"),
            PtyError::WriteFailed(msg) => write!(f, "PTY write failed: {msg}"),
            PtyError::ResizeFailed(msg) => write!(f, "PTY resize failed: {msg}"),
            PtyError::IoError(err) => write!(f, "PTY I/O error: {err}"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// How the shell process ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: u32,
    /// Name of the terminating signal, if the process was signalled.
    pub signal: Option<String>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == 0 && self.signal.is_none()
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.signal {
            Some(signal) => write!(f, "signal {signal}"),
            None => write!(f, "code {}", self.code),
        }
    }
}

/// Everything needed to start a shell on a fresh PTY.
#[derive(Clone, Debug)]
pub struct SpawnOptions {
    pub shell: String,
    pub size: TermSize,
    pub cwd: Option<PathBuf>,
    /// Extra variables layered on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl SpawnOptions {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            size: TermSize::default(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn with_size(mut self, size: TermSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// One shell process attached to a pseudo-terminal.
///
/// Output and exit notification are handed out once through
/// [`take_output`](Self::take_output) and [`take_exit`](Self::take_exit).
/// Dropping the handle kills the process.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    size: TermSize,
    alive: Arc<AtomicBool>,
    killed: bool,
    output: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    exit: Option<oneshot::Receiver<ExitStatus>>,
}

impl PtyHandle {
    /// Spawn a shell on a new PTY.
    ///
    /// The child inherits this process's environment, then `options.env`,
    /// then `TERM` is forced to [`TERM_NAME`].
    pub fn spawn(options: &SpawnOptions) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(options.size))
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&options.shell);
        if let Some(cwd) = &options.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        cmd.env("TERM", TERM_NAME);

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            PtyError::SpawnFailed(format!("failed to spawn {}: {e}", options.shell))
        })?;
        // The master must be the only open end so reads hit EOF once the shell exits.
        drop(pair.slave);

        let mut killer = child.clone_killer();
        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        let alive = Arc::new(AtomicBool::new(true));
        let label = pid.map_or_else(|| "unknown".to_string(), |p| p.to_string());

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        let started = start_reader_thread(&label, reader, output_tx)
            .and_then(|()| start_wait_thread(&label, child, Arc::clone(&alive), exit_tx));
        if let Err(e) = started {
            let _ = killer.kill();
            return Err(PtyError::SpawnFailed(format!("failed to start PTY threads: {e}")));
        }

        log::debug!("spawned {} (pid {label}) at {}x{}", options.shell, options.size.cols, options.size.rows);

        Ok(Self {
            master: pair.master,
            writer,
            killer,
            pid,
            size: options.size,
            alive,
            killed: false,
            output: Some(output_rx),
            exit: Some(exit_rx),
        })
    }

    /// OS process id of the shell, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Size last applied to the PTY.
    pub fn size(&self) -> TermSize {
        self.size
    }

    /// Whether the shell is still running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Write bytes to the shell's input.
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        if !self.is_alive() {
            return Err(PtyError::WriteFailed("process has exited".to_string()));
        }
        self.writer
            .write_all(data)
            .and_then(|()| self.writer.flush())
            .map_err(|e| PtyError::WriteFailed(e.to_string()))
    }

    /// Resize the PTY window.
    pub fn resize(&mut self, size: TermSize) -> Result<(), PtyError> {
        if !self.is_alive() {
            return Err(PtyError::ResizeFailed("process has exited".to_string()));
        }
        self.master
            .resize(pty_size(size))
            .map_err(|e| PtyError::ResizeFailed(format!("{e}")))?;
        self.size = size;
        Ok(())
    }

    /// Take the stream of output chunks. Returns `None` after the first call.
    ///
    /// The stream ends once the PTY reports EOF.
    pub fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.output.take()
    }

    /// Take the one-shot exit notification. Returns `None` after the first call.
    pub fn take_exit(&mut self) -> Option<oneshot::Receiver<ExitStatus>> {
        self.exit.take()
    }

    /// Terminate the shell.
    ///
    /// Sends SIGHUP first; a process still running after [`KILL_GRACE`]
    /// (one that ignores or traps HUP) is sent SIGKILL along with its
    /// process group. Idempotent: returns `true` only for the call that
    /// actually signalled a live process.
    pub fn kill(&mut self) -> bool {
        if self.killed || !self.is_alive() {
            return false;
        }
        self.killed = true;
        if let Err(e) = self.killer.kill() {
            log::debug!("hangup for pid {:?} failed: {e}", self.pid);
        }
        if let Some(pid) = self.pid {
            if let Err(e) = start_escalation_thread(pid, Arc::clone(&self.alive)) {
                log::warn!("cannot watch pid {pid} after hangup, killing now: {e}");
                force_kill(pid);
            }
        }
        true
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Forward PTY output to `tx` until EOF, a read error, or the receiver goes away.
fn start_reader_thread(
    label: &str,
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-read-{label}"))
        .spawn(move || {
            let mut buf = vec![0u8; READ_BUF_SIZE];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => return, // EOF: PTY closed
                    Ok(n) => n,
                    Err(_) => return, // EIO once the child side is gone
                };
                if tx.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
        })?;
    Ok(())
}

/// Block on the child's exit, then flip `alive` and notify.
fn start_wait_thread(
    label: &str,
    mut child: Box<dyn Child + Send + Sync>,
    alive: Arc<AtomicBool>,
    tx: oneshot::Sender<ExitStatus>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-wait-{label}"))
        .spawn(move || {
            let status = match child.wait() {
                Ok(status) => ExitStatus {
                    code: status.exit_code(),
                    signal: status.signal().map(str::to_string),
                },
                Err(e) => {
                    log::warn!("waiting on shell failed: {e}");
                    ExitStatus {
                        code: 1,
                        signal: None,
                    }
                }
            };
            alive.store(false, Ordering::SeqCst);
            let _ = tx.send(status);
        })?;
    Ok(())
}

/// SIGKILL `pid` unless it is reaped within [`KILL_GRACE`].
fn start_escalation_thread(pid: u32, alive: Arc<AtomicBool>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(format!("pty-kill-{pid}"))
        .spawn(move || {
            let step = Duration::from_millis(20);
            let mut waited = Duration::ZERO;
            while waited < KILL_GRACE {
                if !alive.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(step);
                waited += step;
            }
            if alive.load(Ordering::SeqCst) {
                log::debug!("pid {pid} survived hangup, sending SIGKILL");
                force_kill(pid);
            }
        })?;
    Ok(())
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    let pid = pid as libc::pid_t;
    // The shell leads its own session, so the group takes its jobs down too.
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
        libc::kill(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn force_kill(_pid: u32) {}

/// bash when it is installed, otherwise the POSIX shell.
pub fn default_shell() -> String {
    ["/bin/bash", "/usr/bin/bash"]
        .into_iter()
        .find(|path| std::path::Path::new(path).exists())
        .unwrap_or("/bin/sh")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{timeout, Instant};

    fn sh() -> SpawnOptions {
        SpawnOptions::new("/bin/sh").with_size(TermSize { cols: 80, rows: 24 })
    }

    /// Collect output until `needle` shows up or three seconds pass.
    async fn read_until(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut output = Vec::new();
        while Instant::now() < deadline {
            match timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some(chunk)) => {
                    output.extend_from_slice(&chunk);
                    if String::from_utf8_lossy(&output).contains(needle) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {}
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[tokio::test]
    async fn test_spawn_pty() {
        let handle = PtyHandle::spawn(&sh());
        assert!(handle.is_ok(), "Failed to spawn PTY: {:?}", handle.err());
        let handle = handle.unwrap();
        assert!(handle.is_alive());
        assert!(handle.pid().is_some());
        assert_eq!(handle.size(), TermSize { cols: 80, rows: 24 });
    }

    #[tokio::test]
    async fn test_write_read_echo() {
        let mut handle = PtyHandle::spawn(&sh()).unwrap();
        let mut output = handle.take_output().unwrap();
        assert!(handle.take_output().is_none());

        handle.write(b"echo WIRED_TEST_OK\n").unwrap();

        let text = read_until(&mut output, "WIRED_TEST_OK\r\n").await;
        assert!(
            text.contains("WIRED_TEST_OK"),
            "Expected output to contain WIRED_TEST_OK, got: {text}"
        );
    }

    #[tokio::test]
    async fn test_term_override() {
        let opts = sh().with_env("TERM", "dumb").with_env("WIRED_MARK", "mark42");
        let mut handle = PtyHandle::spawn(&opts).unwrap();
        let mut output = handle.take_output().unwrap();

        handle.write(b"echo \"T=$TERM M=$WIRED_MARK\"\n").unwrap();

        let text = read_until(&mut output, "M=mark42").await;
        assert!(text.contains("T=xterm-256color M=mark42"), "got: {text}");
    }

    #[tokio::test]
    async fn test_working_directory() {
        let mut handle = PtyHandle::spawn(&sh().with_cwd("/tmp")).unwrap();
        let mut output = handle.take_output().unwrap();

        handle.write(b"pwd\n").unwrap();

        let text = read_until(&mut output, "/tmp\r\n").await;
        assert!(text.contains("/tmp"), "got: {text}");
    }

    #[tokio::test]
    async fn test_resize() {
        let mut handle = PtyHandle::spawn(&sh()).unwrap();
        let result = handle.resize(TermSize { cols: 120, rows: 40 });
        assert!(result.is_ok(), "Resize failed: {:?}", result.err());
        assert_eq!(handle.size(), TermSize { cols: 120, rows: 40 });
    }

    #[tokio::test]
    async fn test_child_exit_notification() {
        let mut handle = PtyHandle::spawn(&sh()).unwrap();
        let exit = handle.take_exit().unwrap();
        let _output = handle.take_output().unwrap();

        handle.write(b"exit 3\n").unwrap();

        let status = timeout(Duration::from_secs(3), exit)
            .await
            .expect("shell should exit")
            .expect("exit sender dropped");
        assert_eq!(status.code, 3);
        assert!(!status.success());
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_write_and_resize_after_exit_fail() {
        let mut handle = PtyHandle::spawn(&sh()).unwrap();
        let exit = handle.take_exit().unwrap();
        handle.write(b"exit 0\n").unwrap();
        timeout(Duration::from_secs(3), exit).await.unwrap().unwrap();

        assert!(matches!(handle.write(b"ls\n"), Err(PtyError::WriteFailed(_))));
        assert!(matches!(
            handle.resize(TermSize { cols: 10, rows: 10 }),
            Err(PtyError::ResizeFailed(_))
        ));
        assert_eq!(handle.size(), TermSize { cols: 80, rows: 24 });
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let mut handle = PtyHandle::spawn(&sh()).unwrap();
        let exit = handle.take_exit().unwrap();

        assert!(handle.kill());
        assert!(!handle.kill());

        let status = timeout(Duration::from_secs(3), exit).await.unwrap().unwrap();
        assert!(!status.success());
        assert!(!handle.is_alive());
        assert!(!handle.kill());
    }

    #[tokio::test]
    async fn test_kill_escalates_when_hangup_is_ignored() {
        let mut handle = PtyHandle::spawn(&sh()).unwrap();
        let exit = handle.take_exit().unwrap();
        let mut output = handle.take_output().unwrap();

        handle.write(b"trap '' HUP; echo re''ady; exec sleep 1000\n").unwrap();
        read_until(&mut output, "ready").await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(handle.kill());
        let status = timeout(Duration::from_secs(3), exit)
            .await
            .expect("process ignoring SIGHUP should still die")
            .unwrap();
        assert!(status.signal.is_some(), "expected a signal exit, got {status:?}");
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_output_stream_ends_after_exit() {
        let mut handle = PtyHandle::spawn(&sh()).unwrap();
        let mut output = handle.take_output().unwrap();
        handle.write(b"exit 0\n").unwrap();

        let ended = timeout(Duration::from_secs(3), async {
            while output.recv().await.is_some() {}
        })
        .await;
        assert!(ended.is_ok(), "output stream should close after the shell exits");
    }

    #[test]
    fn test_spawn_missing_shell_fails() {
        let result = PtyHandle::spawn(&SpawnOptions::new("/nonexistent/wired-shell"));
        assert!(matches!(result, Err(PtyError::SpawnFailed(_))));
    }

    #[test]
    fn test_default_shell_detection() {
        let shell = default_shell();
        assert!(!shell.is_empty(), "Default shell should not be empty");
        assert!(
            shell.starts_with('/'),
            "Default shell should be an absolute path, got: {shell}"
        );
    }
}
