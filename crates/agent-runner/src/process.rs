//! Agent process management

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError};

const READ_BUFFER_SIZE: usize = 4096;

/// Fully resolved command line for one agent launch
///
/// A restart after a self-upgrade reuses the same value, so the arguments
/// are identical across attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    /// Written to stdin right after spawn when the agent takes no prompt flag
    pub stdin_prompt: Option<String>,
}

impl AgentCommand {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: vec![
                ("NO_COLOR".to_string(), "1".to_string()),
                ("TERM".to_string(), "dumb".to_string()),
            ],
            stdin_prompt: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Output stream type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A chunk of agent output as it arrived on the pipe
///
/// Chunks are not line-aligned: interactive prompts usually end without a
/// newline and must be seen before the agent blocks on input.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// Serialized writer for the agent's stdin
///
/// Prompt replies and health probes may race; every write takes the lock
/// for the whole `write_all` + `flush`, so partial writes never interleave.
#[derive(Debug, Clone)]
pub struct AgentInput {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

impl AgentInput {
    fn new(stdin: Option<ChildStdin>) -> Self {
        Self {
            stdin: Arc::new(Mutex::new(stdin)),
        }
    }

    /// Send a line to the agent
    pub async fn send_line(&self, text: &str) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "agent stdin is closed")
        })?;
        stdin.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await
    }

    /// Drop the stdin handle so the agent sees EOF
    pub async fn close(&self) {
        self.stdin.lock().await.take();
    }
}

/// A spawned agent with its output channel and input writer
pub struct RunningAgent {
    child: Child,
    pub input: AgentInput,
    output: Option<mpsc::Receiver<OutputChunk>>,
    readers: Vec<JoinHandle<()>>,
}

impl RunningAgent {
    /// Spawn the agent described by `command`
    pub fn spawn(command: &AgentCommand) -> Result<Self> {
        info!(
            "Spawning {} in {:?} with {} args",
            command.program,
            command.working_dir,
            command.args.len()
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&command.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            SupervisorError::spawn_failed_with_source(
                format!("Failed to spawn {}: {}", command.program, e),
                e,
            )
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::spawn_failed("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SupervisorError::spawn_failed("Failed to capture stderr"))?;

        let (tx, rx) = mpsc::channel(256);
        let readers = vec![
            tokio::spawn(read_chunks(stdout, OutputStream::Stdout, tx.clone())),
            tokio::spawn(read_chunks(stderr, OutputStream::Stderr, tx)),
        ];

        Ok(Self {
            input: AgentInput::new(child.stdin.take()),
            child,
            output: Some(rx),
            readers,
        })
    }

    /// Get the process ID
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take the merged stdout/stderr channel. Returns `None` after the first call.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<OutputChunk>> {
        self.output.take()
    }

    /// Wait for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the process to exit (SIGTERM on unix)
    pub fn terminate(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: plain kill(2) on a pid we own; no memory is touched
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if rc == 0 {
                    return Ok(());
                }
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    /// Kill the process immediately
    pub fn kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    /// Stop the output readers once the exit has been observed
    pub fn abort_readers(&mut self) {
        for handle in self.readers.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for RunningAgent {
    fn drop(&mut self) {
        self.abort_readers();
    }
}

async fn read_chunks<R>(mut reader: R, stream: OutputStream, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut pending = Vec::new();
    loop {
        let text = match reader.read(&mut buf).await {
            Ok(0) => {
                if pending.is_empty() {
                    break;
                }
                let rest = String::from_utf8_lossy(&pending).into_owned();
                pending.clear();
                rest
            }
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                decode_utf8(&mut pending)
            }
            Err(e) => {
                warn!("Failed to read agent {:?}: {}", stream, e);
                break;
            }
        };
        if text.is_empty() {
            continue;
        }
        debug!("{:?}: {}", stream, text.trim_end());
        if tx.send(OutputChunk { stream, text }).await.is_err() {
            warn!("Output channel closed, stopping {:?} reader", stream);
            break;
        }
    }
}

/// Decode the complete characters in `pending`, leaving a split trailing
/// sequence behind for the next read
fn decode_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> AgentCommand {
        AgentCommand::new("sh", std::env::temp_dir()).args(["-c", script])
    }

    async fn collect(output: &mut mpsc::Receiver<OutputChunk>) -> String {
        let mut out = String::new();
        while let Some(chunk) = output.recv().await {
            out.push_str(&chunk.text);
        }
        out
    }

    #[tokio::test]
    async fn test_spawn_and_read_both_streams() {
        let mut agent = RunningAgent::spawn(&sh("echo out; echo err 1>&2")).unwrap();
        let mut rx = agent.take_output().unwrap();
        let output = collect(&mut rx).await;
        let status = agent.wait().await.unwrap();

        assert!(status.success());
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[tokio::test]
    async fn test_unterminated_prompt_is_delivered() {
        let mut agent =
            RunningAgent::spawn(&sh("printf 'Proceed? '; read answer; echo got=$answer")).unwrap();
        let mut rx = agent.take_output().unwrap();
        assert!(agent.take_output().is_none());

        let first = rx.recv().await.unwrap();
        assert!(first.text.contains("Proceed?"));

        agent.input.send_line("y").await.unwrap();
        let rest = collect(&mut rx).await;
        assert!(rest.contains("got=y"));
        agent.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_character_split_across_reads() {
        let mut agent =
            RunningAgent::spawn(&sh("printf 'caf\\303'; sleep 0.2; printf '\\251\\n'")).unwrap();
        let mut rx = agent.take_output().unwrap();
        let output = collect(&mut rx).await;
        agent.wait().await.unwrap();

        assert_eq!(output, "café\n");
    }

    #[test]
    fn test_decode_keeps_incomplete_tail() {
        let mut pending = b"caf\xc3".to_vec();
        assert_eq!(decode_utf8(&mut pending), "caf");
        assert_eq!(pending, b"\xc3");

        pending.extend_from_slice(b"\xa9!");
        assert_eq!(decode_utf8(&mut pending), "é!");
        assert!(pending.is_empty());

        let mut invalid = b"a\xffb".to_vec();
        assert_eq!(decode_utf8(&mut invalid), "a\u{fffd}b");
        assert!(invalid.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let command = AgentCommand::new("definitely-not-an-agent-binary", std::env::temp_dir());
        let result = RunningAgent::spawn(&command);
        assert!(matches!(result, Err(SupervisorError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_terminate_stops_process() {
        let mut agent = RunningAgent::spawn(&sh("exec sleep 30")).unwrap();
        agent.terminate().unwrap();
        let status = agent.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let mut agent = RunningAgent::spawn(&sh("cat >/dev/null")).unwrap();
        agent.input.close().await;
        assert!(agent.input.send_line("x").await.is_err());
        agent.wait().await.unwrap();
    }
}
