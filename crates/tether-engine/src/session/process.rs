//! One CLI process per turn.
//!
//! Builds the invocation, spawns the child with piped stdio, writes the
//! message and closes stdin, then reports decoded stdout records and the
//! exit back to the session actor.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tether_core::SessionId;
use tether_protocol::StreamDecoder;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::commands::{ProcessEvent, SessionError, TurnRequest};
use crate::config::{EngineConfig, ThinkingIntensity};
use crate::permissions::APPROVAL_TOOL;

const PLAN_DIRECTIVE: &str = "PLAN FIRST FOR THIS MESSAGE ONLY: Plan first before making any changes. \
Show me in detail what you will change and wait for my explicit approval in a separate message \
before proceeding. Do not implement anything until I confirm. This planning requirement applies \
ONLY to this current message. \n\n";

const READ_CHUNK: usize = 8 * 1024;

/// Prefixes the plan and thinking directives to a user message.
pub fn compose_message(request: &TurnRequest, intensity: ThinkingIntensity) -> String {
    let mut message = request.text.clone();
    if request.plan {
        message = format!("{PLAN_DIRECTIVE}{message}");
    }
    if request.think {
        message = format!("{} THROUGH THIS STEP BY STEP: \n{message}", intensity.phrase());
    }
    message
}

/// Everything needed to start one turn's process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Composed message, written to stdin
    pub input: String,
}

impl TurnInvocation {
    pub fn new(
        config: &EngineConfig,
        session_id: Option<&SessionId>,
        permission_config: Option<&Path>,
        input: String,
    ) -> Self {
        Self {
            program: config.cli_path.clone(),
            args: build_args(config, session_id, permission_config),
            working_dir: config.working_dir.clone(),
            input,
        }
    }
}

/// CLI arguments for one turn.
pub fn build_args(
    config: &EngineConfig,
    session_id: Option<&SessionId>,
    permission_config: Option<&Path>,
) -> Vec<String> {
    let mut args: Vec<String> = ["-p", "--output-format", "stream-json", "--verbose"]
        .into_iter()
        .map(String::from)
        .collect();

    if config.skip_permissions {
        args.push("--dangerously-skip-permissions".to_string());
    } else if let Some(path) = permission_config {
        args.extend([
            "--mcp-config".to_string(),
            path.display().to_string(),
            "--allowedTools".to_string(),
            APPROVAL_TOOL.to_string(),
            "--permission-prompt-tool".to_string(),
            APPROVAL_TOOL.to_string(),
        ]);
    } else {
        warn!("No permission broker attached; tool prompts will be denied by the CLI");
    }

    if let Some(model) = config.model.cli_flag() {
        args.extend(["--model".to_string(), model.to_string()]);
    }

    if let Some(id) = session_id {
        args.extend(["--resume".to_string(), id.as_str().to_string()]);
    }

    args
}

/// Spawns the turn's process and its I/O tasks.
///
/// Returns the child's pid. Cancelling `cancel` sends SIGTERM and kills
/// the child if it is still alive after `grace`.
pub fn spawn_turn(
    invocation: &TurnInvocation,
    turn: u64,
    events: mpsc::UnboundedSender<ProcessEvent>,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<Option<u32>, SessionError> {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .env("FORCE_COLOR", "0")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &invocation.working_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| SessionError::Spawn {
        program: invocation.program.clone(),
        source,
    })?;
    let pid = child.id();

    let stdin = child.stdin.take().ok_or(SessionError::MissingPipe("stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or(SessionError::MissingPipe("stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or(SessionError::MissingPipe("stderr"))?;

    info!(turn, pid = ?pid, program = %invocation.program, "Turn process started");

    tokio::spawn(write_input(stdin, format!("{}\n", invocation.input)));
    let reader = tokio::spawn(read_records(stdout, turn, events.clone()));
    let diagnostics = tokio::spawn(read_to_string(stderr));

    tokio::spawn(async move {
        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        // A stopped process may leave children holding its pipes
        let limit = finished.is_none().then_some(grace);
        let status = match finished {
            Some(status) => status,
            None => terminate(&mut child, grace).await,
        };

        // Records must all be delivered before the exit
        join_within(reader, limit).await;
        let stderr = join_within(diagnostics, limit).await.unwrap_or_default();

        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(turn, error = %e, "Failed to wait for turn process");
                None
            }
        };
        debug!(turn, code = ?code, stderr_len = stderr.len(), "Turn process exited");

        if events
            .send(ProcessEvent::Exited { turn, code, stderr })
            .is_err()
        {
            debug!(turn, "Session actor gone before process exit");
        }
    });

    Ok(pid)
}

/// Joins a pipe task, abandoning it after `limit` if one is given.
async fn join_within<T>(mut task: JoinHandle<T>, limit: Option<Duration>) -> Option<T> {
    let joined = match limit {
        None => task.await,
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                debug!("Pipe still open after stop, abandoning reader");
                task.abort();
                return None;
            }
        },
    };
    match joined {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Pipe task failed");
            None
        }
    }
}

async fn write_input(mut stdin: ChildStdin, input: String) {
    if let Err(e) = stdin.write_all(input.as_bytes()).await {
        warn!(error = %e, "Failed to write message to CLI");
        return;
    }
    if let Err(e) = stdin.shutdown().await {
        debug!(error = %e, "Failed to close CLI stdin");
    }
}

async fn read_records(
    mut stdout: impl AsyncRead + Unpin,
    turn: u64,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let mut decoder = StreamDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(turn, error = %e, "Failed to read CLI stdout");
                break;
            }
        };
        for value in decoder.feed(&chunk[..n]) {
            if events.send(ProcessEvent::Record { turn, value }).is_err() {
                return;
            }
        }
    }

    for value in decoder.finish() {
        if events.send(ProcessEvent::Record { turn, value }).is_err() {
            return;
        }
    }
}

async fn read_to_string(mut stderr: impl AsyncRead + Unpin) -> String {
    let mut bytes = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut bytes).await {
        debug!(error = %e, "Failed to read CLI stderr");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Graceful stop: SIGTERM, then kill once `grace` runs out.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    request_exit(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "Turn process ignored SIGTERM, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if result != 0 {
        debug!(pid, "Failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Failed to kill turn process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::ModelChoice;

    #[test]
    fn test_compose_plain() {
        let message = compose_message(&TurnRequest::new("hello"), ThinkingIntensity::Think);
        assert_eq!(message, "hello");
    }

    #[test]
    fn test_compose_plan_then_thinking() {
        let request = TurnRequest::new("refactor").with_plan(true).with_thinking(true);
        let message = compose_message(&request, ThinkingIntensity::ThinkHard);

        assert!(message.starts_with("THINK HARD THROUGH THIS STEP BY STEP: \nPLAN FIRST"));
        assert!(message.ends_with("current message. \n\nrefactor"));
    }

    #[test]
    fn test_args_with_broker() {
        let config = EngineConfig::default();
        let args = build_args(&config, None, Some(Path::new("/s/mcp-servers.json")));

        assert_eq!(&args[..4], &["-p", "--output-format", "stream-json", "--verbose"]);
        assert!(args.windows(2).any(|w| w == ["--mcp-config", "/s/mcp-servers.json"]));
        assert!(args.windows(2).any(|w| w == ["--permission-prompt-tool", APPROVAL_TOOL]));
        assert!(!args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(!args.contains(&"--model".to_string()));
        assert!(!args.contains(&"--resume".to_string()));
    }

    #[test]
    fn test_args_skip_permissions_model_and_resume() {
        let config = EngineConfig {
            skip_permissions: true,
            model: ModelChoice::Opus,
            ..EngineConfig::default()
        };
        let id = SessionId::new("sess-1");
        let args = build_args(&config, Some(&id), Some(Path::new("/ignored.json")));

        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(!args.contains(&"--mcp-config".to_string()));
        assert!(args.windows(2).any(|w| w == ["--model", "opus"]));
        assert!(args.windows(2).any(|w| w == ["--resume", "sess-1"]));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let invocation = TurnInvocation {
            program: "/nonexistent/tether-test-cli".to_string(),
            args: Vec::new(),
            working_dir: None,
            input: String::new(),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = spawn_turn(
            &invocation,
            1,
            tx,
            CancellationToken::new(),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(SessionError::Spawn { .. })));
    }
}
