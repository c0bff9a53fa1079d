// ABOUTME: Shell command execution with line-at-a-time output streaming
// ABOUTME: Runs concurrently; timeouts escalate SIGTERM to SIGKILL and still yield a result

use crate::observer::ObservationSink;
use mentis_protocol::{Observation, RunShellCommandRequest, StreamKind, INTERNAL_ERROR_EXIT_CODE};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Exit code reported when a command is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How long a process gets between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Run one shell command, streaming each output line as it is produced and
/// finishing with exactly one `result` observation.
pub async fn run_shell(
    sink: Arc<dyn ObservationSink>,
    default_work_dir: PathBuf,
    req: RunShellCommandRequest,
) {
    let action_id = req.action_id.clone();
    info!(%action_id, command = %req.command, "Running shell command");

    let work_dir = req
        .work_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or(default_work_dir);

    let mut command = Command::new("/bin/sh");
    command
        .arg("-c")
        .arg(&req.command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if work_dir.is_dir() {
        command.current_dir(&work_dir);
    }
    // Request env is merged over the inherited process environment.
    if let Some(env) = &req.env {
        command.envs(env);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let msg = format!("failed to spawn command: {e}");
            warn!(%action_id, "{msg}");
            sink.emit(Observation::error(&action_id, msg.clone())).await;
            sink.emit(Observation::result(
                &action_id,
                INTERNAL_ERROR_EXIT_CODE,
                Some(msg),
            ))
            .await;
            return;
        }
    };

    let stdout_pump = child
        .stdout
        .take()
        .map(|out| spawn_pump(out, StreamKind::Stdout, sink.clone(), action_id.clone()));
    let stderr_pump = child
        .stderr
        .take()
        .map(|err| spawn_pump(err, StreamKind::Stderr, sink.clone(), action_id.clone()));

    let waited = match req.timeout_seconds {
        Some(secs) => match timeout(Duration::from_secs(secs), child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%action_id, secs, "Command timed out, terminating");
                terminate(&mut child).await;
                drain(stdout_pump, stderr_pump).await;
                let msg = format!("command timed out after {secs}s");
                sink.emit(Observation::error(&action_id, msg.clone())).await;
                sink.emit(Observation::result(&action_id, TIMEOUT_EXIT_CODE, Some(msg)))
                    .await;
                return;
            }
        },
        None => child.wait().await,
    };

    // All produced lines go out before the terminal result.
    drain(stdout_pump, stderr_pump).await;

    match waited {
        Ok(status) => {
            let code = exit_code(status);
            info!(%action_id, exit_code = code, "Shell command finished");
            sink.emit(Observation::result(&action_id, code, None)).await;
        }
        Err(e) => {
            let msg = format!("failed waiting for command: {e}");
            warn!(%action_id, "{msg}");
            sink.emit(Observation::error(&action_id, msg.clone())).await;
            sink.emit(Observation::result(
                &action_id,
                INTERNAL_ERROR_EXIT_CODE,
                Some(msg),
            ))
            .await;
        }
    }
}

fn spawn_pump(
    reader: impl AsyncRead + Unpin + Send + 'static,
    kind: StreamKind,
    sink: Arc<dyn ObservationSink>,
    action_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    sink.emit(Observation::stream(&action_id, kind, line)).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(%action_id, ?kind, "Output stream read failed: {}", e);
                    break;
                }
            }
        }
    })
}

async fn drain(stdout: Option<JoinHandle<()>>, stderr: Option<JoinHandle<()>>) {
    if let Some(task) = stdout {
        let _ = task.await;
    }
    if let Some(task) = stderr {
        let _ = task.await;
    }
}

/// SIGTERM first so trap handlers run; SIGKILL once the grace expires.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            if timeout(TERM_GRACE, child.wait()).await.is_ok() {
                return;
            }
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))
            .unwrap_or(INTERNAL_ERROR_EXIT_CODE)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(INTERNAL_ERROR_EXIT_CODE)
    }
}
