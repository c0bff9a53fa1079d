// ABOUTME: Long-lived IPython kernel preserving state across cells, one per sandbox
// ABOUTME: Cells serialize behind a mutex held for the full request/reply cycle

use crate::error::{ExecutorError, Result};
use crate::observer::ObservationSink;
use mentis_protocol::{Observation, StreamKind, INTERNAL_ERROR_EXIT_CODE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Exit code for cells whose execution raised.
const CELL_ERROR_EXIT_CODE: i32 = 1;

/// Driver program hosting the IPython shell. Speaks JSON lines: one
/// request per stdin line, stream events and one execute_reply per cell on
/// stdout. The shell instance persists, so assignments survive cells.
const KERNEL_DRIVER: &str = r#"
import json
import os
import sys

from IPython.core.interactiveshell import InteractiveShell

proto = os.fdopen(os.dup(sys.stdout.fileno()), "w", buffering=1)


def send(event):
    proto.write(json.dumps(event) + "\n")
    proto.flush()


class StreamWriter:
    def __init__(self, name):
        self.name = name
        self.buf = ""

    def write(self, data):
        self.buf += data
        while "\n" in self.buf:
            line, self.buf = self.buf.split("\n", 1)
            send({"event": "stream", "stream": self.name, "text": line})
        return len(data)

    def flush(self):
        if self.buf:
            send({"event": "stream", "stream": self.name, "text": self.buf})
            self.buf = ""


shell = InteractiveShell.instance(banner1="", exit_msg="")

for raw in sys.stdin:
    try:
        request = json.loads(raw)
    except ValueError:
        continue
    out, err = StreamWriter("stdout"), StreamWriter("stderr")
    saved = sys.stdout, sys.stderr
    sys.stdout, sys.stderr = out, err
    try:
        result = shell.run_cell(request.get("code", ""), store_history=True)
    finally:
        sys.stdout, sys.stderr = saved
        out.flush()
        err.flush()
    failure = result.error_in_exec or result.error_before_exec
    if failure is None:
        send({"event": "execute_reply", "status": "ok"})
    else:
        import traceback

        send({
            "event": "execute_reply",
            "status": "error",
            "ename": type(failure).__name__,
            "evalue": str(failure),
            "traceback": traceback.format_exception(
                type(failure), failure, failure.__traceback__
            ),
        })
"#;

/// One event line from the kernel driver.
#[derive(Debug, Deserialize)]
struct KernelEvent {
    event: String,
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    ename: Option<String>,
    #[serde(default)]
    evalue: Option<String>,
    #[serde(default)]
    traceback: Option<Vec<String>>,
}

struct KernelProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl KernelProcess {
    fn spawn(python_bin: &str, work_dir: &Path) -> Result<Self> {
        let mut command = Command::new(python_bin);
        command
            .arg("-c")
            .arg(KERNEL_DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if work_dir.is_dir() {
            command.current_dir(work_dir);
        }
        let mut child = command.spawn()?;
        let stdin = child.stdin.take().ok_or(ExecutorError::KernelPipes)?;
        let stdout = child.stdout.take().ok_or(ExecutorError::KernelPipes)?;
        info!(python_bin, "IPython kernel started");
        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }

    async fn run_cell(
        &mut self,
        action_id: &str,
        code: &str,
        sink: &Arc<dyn ObservationSink>,
    ) -> Result<()> {
        let request = serde_json::json!({ "code": code });
        self.stdin.write_all(request.to_string().as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Err(ExecutorError::KernelExited);
            };
            let event: KernelEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(_) => {
                    // Interpreter noise (import warnings etc.), not protocol.
                    debug!(%line, "Ignoring non-protocol kernel output");
                    continue;
                }
            };
            match event.event.as_str() {
                "stream" => {
                    let kind = if event.stream.as_deref() == Some("stderr") {
                        StreamKind::Stderr
                    } else {
                        StreamKind::Stdout
                    };
                    sink.emit(Observation::stream(
                        action_id,
                        kind,
                        event.text.unwrap_or_default(),
                    ))
                    .await;
                }
                "execute_reply" => {
                    if event.status.as_deref() == Some("ok") {
                        sink.emit(Observation::result(action_id, 0, None)).await;
                    } else {
                        let ename = event.ename.unwrap_or_else(|| "Error".to_string());
                        let evalue = event.evalue.unwrap_or_default();
                        let mut message = format!("{ename}: {evalue}");
                        if let Some(tb) = event.traceback.filter(|tb| !tb.is_empty()) {
                            message.push('\n');
                            message.push_str(&tb.join(""));
                        }
                        sink.emit(Observation::result(
                            action_id,
                            CELL_ERROR_EXIT_CODE,
                            Some(message),
                        ))
                        .await;
                    }
                    return Ok(());
                }
                other => debug!(other, "Unknown kernel event"),
            }
        }
    }
}

/// The sandbox's kernel. A single mutex spans the whole request/reply
/// cycle: an IPython shell has one global namespace, so cells on the same
/// sandbox cannot meaningfully interleave. Different sandboxes run their
/// own executor processes and stay fully concurrent.
pub struct PythonKernel {
    python_bin: String,
    work_dir: PathBuf,
    process: Mutex<Option<KernelProcess>>,
}

impl PythonKernel {
    pub fn new(python_bin: String, work_dir: PathBuf) -> Self {
        Self {
            python_bin,
            work_dir,
            process: Mutex::new(None),
        }
    }

    /// Execute one cell, forwarding its stream events and emitting exactly
    /// one `result`. A dead kernel is respawned on the next cell; the
    /// namespace is lost and the failed cell reports an internal error.
    pub async fn execute(&self, action_id: &str, code: &str, sink: &Arc<dyn ObservationSink>) {
        let mut guard = self.process.lock().await;

        if guard.is_none() {
            match KernelProcess::spawn(&self.python_bin, &self.work_dir) {
                Ok(process) => *guard = Some(process),
                Err(e) => {
                    let msg = format!("failed to start python kernel: {e}");
                    warn!(action_id, "{msg}");
                    sink.emit(Observation::error(action_id, msg.clone())).await;
                    sink.emit(Observation::result(
                        action_id,
                        INTERNAL_ERROR_EXIT_CODE,
                        Some(msg),
                    ))
                    .await;
                    return;
                }
            }
        }

        let Some(process) = guard.as_mut() else {
            return;
        };
        if let Err(e) = process.run_cell(action_id, code, sink).await {
            let msg = format!("kernel failure: {e}");
            warn!(action_id, "{msg}");
            // Unusable now; drop it so the next cell gets a fresh shell.
            if let Some(mut dead) = guard.take() {
                let _ = dead.child.start_kill();
            }
            sink.emit(Observation::error(action_id, msg.clone())).await;
            sink.emit(Observation::result(
                action_id,
                INTERNAL_ERROR_EXIT_CODE,
                Some(msg),
            ))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::test_support::ChannelSink;
    use mentis_protocol::ObservationType;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn kernel() -> PythonKernel {
        PythonKernel::new("python3".to_string(), std::env::temp_dir())
    }

    async fn drain(rx: &mut UnboundedReceiver<Observation>) -> Vec<Observation> {
        let mut all = Vec::new();
        while let Ok(Some(obs)) = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await
        {
            all.push(obs);
        }
        all
    }

    #[tokio::test]
    #[ignore] // Requires python3 with IPython installed
    async fn state_persists_across_cells() {
        let kernel = kernel();
        let (sink, mut rx) = ChannelSink::new();
        let sink: Arc<dyn ObservationSink> = sink;

        kernel.execute("c1", "x = 40", &sink).await;
        kernel.execute("c2", "x += 2", &sink).await;
        kernel.execute("c3", "print(x)", &sink).await;

        let observations = drain(&mut rx).await;
        let printed: Vec<&str> = observations
            .iter()
            .filter(|o| o.action_id == "c3" && o.observation_type == ObservationType::Stream)
            .filter_map(|o| o.line.as_deref())
            .collect();
        assert_eq!(printed, vec!["42"]);

        let results: Vec<&Observation> = observations
            .iter()
            .filter(|o| o.observation_type == ObservationType::Result)
            .collect();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.exit_code == Some(0)));
    }

    #[tokio::test]
    #[ignore] // Requires python3 with IPython installed
    async fn exceptions_surface_ename_and_traceback() {
        let kernel = kernel();
        let (sink, mut rx) = ChannelSink::new();
        let sink: Arc<dyn ObservationSink> = sink;

        kernel.execute("boom", "1/0", &sink).await;

        let observations = drain(&mut rx).await;
        let result = observations
            .iter()
            .find(|o| o.observation_type == ObservationType::Result)
            .expect("result observation");
        assert_eq!(result.exit_code, Some(CELL_ERROR_EXIT_CODE));
        let error = result.error.as_deref().unwrap();
        assert!(error.contains("ZeroDivisionError"), "got: {error}");
    }

    #[tokio::test]
    #[ignore] // Requires python3 with IPython installed
    async fn cells_on_one_kernel_serialize() {
        let kernel = Arc::new(kernel());
        let (sink, mut rx) = ChannelSink::new();
        let sink: Arc<dyn ObservationSink> = sink;

        // Warm the kernel up so both cells contend on the lock only.
        kernel.execute("warm", "pass", &sink).await;

        let slow = {
            let kernel = kernel.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                kernel
                    .execute("slow", "import time; time.sleep(0.4); print('A')", &sink)
                    .await;
            })
        };
        // Give the slow cell a head start into the lock.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let fast = {
            let kernel = kernel.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                kernel.execute("fast", "print('B')", &sink).await;
            })
        };
        let _ = slow.await;
        let _ = fast.await;

        let observations = drain(&mut rx).await;
        let order: Vec<(&str, ObservationType)> = observations
            .iter()
            .filter(|o| o.action_id != "warm")
            .map(|o| (o.action_id.as_str(), o.observation_type))
            .collect();

        // Everything of the slow cell, result included, precedes the fast
        // cell's first event.
        let slow_result = order
            .iter()
            .position(|(id, t)| *id == "slow" && *t == ObservationType::Result)
            .expect("slow result");
        let fast_first = order
            .iter()
            .position(|(id, _)| *id == "fast")
            .expect("fast events");
        assert!(slow_result < fast_first, "order: {order:?}");
    }
}
