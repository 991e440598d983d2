use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::tools::{
    object_schema, PathSandbox, PermissionRequest, SafetyLevel, Tool, ToolCategory, ToolContext,
    ToolError, ToolSpec,
};

const MAX_TIMEOUT_SECONDS: u64 = 600;

#[derive(Debug, Deserialize)]
pub struct BashParams {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Runs a shell command in its own process group.
///
/// The whole group is terminated on timeout or cancellation so background
/// children of the command do not outlive the call.
pub struct BashTool {
    sandbox: Arc<PathSandbox>,
    default_timeout_seconds: u64,
}

impl BashTool {
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>, default_timeout_seconds: u64) -> Self {
        Self {
            sandbox,
            default_timeout_seconds: default_timeout_seconds.max(1),
        }
    }
}

enum Outcome {
    Finished(String, ExitStatus),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl Tool for BashTool {
    type Params = BashParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "bash",
            "Run a shell command with timeout and output caps.",
            object_schema(
                json!({
                    "command": {"type": "string", "description": "Shell command."},
                    "cwd": {"type": "string", "description": "Working directory (default workspace root)."},
                    "timeout_seconds": {"type": "integer", "description": "Timeout override in seconds."},
                }),
                &["command"],
            ),
        )
        .with_safety_level(SafetyLevel::Confirm)
        .with_category(ToolCategory::Shell)
    }

    async fn execute(&self, params: BashParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let command = params.command.trim();
        if command.is_empty() {
            return Err(ToolError::invalid_arguments("bash", "bash command must not be empty."));
        }

        let cwd_text = params
            .cwd
            .as_deref()
            .map(str::trim)
            .filter(|cwd| !cwd.is_empty())
            .unwrap_or(".");
        let cwd = self.sandbox.resolve_existing(cwd_text)?;
        if !cwd.is_dir() {
            return Err(ToolError::failed("bash", "bash cwd must be a directory."));
        }

        self.sandbox.authorize_external(ctx, &cwd, true).await?;
        ctx.ask(
            PermissionRequest::new("bash", vec![command.to_string()])
                .with_metadata("cwd", cwd.display().to_string()),
        )
        .await?;

        let timeout_seconds = params
            .timeout_seconds
            .unwrap_or(self.default_timeout_seconds)
            .clamp(1, MAX_TIMEOUT_SECONDS);

        let mut builder = Command::new("bash");
        builder
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        builder.process_group(0);

        let mut child = builder.spawn().map_err(|error| {
            ToolError::failed("bash", format!("Failed to launch bash command: {error}"))
        })?;
        debug!(event = "tool.bash.spawned", pid = ?child.id(), cwd = %cwd.display());
        let mut group = ProcessGroupGuard::new(child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let outcome = {
            let run = async {
                let (stdout, stderr, status) =
                    tokio::join!(drain_lines(stdout, ctx), drain_lines(stderr, ctx), child.wait());
                status.map(|status| (stdout + &stderr, status))
            };

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Outcome::Cancelled,
                finished = tokio::time::timeout(Duration::from_secs(timeout_seconds), run) => {
                    match finished {
                        Ok(Ok((output, status))) => Outcome::Finished(output, status),
                        Ok(Err(error)) => {
                            return Err(ToolError::failed(
                                "bash",
                                format!("Failed waiting for bash command: {error}"),
                            ))
                        }
                        Err(_) => Outcome::TimedOut,
                    }
                }
            }
        };

        match outcome {
            Outcome::Finished(output, status) => {
                group.disarm();
                let header = format!("{} cwd={}", format_exit_status(status), cwd.display());
                if output.trim().is_empty() {
                    Ok(header)
                } else {
                    Ok(format!("{header}\n{output}"))
                }
            }
            Outcome::TimedOut => {
                terminate(&mut child).await;
                Err(ToolError::Timeout {
                    tool: "bash".to_string(),
                    seconds: timeout_seconds,
                })
            }
            Outcome::Cancelled => {
                terminate(&mut child).await;
                Err(ToolError::Cancelled)
            }
        }
    }
}

/// Collects a pipe line by line, stopping early once the call is cancelled.
async fn drain_lines(pipe: Option<impl AsyncRead + Unpin>, ctx: &ToolContext) -> String {
    let Some(pipe) = pipe else {
        return String::new();
    };

    let mut reader = BufReader::new(pipe);
    let mut output = String::new();
    let mut line = Vec::new();
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => output.push_str(&String::from_utf8_lossy(&line)),
        }
    }
    output
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        signal_group(pid, libc::SIGTERM);
    }

    if let Err(error) = child.kill().await {
        warn!(event = "tool.bash.kill_failed", %error);
    }
}

/// Kills the command's whole process group when dropped while still armed.
///
/// `kill_on_drop` only reaches the `bash` leader; this also takes down background
/// children when the call future is dropped or aborted mid-run.
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            signal_group(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: i32, signal: libc::c_int) {
    // SAFETY: killpg only sends a signal; the group id comes from our own child,
    // which was started as a process group leader.
    let result = unsafe { libc::killpg(pgid, signal) };
    if result != 0 {
        debug!(event = "tool.bash.killpg_failed", pgid, signal);
    }
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}
