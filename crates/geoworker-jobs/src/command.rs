//! Handler that runs an external program for a job type.
//!
//! The child receives the job through environment variables:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `GEOWORKER_JOB_ID` | Job UUID |
//! | `GEOWORKER_JOB_TYPE` | Job type |
//! | `GEOWORKER_ATTEMPT` | One-based attempt number |
//! | `GEOWORKER_PAYLOAD` | Payload as compact JSON |
//!
//! A string array under the payload's `args` key is appended to the
//! configured arguments. With `payload_stdin` the payload JSON is also
//! written to the child's stdin.
//!
//! Stdout is discarded. Only the tail of stderr is kept, for the failure
//! message.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Maximum characters of stderr quoted in a failure message.
const STDERR_TAIL_CHARS: usize = 2000;

/// Bytes of stderr retained while the child runs.
const STDERR_TAIL_BYTES: usize = STDERR_TAIL_CHARS * 4;

/// How to run the program for one job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Also write the payload JSON to stdin.
    #[serde(default)]
    pub payload_stdin: bool,
    /// Exit codes that mean "try again later". When unset, every non-zero
    /// exit is retryable.
    #[serde(default)]
    pub retryable_exit_codes: Option<Vec<i32>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            payload_stdin: false,
            retryable_exit_codes: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_payload_stdin(mut self, enabled: bool) -> Self {
        self.payload_stdin = enabled;
        self
    }

    pub fn with_retryable_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.retryable_exit_codes = Some(codes);
        self
    }

    fn is_retryable_exit(&self, code: Option<i32>) -> bool {
        match (code, &self.retryable_exit_codes) {
            // Killed by a signal.
            (None, _) => true,
            (Some(_), None) => true,
            (Some(code), Some(codes)) => codes.contains(&code),
        }
    }
}

/// Runs a [`CommandSpec`] per job.
///
/// The child is spawned with `kill_on_drop`, so a timed-out job kills its
/// process.
pub struct CommandHandler {
    job_type: String,
    spec: CommandSpec,
}

impl CommandHandler {
    pub fn new(job_type: impl Into<String>, spec: CommandSpec) -> Self {
        Self {
            job_type: job_type.into(),
            spec,
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Configured arguments followed by the payload's `args` array.
    fn arguments(&self, payload: &JsonValue) -> Result<Vec<String>, String> {
        let mut args = self.spec.args.clone();
        match payload.get("args") {
            None | Some(JsonValue::Null) => {}
            Some(JsonValue::Array(extra)) => {
                for value in extra {
                    match value {
                        JsonValue::String(s) => args.push(s.clone()),
                        JsonValue::Number(n) => args.push(n.to_string()),
                        JsonValue::Bool(b) => args.push(b.to_string()),
                        other => {
                            return Err(format!("Unsupported value in payload args: {}", other))
                        }
                    }
                }
            }
            Some(other) => return Err(format!("Payload args must be an array, got {}", other)),
        }
        Ok(args)
    }

    fn build_command(&self, ctx: &JobContext, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(args)
            .envs(&self.spec.env)
            .env("GEOWORKER_JOB_ID", ctx.job_id.to_string())
            .env("GEOWORKER_JOB_TYPE", &ctx.job_type)
            .env("GEOWORKER_ATTEMPT", ctx.attempt.to_string())
            .env("GEOWORKER_PAYLOAD", ctx.payload.to_string())
            .stdin(if self.spec.payload_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let args = match self.arguments(&ctx.payload) {
            Ok(args) => args,
            Err(message) => return JobResult::Failed(message),
        };

        debug!(
            subsystem = "jobs",
            component = "command",
            job_id = %ctx.job_id,
            program = %self.spec.program,
            ?args,
            "Spawning job command"
        );

        let mut child = match self.build_command(&ctx, &args).spawn() {
            Ok(child) => child,
            Err(e) => {
                return JobResult::Failed(format!(
                    "Failed to start '{}': {}",
                    self.spec.program, e
                ))
            }
        };

        // Drain stderr while feeding stdin so neither pipe can stall the child.
        let job_id = ctx.job_id;
        let stdin = child.stdin.take();
        let payload = ctx.payload.to_string();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    // The program may exit without reading its input.
                    warn!(subsystem = "jobs", component = "command", job_id = %job_id, error = %e, "Failed to write payload to stdin");
                }
            }
        };
        let (_, stderr) = tokio::join!(feed, read_tail(child.stderr.take(), STDERR_TAIL_BYTES));

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return JobResult::Retry(format!(
                    "Failed to wait for '{}': {}",
                    self.spec.program, e
                ))
            }
        };

        if status.success() {
            return JobResult::Success;
        }

        let code = status.code();
        let stderr = String::from_utf8_lossy(&stderr);
        let message = format!(
            "Command '{}' failed (exit {}): {}",
            self.spec.program,
            code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
            stderr_tail(stderr.trim())
        );

        if self.spec.is_retryable_exit(code) {
            JobResult::Retry(message)
        } else {
            JobResult::Failed(message)
        }
    }
}

/// Read `reader` to the end, keeping at most the last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut tail = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
            Err(e) => {
                debug!(subsystem = "jobs", component = "command", error = %e, "Stopped reading stderr");
                break;
            }
        }
    }
    tail
}

/// Last `STDERR_TAIL_CHARS` characters of `stderr`.
fn stderr_tail(stderr: &str) -> &str {
    match stderr.char_indices().rev().nth(STDERR_TAIL_CHARS - 1) {
        Some((idx, _)) => &stderr[idx..],
        None => stderr,
    }
}
