use std::{
    io::ErrorKind,
    path::PathBuf,
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use metrics::{counter, histogram};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{ChildStderr, ChildStdout, Command},
};
use tracing::{debug, info, warn};

use crate::application::artifacts::EphemeralArtifact;

use super::types::{RenderError, RenderRequest, classify_diagnostic};

pub const METRIC_RENDER_SUCCESS: &str = "attesta_render_success_total";
pub const METRIC_RENDER_FAILURE: &str = "attesta_render_failure_total";
pub const METRIC_RENDER_DURATION_MS: &str = "attesta_render_duration_ms";

/// Spawns the external rendering worker and classifies its outcome.
///
/// Each call is one OS process: spawned with piped stdio, both output
/// streams drained concurrently with the exit wait, status always collected.
/// The invoker holds no per-request state; concurrency is bounded upstream
/// by the admission gate, never here.
#[derive(Debug)]
pub struct RenderInvoker {
    interpreter: PathBuf,
    script: PathBuf,
    invocations: AtomicU64,
}

impl RenderInvoker {
    pub fn new(interpreter: PathBuf, script: PathBuf) -> Self {
        Self {
            interpreter,
            script,
            invocations: AtomicU64::new(0),
        }
    }

    /// Number of worker processes ever spawned by this invoker.
    ///
    /// A request rejected at admission must leave this untouched.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Run the worker for one request and classify what it did.
    ///
    /// Blocking from the caller's perspective: the future resolves only once
    /// the process has exited and its streams are fully drained.
    pub async fn render(
        &self,
        request: &RenderRequest,
    ) -> Result<EphemeralArtifact, RenderError> {
        let started_at = Instant::now();

        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.script)
            .args(request.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        self.invocations.fetch_add(1, Ordering::Relaxed);
        let mut child = command.spawn().map_err(|err| {
            warn!(
                target = "application::render",
                op = "invoker::render",
                result = "error",
                error_code = "spawn_worker",
                interpreter = %self.interpreter.display(),
                script = %self.script.display(),
                error = %err,
                "failed to spawn render worker"
            );
            RenderError::Spawn(err)
        })?;

        // Drain stdout and stderr while waiting for exit. Reading either
        // stream only after a blocking wait deadlocks the worker as soon as
        // it fills a pipe buffer.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, diagnostic) =
            tokio::try_join!(child.wait(), drain_streams(request.teacher_id, stdout, stderr))?;

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!(METRIC_RENDER_DURATION_MS).record(elapsed_ms as f64);

        if !status.success() {
            let kind = classify_diagnostic(&diagnostic);
            let exit_code = status.code();
            counter!(METRIC_RENDER_FAILURE, "kind" => kind.as_str()).increment(1);
            warn!(
                target = "application::render",
                op = "invoker::render",
                result = "error",
                teacher_id = request.teacher_id,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                kind = kind.as_str(),
                elapsed_ms,
                diagnostic = %diagnostic,
                "render worker failed"
            );
            return Err(RenderError::Worker {
                kind,
                exit_code,
                diagnostic,
            });
        }

        match tokio::fs::metadata(&request.output_path).await {
            Ok(_) => {
                counter!(METRIC_RENDER_SUCCESS).increment(1);
                info!(
                    target = "application::render",
                    op = "invoker::render",
                    result = "ok",
                    teacher_id = request.teacher_id,
                    elapsed_ms,
                    output = %request.output_path.display(),
                    "render worker produced artifact"
                );
                Ok(EphemeralArtifact::claim(request.output_path.clone()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                counter!(METRIC_RENDER_FAILURE, "kind" => "artifact_missing").increment(1);
                warn!(
                    target = "application::render",
                    op = "invoker::render",
                    result = "error",
                    error_code = "artifact_missing",
                    teacher_id = request.teacher_id,
                    elapsed_ms,
                    output = %request.output_path.display(),
                    "render worker exited cleanly but wrote nothing"
                );
                Err(RenderError::ArtifactMissing {
                    path: request.output_path.clone(),
                })
            }
            Err(err) => Err(RenderError::Io(err)),
        }
    }
}

/// Concurrently log the worker's stdout lines and capture stderr for
/// classification.
async fn drain_streams(
    teacher_id: u64,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) -> std::io::Result<String> {
    let log_stdout = async {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                debug!(
                    target = "application::render",
                    teacher_id,
                    line = %line,
                    "worker stdout"
                );
            }
        }
        Ok::<(), std::io::Error>(())
    };

    let capture_stderr = async {
        let mut diagnostic = String::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_string(&mut diagnostic).await?;
        }
        Ok::<String, std::io::Error>(diagnostic)
    };

    let ((), diagnostic) = tokio::try_join!(log_stdout, capture_stderr)?;
    Ok(diagnostic)
}
