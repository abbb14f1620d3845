use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::classification::models::{ClassificationFailure, ClassificationRequest};
use crate::predictor::config::PredictorConfig;

/// Raw stdout of a predictor run, or the reason no usable output exists.
pub type RawProcessResult = Result<String, ClassificationFailure>;

/// Anything that can turn a [`ClassificationRequest`] into predictor output
/// within a deadline. The orchestrator only sees this seam, so an in-process
/// or networked model server can stand in for the subprocess client.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn invoke(&self, request: &ClassificationRequest, deadline: Duration) -> RawProcessResult;
}

#[derive(Debug, Default, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// A running worker process.
#[async_trait]
pub trait WorkerProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Writes the whole request and closes stdin while draining stdout and
    /// stderr, then waits for exit.
    async fn communicate(&mut self, input: &[u8]) -> io::Result<ProcessOutput>;

    /// Force-terminates the process and reaps it.
    async fn kill(&mut self) -> io::Result<()>;
}

pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn WorkerProcess>>;
}

/// Spawns real OS processes with piped stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<Box<dyn WorkerProcess>> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn communicate(&mut self, input: &[u8]) -> io::Result<ProcessOutput> {
        let stdin = self.child.stdin.take();
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();
        let pid = self.child.id();

        let write_stdin = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            let written = async {
                stdin.write_all(input).await?;
                stdin.flush().await
            };
            match written.await {
                Ok(()) => Ok(()),
                // Output of a predictor that exits without reading stdin is still read.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("Predictor process {:?} closed stdin early", pid);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        let read_stdout = async move {
            let mut buf = Vec::new();
            if let Some(mut out) = stdout {
                out.read_to_end(&mut buf).await?;
            }
            Ok::<_, io::Error>(buf)
        };
        let read_stderr = async move {
            let mut buf = Vec::new();
            if let Some(mut err) = stderr {
                err.read_to_end(&mut buf).await?;
            }
            Ok::<_, io::Error>(buf)
        };

        let ((), stdout, stderr, status) =
            tokio::try_join!(write_stdin, read_stdout, read_stderr, self.child.wait())?;

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
        })
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

#[derive(Serialize)]
struct PredictorInput<'a> {
    image: String,
    model_path: &'a str,
}

/// Runs one predictor process per request over the stdin/stdout JSON
/// protocol.
#[derive(Clone)]
pub struct InferenceProcessClient {
    config: PredictorConfig,
    spawner: Arc<dyn ProcessSpawner>,
}

impl InferenceProcessClient {
    pub fn new(config: PredictorConfig) -> Self {
        Self::with_spawner(config, Arc::new(TokioSpawner))
    }

    pub fn with_spawner(config: PredictorConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self { config, spawner }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn encode_request(&self, request: &ClassificationRequest) -> Result<Vec<u8>, ClassificationFailure> {
        let input = PredictorInput {
            image: STANDARD.encode(request.image_payload()),
            model_path: &self.config.model_path,
        };
        serde_json::to_vec(&input).map_err(|e| ClassificationFailure::ProcessLaunch(e.to_string()))
    }

    async fn terminate(&self, process: &mut dyn WorkerProcess) {
        let pid = process.id();
        if let Err(e) = process.kill().await {
            // An already-exited process cannot be killed again.
            debug!("Kill of predictor process {:?} returned: {}", pid, e);
        }
    }
}

#[async_trait]
impl InferenceBackend for InferenceProcessClient {
    async fn invoke(&self, request: &ClassificationRequest, deadline: Duration) -> RawProcessResult {
        let input = self.encode_request(request)?;
        let args = vec![self.config.predictor_script_path.display().to_string()];

        let mut process = self
            .spawner
            .spawn(&self.config.inference_executable, &args)
            .map_err(|e| {
                error!(
                    "Failed to launch predictor {} {:?}: {}",
                    self.config.inference_executable, args, e
                );
                ClassificationFailure::ProcessLaunch(e.to_string())
            })?;
        let pid = process.id();
        info!(
            "Started predictor process {:?} for image '{}' ({} bytes)",
            pid,
            request.image_name(),
            request.image_payload().len()
        );

        let started = Instant::now();
        let exchange = process.communicate(&input);
        let outcome = tokio::time::timeout(deadline, exchange).await;
        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("I/O error talking to predictor process {:?}: {}", pid, e);
                self.terminate(process.as_mut()).await;
                return Err(ClassificationFailure::ProcessLaunch(e.to_string()));
            }
            Err(_) => {
                warn!(
                    "Predictor process {:?} exceeded {} ms, killing it",
                    pid,
                    deadline.as_millis()
                );
                self.terminate(process.as_mut()).await;
                return Err(ClassificationFailure::Timeout(deadline));
            }
        };

        debug!(
            "Predictor process {:?} exited with {:?} after {} ms",
            pid,
            output.exit_code,
            started.elapsed().as_millis()
        );
        if !output.stderr.trim().is_empty() {
            warn!("Predictor process {:?} stderr: {}", pid, output.stderr.trim());
        }
        if output.exit_code != Some(0) {
            warn!("Predictor process {:?} exited with status {:?}", pid, output.exit_code);
        }

        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Err(ClassificationFailure::EmptyOutput);
        }
        Ok(stdout.to_string())
    }
}
