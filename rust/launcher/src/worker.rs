//! Trainer backed by an external worker process.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use stylegan2_config::{LoadFrom, TrainerArgs};
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    task::JoinHandle,
};

use crate::{
    checkpoint::{CheckpointError, CheckpointHook},
    distributed::{ProcessGroup, TrainerFactory},
    protocol::{ErrorKind, Request, Response},
    trainer::{TrainError, Trainer},
};

pub const DEFAULT_PROGRAM: &str = "python3";
pub const DEFAULT_ARGS: [&str; 2] = ["-m", "stylegan2_pytorch.worker"];

/// Lines of worker stderr kept for error reports.
const STDERR_TAIL: usize = 20;

/// How long a worker gets to exit after shutdown or a closed pipe.
const EXIT_GRACE: Duration = Duration::from_secs(30);

/// Program and arguments that start a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: DEFAULT_ARGS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl WorkerCommand {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// A trainer living in a child process, one request at a time.
pub struct WorkerTrainer {
    rank: usize,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<Vec<String>>>,
    steps: u64,
    checkpoint_num: u64,
    hook: Option<CheckpointHook>,
}

impl WorkerTrainer {
    /// Start a worker for `group`, appending its stderr to
    /// `<log_dir>/worker-<rank>.log`.
    pub async fn spawn(
        command: &WorkerCommand,
        group: &ProcessGroup,
        log_dir: &Path,
    ) -> Result<Self, TrainError> {
        let rank = group.rank;
        tracing::debug!(
            "Spawning worker {rank}: {} {}",
            command.program,
            command.args.join(" ")
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(group.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TrainError::Spawn(command.program.clone(), e))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainError::Protocol("worker stdout not captured".into()))?;

        let log_path = log_dir.join(format!("worker-{rank}.log"));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(stream_stderr(stderr, log_path, rank)));

        Ok(Self {
            rank,
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr_task,
            steps: 0,
            checkpoint_num: 0,
            hook: None,
        })
    }

    /// Send one request and wait for its terminal reply.
    ///
    /// `saved` notices are handed to the checkpoint hook as they arrive. A
    /// failing hook doesn't interrupt the exchange; its error is returned
    /// once the worker has replied.
    async fn call(&mut self, request: Request<'_>) -> Result<Option<String>, TrainError> {
        let op = request.op();
        let mut line =
            serde_json::to_string(&request).map_err(|e| TrainError::Protocol(e.to_string()))?;
        line.push('\n');

        let written = match self.stdin.as_mut() {
            Some(stdin) => write_line(stdin, &line).await,
            None => Err(std::io::ErrorKind::BrokenPipe.into()),
        };
        if let Err(e) = written {
            tracing::debug!("worker {} stdin closed during {op}: {e}", self.rank);
            return Err(self.closed().await);
        }

        let mut hook_error = None;
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(self.closed().await);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response: Response = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(_) => {
                    tracing::debug!("worker {}: {line}", self.rank);
                    continue;
                }
            };

            match response {
                Response::Saved { path } => {
                    let Some(hook) = &self.hook else { continue };
                    if hook_error.is_some() {
                        continue;
                    }
                    match hook.on_model_save(&path).await {
                        Ok(report) => tracing::debug!(
                            "{}: deleted {}, uploaded {:?}",
                            path.display(),
                            report.deleted.len(),
                            report.uploaded
                        ),
                        Err(e) => hook_error = Some(e),
                    }
                }
                Response::Ok {
                    steps,
                    checkpoint_num,
                    message,
                } => {
                    self.steps = steps;
                    self.checkpoint_num = checkpoint_num;
                    return match hook_error {
                        Some(e) => Err(TrainError::Hook(e)),
                        None => Ok(message),
                    };
                }
                Response::Error { kind, message } => {
                    return Err(reply_error(op, hook_error, kind, message));
                }
            }
        }
    }

    /// Reap a worker that stopped talking and describe how it went.
    async fn closed(&mut self) -> TrainError {
        self.stdin = None;
        let code = match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => {
                let _ = self.child.kill().await;
                None
            }
        };
        TrainError::Closed {
            code,
            stderr_tail: self.stderr_tail().await.join("\n"),
        }
    }

    async fn stderr_tail(&mut self) -> Vec<String> {
        match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

/// Error for a terminal `error` reply.
///
/// A hook failure seen earlier in the same exchange takes precedence, so a
/// retryable NaN can't hide it.
fn reply_error(
    op: &'static str,
    hook_error: Option<CheckpointError>,
    kind: ErrorKind,
    message: String,
) -> TrainError {
    if let Some(e) = hook_error {
        tracing::warn!("worker also failed during {op}: {message}");
        return TrainError::Hook(e);
    }
    match kind {
        ErrorKind::Nan => TrainError::Nan(message),
        ErrorKind::Other => TrainError::Worker { op, message },
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Append worker stderr to `path` and keep the last lines for error reports.
async fn stream_stderr(stderr: ChildStderr, path: PathBuf, rank: usize) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .ok();

    // Separate sessions when the log already has content
    if let Some(ref mut f) = file
        && f.metadata().await.is_ok_and(|m| m.len() > 0)
    {
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = f
            .write_all(format!("\n--- session at {ts} ---\n\n").as_bytes())
            .await;
    }

    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!("worker {rank} stderr: {line}");
        if let Some(ref mut f) = file {
            let _ = f.write_all(line.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
        }
        if tail.len() >= STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    if let Some(ref mut f) = file {
        let _ = f.flush().await;
    }
    tail.into_iter().collect()
}

#[async_trait]
impl Trainer for WorkerTrainer {
    async fn init(&mut self, args: TrainerArgs) -> Result<(), TrainError> {
        self.call(Request::Init { args: &args }).await.map(drop)
    }

    async fn init_process_group(&mut self, group: &ProcessGroup) -> Result<(), TrainError> {
        self.call(Request::InitProcessGroup {
            backend: &group.backend,
            rank: group.rank,
            world_size: group.world_size,
            seed: group.seed,
        })
        .await
        .map(drop)
    }

    async fn destroy_process_group(&mut self) -> Result<(), TrainError> {
        self.call(Request::DestroyProcessGroup).await.map(drop)
    }

    async fn load(&mut self, from: LoadFrom) -> Result<(), TrainError> {
        self.call(Request::Load { from }).await.map(drop)
    }

    async fn clear(&mut self) -> Result<(), TrainError> {
        self.call(Request::Clear).await.map(drop)
    }

    async fn set_data_src(&mut self, path: &str) -> Result<(), TrainError> {
        self.call(Request::SetDataSrc { path }).await.map(drop)
    }

    async fn train(&mut self) -> Result<(), TrainError> {
        self.call(Request::Train).await.map(drop)
    }

    async fn save(&mut self, num: u64) -> Result<(), TrainError> {
        self.call(Request::Save { num }).await.map(drop)
    }

    async fn evaluate(&mut self, name: &str, num_image_tiles: usize) -> Result<(), TrainError> {
        self.call(Request::Evaluate {
            name,
            num_image_tiles,
        })
        .await
        .map(drop)
    }

    async fn generate_interpolation(
        &mut self,
        name: &str,
        num_image_tiles: usize,
        num_steps: usize,
        save_frames: bool,
    ) -> Result<(), TrainError> {
        self.call(Request::GenerateInterpolation {
            name,
            num_image_tiles,
            num_steps,
            save_frames,
        })
        .await
        .map(drop)
    }

    async fn print_log(&mut self) -> Result<Option<String>, TrainError> {
        self.call(Request::PrintLog).await
    }

    fn steps(&self) -> u64 {
        self.steps
    }

    fn checkpoint_num(&self) -> u64 {
        self.checkpoint_num
    }

    fn set_save_hook(&mut self, hook: CheckpointHook) {
        self.hook = Some(hook);
    }

    async fn shutdown(&mut self) -> Result<(), TrainError> {
        match self.call(Request::Shutdown).await {
            // Exiting before the reply is as good as acknowledging it
            Ok(_) | Err(TrainError::Closed { code: Some(0), .. }) => {}
            Err(e) => return Err(e),
        }
        self.stdin = None;

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                tracing::warn!("worker {} exited with {status}", self.rank);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::warn!("worker {} did not exit, killing it", self.rank);
                self.child.kill().await?;
            }
        }
        self.stderr_tail().await;
        Ok(())
    }
}

/// Spawns one worker process per rank.
pub struct WorkerFactory {
    command: WorkerCommand,
    log_dir: PathBuf,
}

impl WorkerFactory {
    #[must_use]
    pub fn new(command: WorkerCommand, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            log_dir: log_dir.into(),
        }
    }
}

#[async_trait]
impl TrainerFactory for WorkerFactory {
    type Trainer = WorkerTrainer;

    async fn create(&self, group: &ProcessGroup) -> Result<WorkerTrainer, TrainError> {
        tokio::fs::create_dir_all(&self.log_dir).await?;
        WorkerTrainer::spawn(&self.command, group, &self.log_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cmd = WorkerCommand::default();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["-m", "stylegan2_pytorch.worker"]);
    }

    #[test]
    fn test_reply_error_kinds() {
        let nan = reply_error("train", None, ErrorKind::Nan, "loss is NaN".into());
        assert!(matches!(nan, TrainError::Nan(_)));
        assert!(nan.is_retryable());

        let other = reply_error("load", None, ErrorKind::Other, "missing".into());
        assert!(matches!(other, TrainError::Worker { op: "load", .. }));
    }

    #[test]
    fn test_hook_failure_outranks_nan_reply() {
        let err = reply_error(
            "train",
            Some(CheckpointError::NoBlobStore),
            ErrorKind::Nan,
            "loss is NaN".into(),
        );
        assert!(matches!(err, TrainError::Hook(CheckpointError::NoBlobStore)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = WorkerCommand::new("definitely-not-a-real-worker-binary", Vec::new());
        let err = WorkerTrainer::spawn(&cmd, &ProcessGroup::single(0), dir.path())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TrainError::Spawn(..)));
    }
}
