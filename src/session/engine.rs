//! Agent engine seam.
//!
//! An [`AgentEngine`] opens a session for a [`SessionRequest`] and returns
//! the engine's raw records as a stream of newline-delimited JSON strings.
//! Turn and budget ceilings are passed through to the engine, which enforces
//! them itself and reports the result in its terminal record.

use std::path::PathBuf;
use std::process::Stdio;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::workspace::truncate_chars;

/// Tools the agent may use unless the run configures otherwise.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &["Read", "Edit", "Write", "Bash", "Glob", "Grep"];

/// Ordered raw records emitted by an engine for one session.
pub type EventStream = BoxStream<'static, Result<String, EngineError>>;

/// Everything an engine needs to start one session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    pub max_budget_usd: f64,
    pub model: String,
    pub append_system_prompt: Option<String>,
}

/// An external coding agent that can be driven for one session.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Opens a session and returns its record stream.
    async fn open(&self, request: &SessionRequest) -> Result<EventStream, EngineError>;
}

/// Drives an agent CLI that prints stream-json records on stdout.
#[derive(Debug, Clone)]
pub struct CliEngine {
    binary: String,
    permission_mode: String,
    extra_args: Vec<String>,
}

impl CliEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            permission_mode: "bypassPermissions".to_string(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_permission_mode(mut self, mode: impl Into<String>) -> Self {
        self.permission_mode = mode.into();
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Command-line arguments for one session.
    pub fn build_args(&self, request: &SessionRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--max-turns".to_string(),
            request.max_turns.to_string(),
            "--max-budget-usd".to_string(),
            request.max_budget_usd.to_string(),
            "--permission-mode".to_string(),
            self.permission_mode.clone(),
        ];
        if !request.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(request.allowed_tools.join(","));
        }
        if let Some(extra) = &request.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(extra.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl Default for CliEngine {
    fn default() -> Self {
        Self::new("claude")
    }
}

#[async_trait]
impl AgentEngine for CliEngine {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn open(&self, request: &SessionRequest) -> Result<EventStream, EngineError> {
        info!(
            engine = %self.binary,
            model = %request.model,
            max_turns = request.max_turns,
            cwd = %request.working_dir.display(),
            "Opening agent session"
        );

        let mut child = Command::new(&self.binary)
            .args(self.build_args(request))
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", self.binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("stdout not captured".to_string()))?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_string(&mut buf).await {
                    debug!(error = %e, "Failed to read engine stderr");
                }
            }
            buf
        });

        Ok(record_stream(child, stdout, stderr_task).boxed())
    }
}

/// Yields non-blank stdout lines, then surfaces a non-zero exit as a fault.
fn record_stream(
    mut child: Child,
    stdout: ChildStdout,
    stderr_task: JoinHandle<String>,
) -> impl Stream<Item = Result<String, EngineError>> {
    try_stream! {
        let mut lines = LinesStream::new(BufReader::new(stdout).lines());
        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| EngineError::Stream(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            yield line;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::Stream(e.to_string()))?;
        if !status.success() {
            let stderr = stderr_task.await.unwrap_or_default();
            Err::<(), _>(EngineError::Exited {
                code: status.code().unwrap_or(-1),
                stderr: truncate_chars(stderr.trim(), 2000),
            })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SessionRequest {
        SessionRequest {
            prompt: "solve it".to_string(),
            working_dir: PathBuf::from("/tmp"),
            allowed_tools: vec!["Read".to_string(), "Bash".to_string()],
            max_turns: 30,
            max_budget_usd: 2.5,
            model: "sonnet".to_string(),
            append_system_prompt: Some("Be efficient.".to_string()),
        }
    }

    #[test]
    fn test_build_args() {
        let args = CliEngine::default().build_args(&request());
        let joined = args.join(" ");
        assert!(joined.starts_with("-p solve it --output-format stream-json --verbose"));
        assert!(joined.contains("--max-turns 30"));
        assert!(joined.contains("--max-budget-usd 2.5"));
        assert!(joined.contains("--allowedTools Read,Bash"));
        assert!(joined.contains("--permission-mode bypassPermissions"));
        assert!(joined.ends_with("--append-system-prompt Be efficient."));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_open() {
        let engine = CliEngine::new("/definitely/not/an/agent");
        let err = engine.open(&request()).await.err().unwrap();
        assert!(matches!(err, EngineError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_stream_yields_lines_then_exit_fault() {
        let script = r#"echo '{"type":"system"}'; echo; echo '{"type":"result"}'; echo bad >&2; exit 4"#;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let mut stderr = child.stderr.take().unwrap();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            stderr.read_to_string(&mut buf).await.unwrap();
            buf
        });

        let items: Vec<_> = record_stream(child, stdout, stderr_task).collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), r#"{"type":"system"}"#);
        assert_eq!(items[1].as_ref().unwrap(), r#"{"type":"result"}"#);
        match &items[2] {
            Err(EngineError::Exited { code, stderr }) => {
                assert_eq!(*code, 4);
                assert_eq!(stderr, "bad");
            }
            other => panic!("unexpected item {other:?}"),
        }
    }
}
