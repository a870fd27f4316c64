//! Agent session driver.
//!
//! Runs one session from start to finish: opens the engine stream, appends
//! every raw record to the transcript, forwards decoded events to the
//! [`Reconciler`] and classifies how the session ended.
//!
//! A fault raised by the stream before any terminal event fails the session.
//! A fault raised after a terminal event was captured is logged and the
//! captured outcome is kept.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::engine::{AgentEngine, SessionRequest};
use super::events::decode_record;
use super::reconciler::{DurationFallback, EventCounts, Outcome, Reconciler};
use super::transcript::TranscriptWriter;
use crate::error::EngineError;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The stream ended normally, or faulted after a terminal event.
    Completed,
    /// The session could not be opened, or the stream faulted before any
    /// terminal event.
    Failed,
}

/// Result of driving one session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub state: SessionState,
    pub outcome: Outcome,
    /// Why the session produced no usable terminal event, if it did not.
    pub fault: Option<String>,
    /// A fault that arrived after a terminal event and was ignored.
    pub late_fault: Option<String>,
    pub counts: EventCounts,
}

impl SessionReport {
    fn failed(fault: impl Into<String>, started: Instant, counts: EventCounts) -> Self {
        Self {
            state: SessionState::Failed,
            outcome: Outcome::error(started.elapsed().as_millis() as u64),
            fault: Some(fault.into()),
            late_fault: None,
            counts,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }
}

/// Drives sessions against one engine.
#[derive(Clone)]
pub struct SessionDriver {
    engine: Arc<dyn AgentEngine>,
}

impl SessionDriver {
    pub fn new(engine: Arc<dyn AgentEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Runs one session, persisting its records to `transcript_path`.
    pub async fn run(&self, request: &SessionRequest, transcript_path: &Path) -> SessionReport {
        let started = Instant::now();

        let mut transcript = match TranscriptWriter::create(transcript_path).await {
            Ok(writer) => writer,
            Err(e) => {
                return SessionReport::failed(
                    EngineError::Transcript(e).to_string(),
                    started,
                    EventCounts::default(),
                )
            }
        };

        debug!(engine = self.engine.name(), "Session starting");
        let mut stream = match self.engine.open(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(engine = self.engine.name(), error = %e, "Failed to open session");
                return SessionReport::failed(e.to_string(), started, EventCounts::default());
            }
        };

        let mut reconciler = Reconciler::new();
        let mut fault: Option<EngineError> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(raw) => {
                    if let Err(e) = transcript.append(&raw).await {
                        fault = Some(EngineError::Transcript(e));
                        break;
                    }
                    match decode_record(&raw) {
                        Ok(events) => events.iter().for_each(|e| reconciler.observe(e)),
                        Err(e) => debug!(error = %e, "Undecodable record kept in transcript only"),
                    }
                }
                Err(e) => {
                    fault = Some(e);
                    break;
                }
            }
        }
        drop(stream);

        if let Err(e) = transcript.finish().await {
            warn!(path = %transcript_path.display(), error = %e, "Failed to flush transcript");
        }

        let elapsed = started.elapsed();
        let counts = reconciler.counts();
        let captured = reconciler.finish(&DurationFallback::Measured(elapsed));

        let report = match (captured, fault) {
            (Some(outcome), None) => SessionReport {
                state: SessionState::Completed,
                outcome,
                fault: None,
                late_fault: None,
                counts,
            },
            (Some(outcome), Some(late)) => {
                warn!(error = %late, "Fault after terminal outcome; keeping captured outcome");
                SessionReport {
                    state: SessionState::Completed,
                    outcome,
                    fault: None,
                    late_fault: Some(late.to_string()),
                    counts,
                }
            }
            (None, Some(e)) => SessionReport::failed(e.to_string(), started, counts),
            (None, None) => SessionReport {
                state: SessionState::Completed,
                outcome: Outcome::error(elapsed.as_millis() as u64),
                fault: Some("no terminal outcome received".to_string()),
                late_fault: None,
                counts,
            },
        };

        info!(
            state = ?report.state,
            status = %report.outcome.status,
            turns = report.outcome.turns,
            cost_usd = report.outcome.cost_usd,
            assistant_messages = counts.assistant_messages,
            tool_invocations = counts.tool_invocations,
            terminal_events = counts.terminal_events,
            "Session finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::engine::EventStream;
    use crate::session::reconciler::TrialStatus;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Engine that replays a fixed list of stream items.
    struct ScriptedEngine {
        items: Vec<Result<String, String>>,
        open_error: bool,
    }

    impl ScriptedEngine {
        fn new(items: Vec<Result<String, String>>) -> Self {
            Self {
                items,
                open_error: false,
            }
        }
    }

    #[async_trait]
    impl AgentEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn open(&self, _request: &SessionRequest) -> Result<EventStream, EngineError> {
            if self.open_error {
                return Err(EngineError::Spawn("no such agent".into()));
            }
            let items: Vec<Result<String, EngineError>> = self
                .items
                .iter()
                .cloned()
                .map(|item| item.map_err(EngineError::Stream))
                .collect();
            Ok(futures::stream::iter(items).boxed())
        }
    }

    fn request() -> SessionRequest {
        SessionRequest {
            prompt: "p".into(),
            working_dir: PathBuf::from("."),
            allowed_tools: vec![],
            max_turns: 10,
            max_budget_usd: 1.0,
            model: "m".into(),
            append_system_prompt: None,
        }
    }

    fn result(turns: u64, subtype: &str) -> String {
        format!(
            r#"{{"type":"result","subtype":"{subtype}","num_turns":{turns},"total_cost_usd":0.5,"duration_ms":4000,"modelUsage":{{"m":{{"inputTokens":10,"outputTokens":2}}}}}}"#
        )
    }

    async fn drive(engine: ScriptedEngine) -> (SessionReport, String) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transcript.jsonl");
        let driver = SessionDriver::new(Arc::new(engine));
        let report = driver.run(&request(), &path).await;
        let transcript = std::fs::read_to_string(&path).unwrap_or_default();
        (report, transcript)
    }

    #[tokio::test]
    async fn test_normal_session_completes() {
        let (report, transcript) = drive(ScriptedEngine::new(vec![
            Ok(r#"{"type":"system","subtype":"init"}"#.into()),
            Ok(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"done"}]}}"#.into()),
            Ok(result(3, "success")),
        ]))
        .await;
        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.outcome.status, TrialStatus::Success);
        assert_eq!(report.outcome.turns, 3);
        assert_eq!(report.outcome.input_tokens, 10);
        assert_eq!(report.counts.assistant_messages, 1);
        assert_eq!(transcript.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_fault_before_terminal_fails() {
        let (report, transcript) = drive(ScriptedEngine::new(vec![
            Ok(r#"{"type":"system","subtype":"init"}"#.into()),
            Err("connection reset".into()),
        ]))
        .await;
        assert_eq!(report.state, SessionState::Failed);
        assert_eq!(report.outcome.status, TrialStatus::Error);
        assert_eq!(report.outcome.turns, 0);
        assert_eq!(report.outcome.cost_usd, 0.0);
        assert!(report.fault.unwrap().contains("connection reset"));
        assert_eq!(transcript.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_fault_after_terminal_keeps_outcome() {
        let (report, _) = drive(ScriptedEngine::new(vec![
            Ok(result(5, "error_max_turns")),
            Err("exit code 1".into()),
        ]))
        .await;
        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.outcome.status, TrialStatus::MaxTurns);
        assert_eq!(report.outcome.turns, 5);
        assert!(report.late_fault.is_some());
        assert!(report.fault.is_none());
    }

    #[tokio::test]
    async fn test_spurious_zero_turn_duplicate_ignored() {
        let (report, transcript) = drive(ScriptedEngine::new(vec![
            Ok(result(5, "success")),
            Ok(result(0, "error_during_execution")),
        ]))
        .await;
        assert_eq!(report.outcome.turns, 5);
        assert_eq!(report.outcome.status, TrialStatus::Success);
        assert_eq!(report.counts.terminal_events, 2);
        assert_eq!(transcript.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_stream_without_terminal_is_error() {
        let (report, _) = drive(ScriptedEngine::new(vec![Ok(
            r#"{"type":"system","subtype":"init"}"#.into(),
        )]))
        .await;
        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.outcome.status, TrialStatus::Error);
        assert_eq!(report.fault.as_deref(), Some("no terminal outcome received"));
    }

    #[tokio::test]
    async fn test_open_failure_fails() {
        let mut engine = ScriptedEngine::new(vec![]);
        engine.open_error = true;
        let (report, _) = drive(engine).await;
        assert_eq!(report.state, SessionState::Failed);
        assert!(!report.is_completed());
    }
}
