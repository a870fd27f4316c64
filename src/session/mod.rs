//! Agent sessions: engine seam, event decoding, transcript persistence and
//! reconciliation of the terminal outcome.

pub mod driver;
pub mod engine;
pub mod events;
pub mod prompt;
pub mod reconciler;
pub mod transcript;

pub use driver::{SessionDriver, SessionReport, SessionState};
pub use engine::{AgentEngine, CliEngine, EventStream, SessionRequest, DEFAULT_ALLOWED_TOOLS};
pub use events::{decode_record, EventKind, SessionEvent, TerminalOutcome};
pub use prompt::{build_task_prompt, APPEND_SYSTEM_PROMPT};
pub use reconciler::{
    map_status, reconcile, replay_transcript, select_canonical, DurationFallback, EventCounts,
    Outcome, Reconciler, Replay, TrialStatus,
};
pub use transcript::{TranscriptWriter, TRANSCRIPT_FILE};
