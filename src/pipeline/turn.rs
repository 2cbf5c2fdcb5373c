//! One conversational exchange: input in, spoken reply out.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

static NEXT_TURN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique turn identifier, increasing in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(u64);

impl TurnId {
    fn next() -> Self {
        Self(NEXT_TURN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Text,
    Audio,
}

/// What the user gave us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    Text(String),
    /// Captured audio in whatever container the transcription service accepts.
    Audio(Vec<u8>),
}

impl TurnInput {
    pub fn kind(&self) -> InputKind {
        match self {
            TurnInput::Text(_) => InputKind::Text,
            TurnInput::Audio(_) => InputKind::Audio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Pending,
    Transcribing,
    Completing,
    Synthesizing,
    Streaming,
    Done,
    Cancelled,
    Failed,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnStatus::Done | TurnStatus::Cancelled | TurnStatus::Failed
        )
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnStatus::Pending => "pending",
            TurnStatus::Transcribing => "transcribing",
            TurnStatus::Completing => "completing",
            TurnStatus::Synthesizing => "synthesizing",
            TurnStatus::Streaming => "streaming",
            TurnStatus::Done => "done",
            TurnStatus::Cancelled => "cancelled",
            TurnStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub id: TurnId,
    pub input: TurnInput,
    /// Set by transcription, audio turns only.
    pub transcript: Option<String>,
    pub reply_text: Option<String>,
    /// 16-bit PCM at 16 kHz.
    pub reply_audio: Option<Vec<u8>>,
    pub status: TurnStatus,
    /// Frames handed to the renderer.
    pub frames_sent: usize,
    /// Error text for a failed turn.
    pub failure: Option<String>,
    pub(crate) cancel: CancellationToken,
}

impl Turn {
    pub fn new(input: TurnInput) -> Self {
        Self {
            id: TurnId::next(),
            input,
            transcript: None,
            reply_text: None,
            reply_audio: None,
            status: TurnStatus::Pending,
            frames_sent: 0,
            failure: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(TurnInput::Text(text.into()))
    }

    pub fn audio(buffer: Vec<u8>) -> Self {
        Self::new(TurnInput::Audio(buffer))
    }

    pub fn kind(&self) -> InputKind {
        self.input.kind()
    }

    /// Text sent to the completion stage: the transcript for audio turns.
    pub fn prompt(&self) -> Option<&str> {
        match &self.input {
            TurnInput::Text(text) => Some(text),
            TurnInput::Audio(_) => self.transcript.as_deref(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
