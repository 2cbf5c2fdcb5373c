//! Turn sequencing: transcription, completion, synthesis, frame delivery.
//!
//! At most one turn is in flight. Starting a turn cancels the previous one
//! before the new turn does any work; the superseded turn observes its token,
//! stops without touching later fields and ends as `Cancelled`.

use crate::audio::frame;
use crate::config::PipelineSection;
use crate::defaults;
use crate::error::{AvatalkError, Result, ServiceFailure, Stage};
use crate::pipeline::status::StatusBoard;
use crate::pipeline::turn::{InputKind, Turn, TurnId, TurnInput, TurnStatus};
use crate::renderer::RendererFacade;
use crate::services::{CompletionClient, SynthesisClient, TranscriptionClient};
use crate::session::Session;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Configuration for the turn pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum bytes per renderer frame
    pub frame_size: usize,
    /// Budget for each network stage
    pub stage_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_size: defaults::FRAME_SIZE,
            stage_timeout: Duration::from_millis(defaults::STAGE_TIMEOUT_MS),
        }
    }
}

impl From<&PipelineSection> for PipelineConfig {
    fn from(section: &PipelineSection) -> Self {
        Self {
            frame_size: section.frame_size,
            stage_timeout: section.stage_timeout(),
        }
    }
}

/// The hosted collaborators a turn calls, in stage order.
#[derive(Clone)]
pub struct Services {
    pub transcription: Arc<dyn TranscriptionClient>,
    pub completion: Arc<dyn CompletionClient>,
    pub synthesis: Arc<dyn SynthesisClient>,
}

struct ActiveTurn {
    id: TurnId,
    cancel: CancellationToken,
}

pub struct TurnPipeline {
    services: Services,
    renderer: Arc<dyn RendererFacade>,
    session: Session,
    config: PipelineConfig,
    status: StatusBoard,
    /// The single in-flight turn. Locked only to supersede, cancel or release.
    current: Mutex<Option<ActiveTurn>>,
    /// Serializes frame delivery across turns.
    delivery: Mutex<()>,
}

impl TurnPipeline {
    /// # Errors
    /// `ConfigInvalidValue` for a zero frame size or timeout.
    pub fn new(
        services: Services,
        renderer: Arc<dyn RendererFacade>,
        session: Session,
        config: PipelineConfig,
    ) -> Result<Self> {
        if config.frame_size == 0 {
            return Err(AvatalkError::ConfigInvalidValue {
                key: "pipeline.frame_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if config.stage_timeout.is_zero() {
            return Err(AvatalkError::ConfigInvalidValue {
                key: "pipeline.stage_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            services,
            renderer,
            session,
            config,
            status: StatusBoard::new(),
            current: Mutex::new(None),
            delivery: Mutex::new(()),
        })
    }

    /// Share an existing status board instead of the pipeline's own.
    pub fn with_status_board(mut self, status: StatusBoard) -> Self {
        self.status = status;
        self
    }

    pub fn status_board(&self) -> &StatusBoard {
        &self.status
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn renderer(&self) -> &Arc<dyn RendererFacade> {
        &self.renderer
    }

    /// Id of the turn currently in flight, if any.
    pub fn current_turn(&self) -> Option<TurnId> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|active| active.id)
    }

    pub async fn submit_text(&self, text: impl Into<String>) -> Turn {
        self.run_turn(Turn::text(text)).await
    }

    pub async fn submit_audio(&self, buffer: Vec<u8>) -> Turn {
        self.run_turn(Turn::audio(buffer)).await
    }

    /// Run `turn` to a terminal status, superseding any turn in flight.
    ///
    /// Never fails: the outcome is the returned turn's status. Service errors
    /// are also posted to the status board.
    pub async fn run_turn(&self, mut turn: Turn) -> Turn {
        self.supersede(&turn);

        let span = tracing::info_span!("turn", id = %turn.id);
        let outcome = self.drive(&mut turn).instrument(span).await;
        self.finish(&mut turn, outcome);
        turn
    }

    /// Cancel the turn in flight without starting another.
    ///
    /// Returns the id of the cancelled turn.
    pub fn cancel_current(&self) -> Option<TurnId> {
        let active = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        active.cancel.cancel();
        self.status.turn_status(active.id, TurnStatus::Cancelled);
        tracing::info!(turn = %active.id, "turn cancelled");
        Some(active.id)
    }

    fn supersede(&self, turn: &Turn) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.take() {
            previous.cancel.cancel();
            self.status
                .turn_status(previous.id, TurnStatus::Cancelled);
            tracing::info!(previous = %previous.id, next = %turn.id, "turn superseded");
        }
        *current = Some(ActiveTurn {
            id: turn.id,
            cancel: turn.cancel.clone(),
        });
        self.status.turn_status(turn.id, TurnStatus::Pending);
    }

    /// Settle the terminal status. Exactly one terminal status is published
    /// per turn: a turn that lost its slot was already published as cancelled.
    fn finish(&self, turn: &mut Turn, outcome: Result<()>) {
        let owned = {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            let owned = current.as_ref().is_some_and(|active| active.id == turn.id);
            if owned {
                *current = None;
            }
            owned
        };

        if !owned {
            turn.status = TurnStatus::Cancelled;
            tracing::debug!("superseded turn stopped");
            return;
        }

        turn.status = match outcome {
            Ok(()) => {
                tracing::info!(frames = turn.frames_sent, "turn done");
                TurnStatus::Done
            }
            Err(e) if e.is_cancellation() => {
                tracing::debug!("turn cancelled: {}", e);
                TurnStatus::Cancelled
            }
            Err(e) => {
                tracing::warn!("turn failed: {}", e);
                self.status.report(&e);
                turn.failure = Some(e.to_string());
                TurnStatus::Failed
            }
        };
        self.status.turn_status(turn.id, turn.status);
    }

    async fn drive(&self, turn: &mut Turn) -> Result<()> {
        let cancel = turn.cancel.clone();

        if turn.kind() == InputKind::Audio {
            self.advance(turn, TurnStatus::Transcribing, Stage::Transcription)?;
        }
        if let TurnInput::Audio(audio) = &turn.input {
            let transcript = self
                .run_stage(
                    Stage::Transcription,
                    &cancel,
                    self.services.transcription.transcribe(audio, &cancel),
                )
                .await?;
            commit(&cancel, Stage::Transcription)?;
            tracing::debug!(%transcript, "transcribed");
            turn.transcript = Some(transcript);
            self.status.stage_succeeded();
        }

        self.advance(turn, TurnStatus::Completing, Stage::Completion)?;
        let prompt = turn.prompt().unwrap_or_default().to_string();
        let reply = self
            .run_stage(
                Stage::Completion,
                &cancel,
                self.services.completion.complete(&prompt, &self.session, &cancel),
            )
            .await?;
        commit(&cancel, Stage::Completion)?;
        if reply.trim().is_empty() {
            return Err(AvatalkError::service(
                Stage::Completion,
                ServiceFailure::EmptyReply,
            ));
        }
        turn.reply_text = Some(reply);
        self.status.stage_succeeded();

        self.advance(turn, TurnStatus::Synthesizing, Stage::Synthesis)?;
        let reply_text = turn.reply_text.clone().unwrap_or_default();
        let audio = self
            .run_stage(
                Stage::Synthesis,
                &cancel,
                self.services.synthesis.synthesize(&reply_text, &cancel),
            )
            .await?;
        commit(&cancel, Stage::Synthesis)?;
        turn.reply_audio = Some(audio);
        self.status.stage_succeeded();

        self.advance(turn, TurnStatus::Streaming, Stage::Streaming)?;
        self.stream(turn, &cancel)
    }

    /// Move to `status` unless the turn was cancelled meanwhile.
    fn advance(&self, turn: &mut Turn, status: TurnStatus, stage: Stage) -> Result<()> {
        commit(&turn.cancel, stage)?;
        turn.status = status;
        self.status.turn_status(turn.id, status);
        tracing::debug!(%status, "stage started");
        Ok(())
    }

    async fn run_stage<T, F>(&self, stage: Stage, cancel: &CancellationToken, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.stage_timeout, call).await {
            Ok(result) => result,
            Err(_) if cancel.is_cancelled() => Err(AvatalkError::StageCancelled { stage }),
            Err(_) => Err(AvatalkError::service(
                stage,
                ServiceFailure::Timeout(self.config.stage_timeout),
            )),
        }
    }

    /// Deliver the reply audio frame by frame, in sequence order.
    ///
    /// The loop never yields, so frames of one turn reach the renderer
    /// back to back; the delivery lock keeps turns from interleaving.
    fn stream(&self, turn: &mut Turn, cancel: &CancellationToken) -> Result<()> {
        let frames = frame::split(
            turn.reply_audio.as_deref().unwrap_or_default(),
            self.config.frame_size,
        );

        let _delivery = self.delivery.lock().unwrap_or_else(|e| e.into_inner());
        for frame in &frames {
            commit(cancel, Stage::Streaming)?;
            self.renderer.send_frame(frame)?;
            turn.frames_sent += 1;
        }
        tracing::debug!(frames = frames.len(), "reply streamed");
        Ok(())
    }
}

/// Refuse to commit a result for a cancelled turn.
fn commit(cancel: &CancellationToken, stage: Stage) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AvatalkError::StageCancelled { stage })
    } else {
        Ok(())
    }
}
