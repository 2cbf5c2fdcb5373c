//! Conversation application entry points.
//!
//! Wires the configured services, renderer and session into a turn pipeline
//! and drives it from the terminal:
//! type or speak → transcribe → complete → synthesize → render

use crate::audio::capture::{CaptureController, CaptureEvent};
use crate::audio::device::{CaptureDevice, CaptureStream};
use crate::audio::frame::AudioFrame;
use crate::config::Config;
use crate::error::{AvatalkError, Result};
use crate::pipeline::{
    ConnectionState, PipelineConfig, Services, StatusBoard, Turn, TurnPipeline, TurnStatus,
};
use crate::renderer::{PcmFileRenderer, RendererConfig, RendererEvent, RendererFacade};
use crate::services::{ChatCompletion, ElevenLabsSynthesis, OpenAiTranscription};
use crate::session::Session;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Command-line switches shared by the conversation commands.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub quiet: bool,
    /// Audio input device for `/listen`
    pub device: Option<String>,
}

/// Everything a running conversation owns.
pub struct Conversation {
    pipeline: Arc<TurnPipeline>,
    renderer: Arc<dyn RendererFacade>,
    status: StatusBoard,
    watcher: JoinHandle<()>,
}

impl Conversation {
    /// Build the pipeline from `config` and start the renderer.
    ///
    /// Returns once the renderer handshake has begun; use
    /// [`Conversation::wait_connected`] to wait for its outcome.
    pub async fn open(config: &Config) -> Result<Self> {
        let session_path = config
            .session
            .path
            .clone()
            .unwrap_or_else(Session::default_path);
        let session = Session::load_or_create(&session_path)?;

        let services = Services {
            transcription: Arc::new(OpenAiTranscription::new(&config.transcription)?),
            completion: Arc::new(ChatCompletion::new(&config.completion)?),
            synthesis: Arc::new(ElevenLabsSynthesis::new(&config.synthesis)?),
        };

        let mut renderer_config = RendererConfig::from(&config.renderer);
        if renderer_config.audio_sink.is_none() {
            renderer_config.audio_sink = Some(default_audio_sink());
        }
        let renderer: Arc<dyn RendererFacade> = Arc::new(PcmFileRenderer::new());
        renderer.initialize(renderer_config)?;

        Self::assemble(
            services,
            renderer,
            session,
            PipelineConfig::from(&config.pipeline),
            config.renderer.prime_silence,
        )
        .await
    }

    /// Build a conversation from already constructed parts.
    ///
    /// `renderer` must be initialized; it is started here.
    pub async fn assemble(
        services: Services,
        renderer: Arc<dyn RendererFacade>,
        session: Session,
        config: PipelineConfig,
        prime_silence: bool,
    ) -> Result<Self> {
        let status = StatusBoard::new();
        let prime = prime_silence.then_some(config.frame_size);

        let (_, events) = renderer.subscribe();
        let watcher = tokio::spawn(watch_renderer(
            Arc::clone(&renderer),
            events,
            status.clone(),
            prime,
        ));

        let pipeline = TurnPipeline::new(services, Arc::clone(&renderer), session, config)?
            .with_status_board(status.clone());

        status.set_connection(ConnectionState::Connecting);
        renderer.start().await?;

        Ok(Self {
            pipeline: Arc::new(pipeline),
            renderer,
            status,
            watcher,
        })
    }

    pub fn pipeline(&self) -> &Arc<TurnPipeline> {
        &self.pipeline
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Wait until the renderer is connected.
    ///
    /// # Errors
    /// `RendererConnectionFailed` if the handshake failed or the renderer went away.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.status.subscribe();
        let state = rx
            .wait_for(|s| {
                matches!(
                    s.connection,
                    ConnectionState::Connected | ConnectionState::Failed
                )
            })
            .await
            .map_err(|_| AvatalkError::RendererConnectionFailed {
                message: "renderer status closed".to_string(),
            })?
            .clone();

        match state.connection {
            ConnectionState::Connected => Ok(()),
            _ => Err(AvatalkError::RendererConnectionFailed {
                message: state
                    .error
                    .map(|notice| notice.message)
                    .unwrap_or_else(|| "renderer failed to connect".to_string()),
            }),
        }
    }

    /// Cancel any turn in flight, close the renderer and wait for its events to drain.
    pub async fn shutdown(self) {
        if let Some(id) = self.pipeline.cancel_current() {
            tracing::info!(turn = %id, "cancelled turn on shutdown");
        }
        self.renderer.close();
        if let Err(e) = self.watcher.await {
            tracing::warn!("renderer watcher ended abnormally: {}", e);
        }
    }
}

/// Follow renderer lifecycle events until the renderer closes.
///
/// `prime` is the size of a silent frame sent right after connecting so the
/// avatar starts idling before the first reply.
async fn watch_renderer(
    renderer: Arc<dyn RendererFacade>,
    mut events: mpsc::UnboundedReceiver<RendererEvent>,
    status: StatusBoard,
    prime: Option<usize>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RendererEvent::Connected => {
                if let Some(size) = prime
                    && let Err(e) = renderer.send_frame(&AudioFrame::new(0, vec![0u8; size]))
                {
                    tracing::warn!("failed to prime renderer: {}", e);
                }
                status.set_connection(ConnectionState::Connected);
            }
            RendererEvent::Started => tracing::debug!("avatar playback started"),
            RendererEvent::Disconnected => status.set_connection(ConnectionState::Disconnected),
            RendererEvent::Failed(message) => {
                status.report(&AvatalkError::RendererConnectionFailed { message });
                status.set_connection(ConnectionState::Failed);
            }
        }
    }
    tracing::debug!("renderer events closed");
}

/// Where reply audio goes when no sink is configured.
fn default_audio_sink() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("avatalk")
        .join("reply.pcm")
}

/// Capture device for builds without microphone support.
#[cfg_attr(feature = "microphone", allow(dead_code))]
struct NoMicrophone;

#[async_trait::async_trait]
impl CaptureDevice for NoMicrophone {
    async fn acquire(&self) -> Result<CaptureStream> {
        Err(AvatalkError::DeviceUnavailable {
            message: "avatalk was built without the `microphone` feature".to_string(),
        })
    }

    fn name(&self) -> &str {
        "none"
    }
}

#[cfg(feature = "microphone")]
fn microphone(device: Option<String>) -> Arc<dyn CaptureDevice> {
    Arc::new(crate::audio::microphone::CpalMicrophone::new(device))
}

#[cfg(not(feature = "microphone"))]
fn microphone(device: Option<String>) -> Arc<dyn CaptureDevice> {
    if let Some(name) = device {
        tracing::warn!(device = %name, "microphone support not compiled in");
    }
    Arc::new(NoMicrophone)
}

fn print_turn(turn: &Turn, status: &StatusBoard, quiet: bool) {
    match turn.status {
        TurnStatus::Done => {
            if let Some(transcript) = &turn.transcript
                && !quiet
            {
                eprintln!("{} {}", "you:".dimmed(), transcript);
            }
            if let Some(reply) = &turn.reply_text {
                println!("{} {}", "avatar:".cyan(), reply);
            }
        }
        TurnStatus::Failed => {
            if let Some(notice) = status.snapshot().error {
                eprintln!("{}", notice.message.red());
            }
        }
        _ => {}
    }
}

/// What a chat input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatInput {
    Say(String),
    Listen,
    Stop,
    Cancel,
    Dismiss,
    Quit,
    Unknown(String),
    Empty,
}

fn parse_chat_line(line: &str) -> ChatInput {
    let line = line.trim();
    match line {
        "" => ChatInput::Empty,
        "/listen" => ChatInput::Listen,
        "/stop" => ChatInput::Stop,
        "/cancel" => ChatInput::Cancel,
        "/dismiss" => ChatInput::Dismiss,
        "/quit" | "/exit" => ChatInput::Quit,
        cmd if cmd.starts_with('/') => ChatInput::Unknown(cmd.to_string()),
        text => ChatInput::Say(text.to_string()),
    }
}

fn spawn_turn(conversation: &Conversation, turn: Turn, quiet: bool) {
    let pipeline = Arc::clone(conversation.pipeline());
    let status = conversation.status().clone();
    tokio::spawn(async move {
        let turn = pipeline.run_turn(turn).await;
        print_turn(&turn, &status, quiet);
    });
}

/// Run the interactive conversation until `/quit`, end of input or Ctrl-C.
///
/// Each typed line starts a turn, superseding any reply still in progress.
pub async fn run_chat_command(config: Config, options: RunOptions) -> Result<()> {
    let conversation = Conversation::open(&config).await?;
    conversation.wait_connected().await?;

    let (mut capture, mut captured) = CaptureController::new(microphone(options.device.clone()));

    if !options.quiet {
        eprintln!(
            "{}",
            "Connected. Type to talk; /listen and /stop to speak, /quit to leave.".green()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_chat_line(&line) {
                    ChatInput::Empty => {}
                    ChatInput::Say(text) => spawn_turn(&conversation, Turn::text(text), options.quiet),
                    ChatInput::Listen => match capture.start_listening().await {
                        Ok(()) => {
                            conversation.status().set_listening(true);
                            if !options.quiet {
                                eprintln!("{}", "Listening... /stop when done.".yellow());
                            }
                        }
                        Err(e) => {
                            conversation.status().report(&e);
                            eprintln!("{}", e.user_message().unwrap_or_else(|| e.to_string()).red());
                        }
                    },
                    ChatInput::Stop => {
                        let stopped = capture.stop_listening().await;
                        conversation.status().set_listening(false);
                        if let Err(e) = stopped {
                            conversation.status().report(&e);
                            eprintln!("{}", e.user_message().unwrap_or_else(|| e.to_string()).red());
                        }
                    }
                    ChatInput::Cancel => {
                        conversation.pipeline().cancel_current();
                    }
                    ChatInput::Dismiss => conversation.status().dismiss(),
                    ChatInput::Quit => break,
                    ChatInput::Unknown(cmd) => {
                        eprintln!("Unknown command {cmd}. Try /listen, /stop, /cancel, /dismiss or /quit.");
                    }
                }
            }
            Some(CaptureEvent::Finished(buffer)) = captured.recv() => {
                spawn_turn(&conversation, Turn::audio(buffer), options.quiet);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    if capture.is_recording()
        && let Err(e) = capture.stop_listening().await
    {
        tracing::warn!("failed to stop recording on exit: {}", e);
    }
    drop(capture);
    conversation.shutdown().await;
    Ok(())
}

/// Say `text` once, wait for the reply to be rendered, then exit.
pub async fn run_say_command(config: Config, options: RunOptions, text: String) -> Result<()> {
    let conversation = Conversation::open(&config).await?;
    conversation.wait_connected().await?;

    let turn = conversation.pipeline().submit_text(text).await;
    let outcome = match turn.status {
        TurnStatus::Done => {
            match &turn.reply_text {
                Some(reply) if options.quiet => println!("{}", reply),
                Some(reply) => println!("{} {}", "avatar:".cyan(), reply),
                None => {}
            }
            Ok(())
        }
        _ => Err(AvatalkError::Other(
            turn.failure
                .unwrap_or_else(|| format!("turn ended {}", turn.status)),
        )),
    };

    conversation.shutdown().await;
    outcome
}
