//! Turn pipeline: one conversational turn from input to rendered audio.

pub mod orchestrator;
pub mod status;
pub mod turn;

pub use orchestrator::{PipelineConfig, Services, TurnPipeline};
pub use status::{ConnectionState, ErrorNotice, StatusBoard, UiState};
pub use turn::{InputKind, Turn, TurnId, TurnInput, TurnStatus};
