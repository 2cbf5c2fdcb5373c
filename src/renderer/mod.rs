//! Avatar renderer seam.
//!
//! The renderer protocol itself lives outside this crate; what is here is the
//! facade the pipeline drives, its event source, and two local renderers.

pub mod collector;
pub mod events;
pub mod facade;
pub mod file;
mod lifecycle;

pub use collector::CollectorRenderer;
pub use events::{EventSource, SubscriptionId};
pub use facade::{RendererConfig, RendererEvent, RendererFacade, RendererState};
pub use file::PcmFileRenderer;
