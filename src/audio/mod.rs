pub mod capture;
pub mod device;
pub mod frame;
#[cfg(feature = "microphone")]
pub mod microphone;
pub mod wav;
