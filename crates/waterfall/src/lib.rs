use thiserror::Error;

mod range;
pub use range::*;
mod cache;
pub use cache::*;
mod clock;
pub use clock::*;
mod controls;
pub use controls::*;
mod keyboard;
pub use keyboard::*;
mod playback;
pub use playback::*;
mod slice;
pub use slice::*;
mod source;
pub use source::*;
mod fetch;
pub use fetch::*;
mod session;
pub use session::*;
pub mod config;
pub use config::{ConfigError, WaterfallConfig};

#[derive(Debug, Error)]
pub enum WaterfallError {
    #[error("invalid slice index input: {0:?}")]
    InvalidIndexInput(String),
    #[error("unknown control key: {0:?}")]
    UnknownKey(String),
    #[error("capture has no slices: {0}")]
    EmptyCapture(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Index of a spectrogram slice inside a capture.
pub type SliceIndex = usize;
