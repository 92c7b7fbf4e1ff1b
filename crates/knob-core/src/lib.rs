pub mod config;
pub mod error;

pub use config::KnobConfig;
pub use error::{KnobError, KnobResult};
