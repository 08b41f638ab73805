pub mod config;
pub mod error;
pub mod types;

pub use config::SlotflowConfig;
pub use error::{Result, SlotflowError};
pub use types::*;
