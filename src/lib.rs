// Surveil - library entry point

pub mod constants;
pub mod error;
pub mod tools;
pub mod config;
pub mod artifacts;
pub mod progress;
pub mod capability;
pub mod timeline;
pub mod activity;
pub mod events;
pub mod labeling;
pub mod state;
pub mod pipeline;

pub use error::{PipelineError, Result};
