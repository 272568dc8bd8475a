//! # transcribe-common
//!
//! Shared code for the transcription orchestration core:
//! - Domain types (job options, instruments, notes, confidence entries)
//! - Common error type
//! - Workspace root and engine tuning configuration
//! - The per-job progress event bus

pub mod config;
pub mod error;
pub mod events;
pub mod model;

pub use error::{Error, Result};
pub use events::{EventBus, TranscribeEvent};
