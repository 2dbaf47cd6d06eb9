//! # UA Common Library
//!
//! Shared code for the attendance services including:
//! - Error type shared by storage and configuration code
//! - Configuration loading and root folder resolution
//! - Database initialization, settings access and lock retry
//! - Domain event bus and SSE streaming
//! - Timestamp helpers for the on-disk formats

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, UaEvent};
