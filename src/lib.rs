//! Spam pipeline: staged concurrent mail report engine.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod stages;
