//! Core domain + application logic for the Gemini Telegram relay bot.
//!
//! This crate is framework-agnostic. Telegram and Gemini live behind ports
//! (traits) implemented in adapter crates.

pub mod chunking;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod persona;
pub mod session;

pub use errors::{Error, Result};
