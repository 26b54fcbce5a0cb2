//! Remote language-model port.

pub mod client;
pub mod types;

pub use client::{ModelClient, ModelError};
pub use types::{GenerationSettings, ProviderKind, Role, Turn};
