#![forbid(unsafe_code)]

//! Download-retry tooling shared by the tubegrab binaries.
//!
//! The crate wraps an external command-line media downloader in a
//! multi-strategy fallback engine: an ordered ladder of client emulations is
//! tried one at a time until an attempt produces a viable file or the ladder
//! is exhausted. Everything around that engine (environment detection,
//! cookie material, pre-flight probing) lives in its own module so binaries
//! can compose just the pieces they need.

pub mod cookies;
pub mod env_profile;
pub mod orchestrator;
pub mod probe;
pub mod security;
pub mod strategy;
