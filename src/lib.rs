//! vinylkeeper - self-hosted record catalog sync and duration resolution.
//!
//! The crate is split into the machinery shared by both long-running workers
//! (rate limiting, state management, progress persistence) and the two
//! workers themselves (catalog sync, duration resolution).

pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod progress;
pub mod rate_limit;
pub mod repository;
pub mod resolver;
pub mod server;
pub mod similarity;
pub mod state;
pub mod sync;
