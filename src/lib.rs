//! bookforge: a self-hostable book authoring service.
//!
//! Users write books as projects holding an ordered, typed chapter tree
//! (front matter, parts, chapters, subchapters, back matter), lay them out
//! with per-project page geometry and typography, and export them to
//! paginated PDF or reflowable EPUB. Resource ceilings are enforced per
//! subscription plan (FREE vs PRO), with plan state driven by billing
//! provider webhooks.
//!
//! # Features
//!
//! - Account registration and session-token authentication
//! - Hierarchical chapter model with stable creation-time numbering
//! - PDF composition and EPUB packaging from chapter HTML
//! - FREE/PRO plan ceilings checked against fresh usage counts
//! - Webhook-driven subscription lifecycle with signature verification
//! - Append-only subscription history and best-effort audit logging

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Best-effort audit trail.
pub mod audit;
/// Authentication and account management.
pub mod auth;
/// Billing provider integration.
pub mod billing;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book export engine.
pub mod export;
/// Static plan configuration.
pub mod plan;
/// Project and chapter authoring.
pub mod projects;
/// HTTP server.
pub mod server;
/// Plan state machine.
pub mod subscription;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
