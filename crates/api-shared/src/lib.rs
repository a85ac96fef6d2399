//! # API Shared
//!
//! Shared definitions for the journal service's outer surfaces.
//!
//! Contains:
//! - Request and response types (`dto` module) with their OpenAPI schemas
//! - Shared services like `HealthService`
//! - Bearer-token role authorisation
//!
//! Used by `api-rest` and the CLI for common functionality.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{ApiTokens, AuthError, Role};
pub use dto::*;
pub use health::HealthService;
