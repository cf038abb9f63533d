//! TaskFlow client core
//!
//! Identity and work-item state containers for a team task manager, kept in
//! sync with a backend-as-a-service through the `gateway::Gateway` seam.

pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod local;
pub mod models;
pub mod services;
pub mod validation;

pub use app::AppState;
pub use error::{AppError, Result};
