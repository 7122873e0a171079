//! REST API module for external integrations
//!
//! Provides an HTTP API for listing MaintenanceWindows and asking whether a
//! disruptive operation may run now.

mod dto;
mod handlers;
mod server;

pub use dto::{GateQuery, GateResponse, WindowListResponse, WindowSummary};
pub use server::{router, run_server};
