//! Custom Resource Definitions for the maintenance supervisor
//!
//! This module defines the MaintenanceWindow CRD and the registry of kinds the
//! supervisor knows how to address.

mod maintenance_window;
pub mod registry;
pub mod types;


pub use maintenance_window::{
    MaintenanceWindow, MaintenanceWindowSpec, MaintenanceWindowStatus, SpecValidationError,
};
pub use registry::{KindEntry, KindRegistry};
pub use types::*;
