//! Maintenance Supervisor: approval-gated maintenance windows for Kubernetes
//!
//! This crate provides a Kubernetes operator that decides when disruptive
//! database operations may run: it matches instants against
//! MaintenanceWindow resources, drives their approval state and waits on
//! cluster objects until they reach the state an operation needs.

pub mod controller;
pub mod crd;
pub mod error;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
