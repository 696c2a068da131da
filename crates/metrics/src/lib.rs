//! Metrics collection and export for c2switch.
//!
//! This crate provides a unified metrics interface using the `metrics` crate facade.
//! Without an installed recorder every macro is a no-op.
//!
//! # Usage
//!
//! ```rust,ignore
//! use c2switch_metrics::{counter, oauth};
//!
//! counter!(oauth::TOKEN_REFRESHES_TOTAL).increment(1);
//! ```
//!
//! # Features
//!
//! - `prometheus`: install a Prometheus recorder and render the text exposition format

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
