//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `auth`: local access-token inspection
//! - `config`: Application configuration and settings
//! - `error`: Unified error types
//! - `metrics`: Prometheus metrics helpers

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
