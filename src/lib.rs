//! TTIScan - Freshness classification of time-temperature indicator labels.
//!
//! # Overview
//!
//! A TTI label on a food package changes color irreversibly with cumulative
//! thermal exposure. TTIScan photographs the label, averages its color and
//! matches it against a calibrated four-color palette
//! (FRESH → GOOD → WARNING → EXPIRED), reporting a state, a confidence and
//! an estimate of remaining shelf life.
//!
//! # Modules
//!
//! - [`model`]: Colors, freshness states, profiles and analysis results
//! - [`pixels`]: Decoded pixel buffers and representative-color extraction
//! - [`calibration`]: The calibration profile store
//! - [`classifier`]: Color ranking, confidence and remaining-days estimates
//! - [`storage`]: SQLite persistence for profiles and history
//! - [`config`]: Environment-driven configuration
//! - [`api`]: HTTP API handlers
//! - [`error`]: Core and HTTP error types

pub mod api;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod error;
pub mod model;
pub mod pixels;
pub mod storage;
