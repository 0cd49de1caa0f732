//! Core types for the Lighter Whale Tracker
//!
//! This crate defines the shared data structures used across the tracker,
//! including the normalized trade value and the common error taxonomy.

pub mod error;
pub mod trade;

pub use error::{TrackerError, TrackerResult};
pub use trade::{NormalizedTrade, TradeSide};
