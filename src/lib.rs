//! Review submission, email verification and moderation service.
//!
//! Reviews are persisted as JSON files under a data directory and move
//! between status directories (`pending -> verified -> approved/rejected`)
//! as they progress through the verification workflow. Verification is
//! proved by a single-use emailed token; approved reviews are served through
//! a privacy-filtered display API.

pub mod api;
pub mod audit;
pub mod config;
pub mod email;
pub mod error;
pub mod models;
pub mod store;
pub mod tokens;
pub mod workflow;
