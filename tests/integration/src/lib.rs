//! MediaLake Integration Tests
//!
//! These tests run against a deployed MediaLake stack:
//! - MEDIALAKE_API_URL: API Gateway base URL (required)
//! - MEDIALAKE_ASSET_TABLE: asset table, enables tests that seed assets
//! - MEDIALAKE_TEST_BUCKET: bucket the stack may delete test objects from
//!
//! Variables may also come from a `.env` file.
//!
//! Run with: cargo test --package medialake-integration-tests

pub mod client;
pub mod fixtures;

pub use client::MediaLakeClient;
pub use fixtures::*;
