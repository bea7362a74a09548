//! Unified Listing API client
//!
//! HTTP access to the central product store: session login, reading a
//! source's existing records, and creating or updating single records.

pub mod client;
pub mod endpoints;
pub mod types;

pub use client::ApiClient;
pub use types::*;
