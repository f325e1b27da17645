//! PowerBI export API
//!
//! Token discovery, request rendering and the HTTP client that turns a
//! report definition into xlsx bytes.

pub mod auth;
pub mod client;
pub mod query;
pub mod resilience;

pub use auth::{TokenSource, resolve_token};
pub use client::{PowerBiClient, region_label};
pub use query::ExportRequest;
