//! Murmur HTTP server: JSON API over the local text-to-speech pipeline.

pub mod api;
pub mod types;

pub use api::{router, ApiError, MurmurServer};
