//! REST backend access.

mod api_types;
mod cached_client;
mod client;

pub use api_types::{ApiResponse, SendMessageRequest};
pub use cached_client::CachedClient;
pub use client::ApiClient;
