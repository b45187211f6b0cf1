//! HTTP client for the external paginated sync source.

mod paged_client;

pub use paged_client::HttpRowFetcher;
