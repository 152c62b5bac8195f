//! Connection layer shared by all source adapters and the install
//! pipeline: HTTP client, retry policy, and streaming downloads.

mod client;
mod download;
mod retry;

pub use client::{extract_domain, HttpClient, RateLimitState};
pub use download::{ArchiveDownloader, DownloadProgress};
pub use retry::{retry_request, RetryConfig};
