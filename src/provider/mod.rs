//! Client for the external generation provider

pub mod data_url;
pub mod http_provider;
pub mod retry;
pub mod traits;

pub use http_provider::HttpProvider;
pub use retry::RetryPolicy;
pub use traits::{GenerationProvider, JobRequest, JobStatus, PollResult};

/// `host/last-segment` form of an artifact URL for log lines.
pub fn shorten_url(url: &str) -> String {
    if data_url::is_data_url(url) {
        return format!("data:{}", data_url::format_of(url).unwrap_or("?"));
    }
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let without_query = without_scheme.split(['?', '#']).next().unwrap_or(without_scheme);
    let host = without_query.split('/').next().unwrap_or_default();
    match without_query.rsplit('/').next() {
        Some(last) if last != host && !last.is_empty() => format!("{}/{}", host, last),
        _ => host.to_string(),
    }
}
