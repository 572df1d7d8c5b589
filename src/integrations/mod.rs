//! Outbound integrations: OpenAPI tool servers and the toolkit authorization broker.

pub mod tool_servers;
pub mod toolkits;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a:1/", "/openapi.json"), "http://a:1/openapi.json");
        assert_eq!(join_url("http://a:1", "v1/tools"), "http://a:1/v1/tools");
    }
}
