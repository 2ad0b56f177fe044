use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::rewrite::HostRewrite;

/// Control-plane base URL used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";

/// Settings shared by the control-plane and storage clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the control plane, without a trailing slash.
    pub api_url: String,
    /// Authority to reach storage through, overriding presigned URLs.
    pub s3_host: Option<String>,
    /// Timeout for control-plane requests.
    pub request_timeout: Duration,
    /// Timeout for a single part upload or download.
    pub transfer_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            s3_host: None,
            request_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Rewrite rule derived from [`s3_host`](Self::s3_host).
    pub fn host_rewrite(&self) -> HostRewrite {
        HostRewrite::from_s3_host(self.s3_host.as_deref())
    }

    pub(crate) fn base_url(&self) -> String {
        self.api_url.trim_end_matches('/').to_string()
    }
}
