use reqwest::Url;

use crate::error::StorageError;

/// Host the storage backend advertises inside the compose network.
pub const INTERNAL_STORAGE_HOST: &str = "minio";

/// How presigned storage URLs are redirected before use.
///
/// Presigned URLs are signed for the authority the server saw. When the
/// client reaches storage through a different authority, the original one
/// is sent back in the `Host` header so the signature still verifies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostRewrite {
    /// Use URLs as issued.
    #[default]
    None,
    /// Replace scheme and authority with `http://<authority>`.
    Authority(String),
    /// Replace host `from` with `to`, keeping scheme and port.
    Host { from: String, to: String },
}

/// A URL ready to be requested, plus the `Host` header it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub url: Url,
    pub host_header: Option<String>,
}

impl HostRewrite {
    /// Rule used by the CLI: an explicit storage authority if one is
    /// configured, otherwise map the compose-internal host to localhost.
    pub fn from_s3_host(s3_host: Option<&str>) -> Self {
        match s3_host.map(str::trim).filter(|h| !h.is_empty()) {
            Some(host) => HostRewrite::Authority(host.to_string()),
            None => HostRewrite::Host {
                from: INTERNAL_STORAGE_HOST.into(),
                to: "localhost".into(),
            },
        }
    }

    pub fn resolve(&self, raw: &str) -> Result<ResolvedUrl, StorageError> {
        let original = Url::parse(raw).map_err(|e| StorageError::InvalidUrl(format!("{raw}: {e}")))?;
        let mut url = original.clone();

        match self {
            HostRewrite::None => {}
            HostRewrite::Authority(authority) => {
                let target = Url::parse(&format!("http://{authority}"))
                    .map_err(|e| StorageError::InvalidUrl(format!("{authority}: {e}")))?;
                let invalid = || StorageError::InvalidUrl(format!("cannot rewrite {raw}"));
                url.set_scheme("http").map_err(|_| invalid())?;
                url.set_host(target.host_str()).map_err(|_| invalid())?;
                url.set_port(target.port()).map_err(|_| invalid())?;
            }
            HostRewrite::Host { from, to } => {
                if original.host_str() == Some(from.as_str()) {
                    url.set_host(Some(to))
                        .map_err(|e| StorageError::InvalidUrl(format!("{to}: {e}")))?;
                }
            }
        }

        let before = authority(&original);
        let host_header = (authority(&url) != before).then_some(before);
        Ok(ResolvedUrl { url, host_header })
    }
}

/// `host[:port]` as it appears in the URL (default ports omitted).
fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
