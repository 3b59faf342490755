use regex::Regex;
use sail_common::config::RemoteHostsConfig;
use url::Url;

use crate::error::{UrlTableError, UrlTableResult};

/// The allow-list of hosts that URL tables may connect to.
///
/// A filter with no entries admits every URL. Otherwise the host of the URL,
/// or `host:port` when the URL carries a port, must either equal one of the
/// listed hosts or fully match one of the listed patterns.
#[derive(Debug, Clone, Default)]
pub struct RemoteHostFilter {
    hosts: Vec<String>,
    patterns: Vec<Regex>,
}

impl RemoteHostFilter {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn try_new(hosts: Vec<String>, patterns: &[String]) -> UrlTableResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                    UrlTableError::invalid(format!("invalid remote host pattern {p}: {e}"))
                })
            })
            .collect::<UrlTableResult<Vec<_>>>()?;
        let hosts = hosts.into_iter().map(|h| h.to_lowercase()).collect();
        Ok(Self { hosts, patterns })
    }

    pub fn try_from_config(config: &RemoteHostsConfig) -> UrlTableResult<Self> {
        Self::try_new(config.allow_hosts.clone(), &config.allow_host_patterns)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.hosts.is_empty() && self.patterns.is_empty()
    }

    pub fn is_allowed(&self, url: &Url) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        let candidates = match url.port() {
            Some(port) => vec![format!("{host}:{port}"), host],
            None => vec![host],
        };
        candidates.iter().any(|candidate| {
            self.hosts.iter().any(|h| h == candidate)
                || self.patterns.iter().any(|p| p.is_match(candidate))
        })
    }

    pub fn check(&self, url: &Url) -> UrlTableResult<()> {
        if self.is_allowed(url) {
            Ok(())
        } else {
            Err(UrlTableError::ForbiddenHost(url.to_string()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_empty_filter_allows_everything() {
        let filter = RemoteHostFilter::allow_all();
        assert!(filter.is_allowed(&url("http://example.com/data.csv")));
        assert!(filter.check(&url("https://10.0.0.1:8443/")).is_ok());
    }

    #[test]
    fn test_exact_hosts() {
        let filter = RemoteHostFilter::try_new(
            vec!["example.com".to_string(), "Data.Local:8123".to_string()],
            &[],
        )
        .unwrap();
        assert!(filter.is_allowed(&url("http://example.com/a")));
        assert!(filter.is_allowed(&url("http://example.com:9000/a")));
        assert!(filter.is_allowed(&url("http://data.local:8123/a")));
        assert!(!filter.is_allowed(&url("http://data.local:8124/a")));
        assert!(!filter.is_allowed(&url("http://other.com/a")));
    }

    #[test]
    fn test_patterns_match_whole_host() {
        let filter =
            RemoteHostFilter::try_new(vec![], &[r"[a-z]+\.example\.com".to_string()]).unwrap();
        assert!(filter.is_allowed(&url("http://files.example.com/a")));
        assert!(!filter.is_allowed(&url("http://files.example.com.evil.org/a")));
        assert!(matches!(
            filter.check(&url("http://example.org/a")),
            Err(UrlTableError::ForbiddenHost(_))
        ));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = RemoteHostFilter::try_new(vec![], &["(".to_string()]);
        assert!(matches!(result, Err(UrlTableError::InvalidArgument(_))));
    }
}
