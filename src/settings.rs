//! gatemesh application settings
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::{GatewayError, Result};

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_HTTP: u16 = 8510;
pub const DEFAULT_PORT_HTTP: &str = "8510";

pub const DEFAULT_ACCESS_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_NEGATIVE_CACHE_TTL_SECS: u64 = 30;
pub const DEFAULT_SYNC_CONNECT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_SYNC_READ_TIMEOUT_MS: u64 = 10_000;

/// Separator used in `--sibling id=url1;url2` and `--urls url1;url2`
pub const URL_LIST_SEPARATOR: char = ';';

/// A statically configured sibling gateway
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiblingConfig {
    pub id: String,
    pub urls: Vec<String>,
}

impl std::str::FromStr for SiblingConfig {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (id, urls) = s
            .split_once('=')
            .ok_or_else(|| format!("Invalid sibling '{}': expected id=url1;url2", s))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(format!("Invalid sibling '{}': empty node id", s));
        }
        let urls = parse_url_list(urls);
        if urls.is_empty() {
            return Err(format!("Invalid sibling '{}': no urls", s));
        }
        Ok(SiblingConfig {
            id: id.to_string(),
            urls,
        })
    }
}

pub fn parse_url_list(raw: &str) -> Vec<String> {
    raw.split(URL_LIST_SEPARATOR)
        .map(|u| u.trim().trim_end_matches('/'))
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}

/// The gateway's own credential, used to sign gateway-originated calls
#[derive(Clone)]
pub struct InternalCredential {
    pub access_id: String,
    pub access_key: Vec<u8>,
}

impl InternalCredential {
    pub fn from_base64(access_id: &str, key_b64: &str) -> Result<Self> {
        let access_key = BASE64
            .decode(key_b64.trim())
            .map_err(|e| GatewayError::Config(format!("internal access key: {}", e)))?;
        Ok(Self {
            access_id: access_id.to_string(),
            access_key,
        })
    }
}

impl std::fmt::Debug for InternalCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalCredential")
            .field("access_id", &self.access_id)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // HTTP API listen port
    pub listen_port: u16,

    // This node's mesh identity
    pub node_id: String,

    // URLs siblings use to reach this node; defaults to http://{listen_address}:{listen_port}
    pub advertised_urls: Vec<String>,

    // Gossip interval in seconds, <= 0 disables the loop
    pub gossip_interval_secs: i64,

    // Statically configured siblings
    pub siblings: Vec<SiblingConfig>,

    // Only the master collects changed objects for replication
    pub is_master: bool,

    // Delay before the one-shot bootstrap import
    pub bootstrap_delay_secs: u64,

    pub internal_credential: Option<InternalCredential>,

    pub access_cache_capacity: usize,
    pub negative_cache_ttl_secs: u64,

    pub sync_connect_timeout_ms: u64,
    pub sync_read_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: STANDARD_PORT_HTTP,
            node_id: "gateway-1".to_string(),
            advertised_urls: Vec::new(),
            gossip_interval_secs: 5,
            siblings: Vec::new(),
            is_master: false,
            bootstrap_delay_secs: 10,
            internal_credential: None,
            access_cache_capacity: DEFAULT_ACCESS_CACHE_CAPACITY,
            negative_cache_ttl_secs: DEFAULT_NEGATIVE_CACHE_TTL_SECS,
            sync_connect_timeout_ms: DEFAULT_SYNC_CONNECT_TIMEOUT_MS,
            sync_read_timeout_ms: DEFAULT_SYNC_READ_TIMEOUT_MS,
        }
    }
}

impl Settings {
    pub fn self_urls(&self) -> Vec<String> {
        if self.advertised_urls.is_empty() {
            vec![format!("http://{}:{}", self.listen_address, self.listen_port)]
        } else {
            self.advertised_urls.clone()
        }
    }

    /// None when the gossip loop is disabled
    pub fn gossip_interval(&self) -> Option<Duration> {
        if self.gossip_interval_secs <= 0 {
            None
        } else {
            Some(Duration::from_secs(self.gossip_interval_secs as u64))
        }
    }

    pub fn negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_cache_ttl_secs)
    }

    pub fn sync_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_connect_timeout_ms)
    }

    pub fn sync_read_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sibling() {
        let sibling: SiblingConfig = "gw-2=http://10.0.0.2:8510;http://gw2.local:8510/"
            .parse()
            .unwrap();
        assert_eq!(sibling.id, "gw-2");
        assert_eq!(
            sibling.urls,
            vec!["http://10.0.0.2:8510", "http://gw2.local:8510"]
        );

        assert!("no-separator".parse::<SiblingConfig>().is_err());
        assert!("=http://a".parse::<SiblingConfig>().is_err());
        assert!("gw-3= ; ".parse::<SiblingConfig>().is_err());
    }

    #[test]
    fn test_gossip_interval_disabled() {
        let mut settings = Settings::default();
        settings.gossip_interval_secs = 0;
        assert!(settings.gossip_interval().is_none());
        settings.gossip_interval_secs = -5;
        assert!(settings.gossip_interval().is_none());
        settings.gossip_interval_secs = 2;
        assert_eq!(settings.gossip_interval(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_self_urls_default() {
        let settings = Settings {
            listen_address: "127.0.0.1".to_string(),
            listen_port: 9000,
            ..Settings::default()
        };
        assert_eq!(settings.self_urls(), vec!["http://127.0.0.1:9000"]);
    }

    #[test]
    fn test_internal_credential_decode() {
        let cred = InternalCredential::from_base64("ak.x.0000", "AAEC").unwrap();
        assert_eq!(cred.access_key, vec![0u8, 1, 2]);
        assert!(InternalCredential::from_base64("ak.x.0000", "!!!").is_err());
        assert!(!format!("{:?}", cred).contains("AAEC"));
    }
}
