//! CLI for this application
//!
use crate::error::Result;
use crate::settings;

#[derive(Clone, Debug, clap::Parser)]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("GATEMESH_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("GATEMESH_HTTP_LISTEN_PORT"),
        help = "Port to bind the gateway HTTP API server to"
    )]
    pub listen_port: u16,

    #[clap(long, env("GATEMESH_NODE_ID"), help = "Unique id of this gateway in the mesh")]
    pub node_id: String,

    #[clap(
        long,
        default_value = "",
        env("GATEMESH_URLS"),
        help = "Semicolon-delimited URLs siblings use to reach this node"
    )]
    pub urls: String,

    #[clap(
        long,
        default_value = "5",
        env("GATEMESH_GOSSIP_INTERVAL_SECONDS"),
        allow_hyphen_values = true,
        help = "Gossip interval in seconds; 0 or less disables gossip"
    )]
    pub gossip_interval_secs: i64,

    // Cluster configuration information: static siblings
    #[clap(
        long = "sibling",
        env("GATEMESH_SIBLINGS"),
        value_delimiter = ',',
        help = "Static sibling as id=url1;url2 (repeatable, or comma separated)"
    )]
    pub siblings: Vec<settings::SiblingConfig>,

    #[clap(
        long,
        default_value_t = false,
        env("GATEMESH_MASTER"),
        help = "Collect local policy mutations for replication"
    )]
    pub master: bool,

    #[clap(
        long,
        default_value = "10",
        env("GATEMESH_BOOTSTRAP_DELAY_SECONDS"),
        help = "Delay before importing state from a static sibling"
    )]
    pub bootstrap_delay_secs: u64,

    #[clap(long, env("GATEMESH_INTERNAL_ACCESS_ID"), help = "Internal credential id")]
    pub internal_access_id: Option<String>,

    #[clap(
        long,
        env("GATEMESH_INTERNAL_ACCESS_KEY"),
        help = "Internal credential key (base64)"
    )]
    pub internal_access_key: Option<String>,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_ACCESS_CACHE_CAPACITY,
        env("GATEMESH_ACCESS_CACHE_CAPACITY"),
        help = "Access credential cache size"
    )]
    pub access_cache_capacity: usize,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_NEGATIVE_CACHE_TTL_SECS,
        env("GATEMESH_NEGATIVE_CACHE_TTL_SECONDS"),
        help = "How long an unknown credential id stays cached as missing"
    )]
    pub negative_cache_ttl_secs: u64,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_SYNC_CONNECT_TIMEOUT_MS,
        env("GATEMESH_SYNC_CONNECT_TIMEOUT_MS")
    )]
    pub sync_connect_timeout_ms: u64,

    #[clap(
        long,
        default_value_t = settings::DEFAULT_SYNC_READ_TIMEOUT_MS,
        env("GATEMESH_SYNC_READ_TIMEOUT_MS")
    )]
    pub sync_read_timeout_ms: u64,
}

impl Cli {
    pub fn into_settings(self) -> Result<settings::Settings> {
        let internal_credential = match (self.internal_access_id, self.internal_access_key) {
            (Some(id), Some(key)) => Some(settings::InternalCredential::from_base64(&id, &key)?),
            (None, None) => None,
            _ => {
                return Err(crate::config_error!(
                    "internal access id and key must be configured together"
                ))
            }
        };
        Ok(settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            node_id: self.node_id,
            advertised_urls: settings::parse_url_list(&self.urls),
            gossip_interval_secs: self.gossip_interval_secs,
            siblings: self.siblings,
            is_master: self.master,
            bootstrap_delay_secs: self.bootstrap_delay_secs,
            internal_credential,
            access_cache_capacity: self.access_cache_capacity,
            negative_cache_ttl_secs: self.negative_cache_ttl_secs,
            sync_connect_timeout_ms: self.sync_connect_timeout_ms,
            sync_read_timeout_ms: self.sync_read_timeout_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_into_settings() {
        let cli = Cli::try_parse_from([
            "gatemesh",
            "--node-id",
            "gw-1",
            "--urls",
            "http://gw1:8510",
            "--sibling",
            "gw-2=http://gw2:8510",
            "--sibling",
            "gw-3=http://gw3:8510;http://gw3b:8510",
            "--master",
            "--gossip-interval-secs",
            "-1",
        ])
        .unwrap();
        let settings = cli.into_settings().unwrap();
        assert_eq!(settings.node_id, "gw-1");
        assert_eq!(settings.siblings.len(), 2);
        assert_eq!(settings.siblings[1].urls.len(), 2);
        assert!(settings.is_master);
        assert!(settings.gossip_interval().is_none());
        assert!(settings.internal_credential.is_none());
    }

    #[test]
    fn test_cli_rejects_half_internal_credential() {
        let cli = Cli::try_parse_from([
            "gatemesh",
            "--node-id",
            "gw-1",
            "--internal-access-id",
            "ak.1.abcd1",
        ])
        .unwrap();
        assert!(cli.into_settings().is_err());
    }
}
