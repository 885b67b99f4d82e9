use std::env;
use std::io;
use std::net::{AddrParseError, IpAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use trust_dns_resolver::{
    TokioAsyncResolver,
    config::{NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts},
};

use super::probe_config::{DEFAULT_TIMEOUT_MS, DEFAULT_URL, ProbeConfig, default_messages};
use crate::ws_probe::endpoint::{Endpoint, EndpointError, Scheme};
use crate::ws_probe::probe::{DEFAULT_GRACE, ProbeOptions};

pub const DEFAULT_CONFIG_FILE: &str = "wsprobe.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid YAML in {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value '{value}' for {name}: expected a whole number of milliseconds")]
    InvalidNumber { name: &'static str, value: String },

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("invalid DNS host '{host}'")]
    InvalidDnsHost {
        host: String,
        #[source]
        source: AddrParseError,
    },

    #[error("failed to build TLS connector")]
    Tls(#[from] native_tls::Error),
}

/// Fully resolved settings for a single probe run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub endpoint: Endpoint,
    pub messages: Vec<String>,
    pub options: ProbeOptions,
    pub insecure: bool,
    pub dns_hosts: Vec<String>,
}

/// Where to look for the YAML file, and whether it has to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub required: bool,
}

impl ConfigSource {
    /// An explicitly named file must exist; the default one may be absent.
    pub fn locate(explicit: Option<PathBuf>) -> Self {
        match explicit.or_else(|| env::var("CONFIG_FILE").ok().map(PathBuf::from)) {
            Some(path) => ConfigSource {
                path,
                required: true,
            },
            None => ConfigSource {
                path: PathBuf::from(DEFAULT_CONFIG_FILE),
                required: false,
            },
        }
    }
}

/// Load the probe configuration.
/// Layers, lowest precedence first: the YAML file named by `--config` or the
/// `CONFIG_FILE` environment variable (default `wsprobe.yml`), the
/// `WSPROBE_URL`, `WSPROBE_TIMEOUT_MS`, `WSPROBE_GRACE_MS`,
/// `WSPROBE_SETTLE_MS` and `DNS_HOSTS` environment variables, and finally the command line layer `cli`.
pub fn load_config(source: &ConfigSource, cli: ProbeConfig) -> Result<AppConfig, ConfigError> {
    let file = read_config_file(&source.path, source.required)?;
    let env_layer = env_config()?;

    let merged = file.merge(env_layer).merge(cli);
    let config = AppConfig::try_from(merged)?;

    log::info!(
        "Probing {} with {} message(s), timeout {:?}",
        config.endpoint,
        config.messages.len(),
        config.options.timeout
    );
    if !config.dns_hosts.is_empty() {
        log::info!("Using DNS hosts: {:?}", config.dns_hosts);
    }

    Ok(config)
}

/// Read a YAML config file. A missing file that is not `required` yields an
/// empty layer.
pub fn read_config_file(path: &Path, required: bool) -> Result<ProbeConfig, ConfigError> {
    let config_str = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound && !required => {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(ProbeConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if config_str.trim().is_empty() {
        return Ok(ProbeConfig::default());
    }

    serde_yaml::from_str(&config_str).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_config() -> Result<ProbeConfig, ConfigError> {
    Ok(ProbeConfig {
        url: env::var("WSPROBE_URL").ok(),
        timeout_ms: parse_millis("WSPROBE_TIMEOUT_MS", env::var("WSPROBE_TIMEOUT_MS").ok())?,
        grace_ms: parse_millis("WSPROBE_GRACE_MS", env::var("WSPROBE_GRACE_MS").ok())?,
        settle_ms: parse_millis("WSPROBE_SETTLE_MS", env::var("WSPROBE_SETTLE_MS").ok())?,
        dns_hosts: env::var("DNS_HOSTS").ok().map(|hosts| split_hosts(&hosts)),
        ..Default::default()
    })
}

fn parse_millis(name: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber { name, value: v })
        })
        .transpose()
}

fn split_hosts(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl TryFrom<ProbeConfig> for AppConfig {
    type Error = ConfigError;

    fn try_from(config: ProbeConfig) -> Result<Self, Self::Error> {
        let endpoint = match (&config.url, &config.host) {
            (Some(url), host) => {
                if host.is_some() {
                    log::warn!("Both url and host are configured, using url {url}");
                }
                Endpoint::parse(url)?
            }
            (None, Some(host)) => {
                let scheme = config.scheme.unwrap_or(Scheme::Ws);
                let port = config.port.unwrap_or_else(|| scheme.default_port());
                let endpoint = Endpoint::new(scheme, host, port)?;
                match &config.path {
                    Some(path) => endpoint.with_path(path),
                    None => endpoint,
                }
            }
            (None, None) => Endpoint::parse(DEFAULT_URL)?,
        };

        let timeout_ms = config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let timeout = Duration::from_millis(timeout_ms);
        let grace = config.grace_ms.map_or(DEFAULT_GRACE, Duration::from_millis);
        if grace > timeout {
            log::warn!("Grace window {grace:?} is longer than the timeout, using {timeout:?}");
        }

        Ok(AppConfig {
            endpoint,
            messages: config.messages.unwrap_or_else(default_messages),
            options: ProbeOptions {
                timeout,
                grace: grace.min(timeout),
                settle: config.settle_ms.map(Duration::from_millis),
            },
            insecure: config.insecure.unwrap_or(false),
            dns_hosts: config.dns_hosts.unwrap_or_default(),
        })
    }
}

/// Setup the TLS connector used for `wss` endpoints. Certificates are
/// checked against the platform trust store unless `insecure` is set.
pub fn setup_tls_connector(insecure: bool) -> Result<native_tls::TlsConnector, ConfigError> {
    let mut builder = native_tls::TlsConnector::builder();
    if insecure {
        log::warn!("TLS certificate validation is disabled");
        builder.danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}

/// Setup a DNS resolver.
/// With explicit DNS hosts the resolver queries them over TCP with 2
/// attempts, a 100 millisecond timeout and a cache of 1024 entries.
/// Without, the system configuration is used, falling back to the resolver
/// defaults when it cannot be read.
pub fn setup_resolver(dns_hosts: &[String]) -> Result<TokioAsyncResolver, ConfigError> {
    if dns_hosts.is_empty() {
        return Ok(TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            log::warn!("Cannot read system DNS configuration ({e}), using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        }));
    }

    let mut opts = ResolverOpts::default();
    opts.attempts = 2;
    opts.timeout = Duration::from_millis(100);
    opts.cache_size = 1024;

    let mut name_servers = NameServerConfigGroup::new();

    for host in dns_hosts {
        let ip: IpAddr = host.parse().map_err(|source| ConfigError::InvalidDnsHost {
            host: host.clone(),
            source,
        })?;
        name_servers.push(NameServerConfig {
            socket_addr: (ip, 53).into(),
            protocol: Protocol::Tcp,
            tls_dns_name: None,
            trust_negative_responses: false,
            bind_addr: None,
        });
    }

    let resolver_config = ResolverConfig::from_parts(None, vec![], name_servers);
    Ok(TokioAsyncResolver::tokio(resolver_config, opts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("wsprobe-{}-{name}.yml", std::process::id()));
        std::fs::write(&path, contents).expect("write temp config");
        path
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::try_from(ProbeConfig::default()).expect("defaults are valid");
        assert_eq!(config.endpoint.url(), "ws://0.0.0.0:3333/");
        assert_eq!(config.messages, default_messages());
        assert_eq!(config.options.timeout, Duration::from_secs(5));
        assert_eq!(config.options.grace, DEFAULT_GRACE);
        assert_eq!(config.options.settle, None);
        assert!(!config.insecure);
        assert!(config.dns_hosts.is_empty());
    }

    #[test]
    fn test_endpoint_from_parts() {
        let config = AppConfig::try_from(ProbeConfig {
            scheme: Some(Scheme::Wss),
            host: Some("example.com".to_string()),
            path: Some("socket".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.endpoint.url(), "wss://example.com:443/socket");
    }

    #[test]
    fn test_url_wins_over_parts() {
        let config = AppConfig::try_from(ProbeConfig {
            url: Some("ws://127.0.0.1:9000".to_string()),
            host: Some("example.com".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.endpoint.host(), "127.0.0.1");
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let err = AppConfig::try_from(ProbeConfig {
            timeout_ms: Some(0),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_grace_longer_than_timeout_is_clamped() {
        let config = AppConfig::try_from(ProbeConfig {
            timeout_ms: Some(40),
            grace_ms: Some(500),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.options.grace, Duration::from_millis(40));

        let config = AppConfig::try_from(ProbeConfig {
            grace_ms: Some(0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.options.grace, Duration::ZERO);
    }

    #[test]
    fn test_bad_url_is_rejected() {
        let err = AppConfig::try_from(ProbeConfig {
            url: Some("https://example.com".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Endpoint(EndpointError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_empty_message_list_is_kept() {
        let config = AppConfig::try_from(ProbeConfig {
            messages: Some(vec![]),
            ..Default::default()
        })
        .unwrap();
        assert!(config.messages.is_empty());
    }

    #[test]
    fn test_missing_optional_file_is_empty_layer() {
        let path = env::temp_dir().join("wsprobe-does-not-exist.yml");
        let config = read_config_file(&path, false).expect("optional file");
        assert_eq!(config, ProbeConfig::default());
    }

    #[test]
    fn test_missing_required_file_is_an_error() {
        let path = env::temp_dir().join("wsprobe-does-not-exist-either.yml");
        let err = read_config_file(&path, true).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_reads_yaml_file() {
        let path = temp_config("valid", "url: ws://127.0.0.1:4000\ntimeout_ms: 750\n");
        let config = read_config_file(&path, true).expect("valid file");
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.url.as_deref(), Some("ws://127.0.0.1:4000"));
        assert_eq!(config.timeout_ms, Some(750));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let path = temp_config("invalid", "timeout_ms: [not, a, number]\n");
        let err = read_config_file(&path, true).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("T", Some(" 250 ".to_string())).unwrap(), Some(250));
        assert_eq!(parse_millis("T", None).unwrap(), None);
        assert!(matches!(
            parse_millis("T", Some("5s".to_string())),
            Err(ConfigError::InvalidNumber { name: "T", .. })
        ));
    }

    #[test]
    fn test_split_hosts() {
        assert_eq!(
            split_hosts("1.1.1.1, 8.8.8.8,"),
            vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
        );
    }

    #[test]
    fn test_setup_tls_connector() {
        assert!(setup_tls_connector(false).is_ok());
        assert!(setup_tls_connector(true).is_ok());
    }

    #[tokio::test]
    async fn test_setup_resolver_rejects_bad_host() {
        let err = setup_resolver(&["not-an-ip".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDnsHost { .. }));
        assert!(setup_resolver(&["1.1.1.1".to_string()]).is_ok());
        assert!(setup_resolver(&[]).is_ok());
    }
}
