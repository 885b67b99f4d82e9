use serde::Deserialize;

use crate::ws_probe::endpoint::Scheme;

pub const DEFAULT_URL: &str = "ws://0.0.0.0:3333";
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// One layer of probe configuration, as read from the YAML file, the
/// environment or the command line. Every field is optional so layers can
/// be stacked; see [`ProbeConfig::merge`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProbeConfig {
    /// Full endpoint URL, e.g. `wss://example.com/socket`.
    /// Takes precedence over `scheme`, `host`, `port` and `path`.
    pub url: Option<String>,

    pub scheme: Option<Scheme>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,

    /// Maximum lifetime of the probe in milliseconds.
    pub timeout_ms: Option<u64>,

    /// How long to listen after the handshake before the first send.
    /// Clamped to the timeout.
    pub grace_ms: Option<u64>,

    /// Quiet period after the last send after which the probe closes the
    /// connection itself. Unset means wait for the server to close.
    pub settle_ms: Option<u64>,

    /// Text messages sent in order once the connection is open.
    pub messages: Option<Vec<String>>,

    /// Accept invalid TLS certificates.
    pub insecure: Option<bool>,

    /// DNS servers to resolve the host with. The system configuration is
    /// used when empty.
    pub dns_hosts: Option<Vec<String>>,
}

impl ProbeConfig {
    /// Stack `other` on top of `self`: every field set in `other` wins.
    pub fn merge(self, other: ProbeConfig) -> ProbeConfig {
        ProbeConfig {
            url: other.url.or(self.url),
            scheme: other.scheme.or(self.scheme),
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            path: other.path.or(self.path),
            timeout_ms: other.timeout_ms.or(self.timeout_ms),
            grace_ms: other.grace_ms.or(self.grace_ms),
            settle_ms: other.settle_ms.or(self.settle_ms),
            messages: other.messages.or(self.messages),
            insecure: other.insecure.or(self.insecure),
            dns_hosts: other.dns_hosts.or(self.dns_hosts),
        }
    }
}

/// Messages sent when none are configured.
pub fn default_messages() -> Vec<String> {
    ["hello zig", "hello zig again", "What I'm doing?", "testing the inputs!"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn test_default_messages() {
        let messages = default_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], "hello zig");
        assert_eq!(messages[3], "testing the inputs!");
    }

    #[test]
    fn test_probe_config_deserialization() {
        let yaml = r#"
                    url: wss://echo.example.com/socket
                    timeout_ms: 2500
                    grace_ms: 50
                    settle_ms: 300
                    insecure: true
                    dns_hosts: ["1.1.1.1", "8.8.8.8"]
                    messages:
                        - hello zig
                        - testing the inputs!
                                    "#;

        let config: ProbeConfig = serde_yaml::from_str(yaml).expect("Invalid YAML");
        assert_eq!(config.url.as_deref(), Some("wss://echo.example.com/socket"));
        assert_eq!(config.timeout_ms, Some(2500));
        assert_eq!(config.grace_ms, Some(50));
        assert_eq!(config.settle_ms, Some(300));
        assert_eq!(config.insecure, Some(true));
        assert_eq!(
            config.dns_hosts,
            Some(vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()])
        );
        assert_eq!(
            config.messages,
            Some(vec!["hello zig".to_string(), "testing the inputs!".to_string()])
        );
    }

    #[test]
    fn test_probe_config_from_parts() {
        let yaml = r#"
                    scheme: ws
                    host: 0.0.0.0
                    port: 3333
                                    "#;

        let config: ProbeConfig = serde_yaml::from_str(yaml).expect("Invalid YAML");
        assert_eq!(config.scheme, Some(Scheme::Ws));
        assert_eq!(config.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.port, Some(3333));
        assert_eq!(config.url, None);
        assert_eq!(config.messages, None);
    }

    #[test]
    fn test_rejects_out_of_range_port() {
        let yaml = "host: localhost\nport: 70000\n";
        assert!(serde_yaml::from_str::<ProbeConfig>(yaml).is_err());
    }

    #[test]
    fn test_merge_prefers_upper_layer() {
        let file = ProbeConfig {
            url: Some("ws://file:1".to_string()),
            timeout_ms: Some(1000),
            messages: Some(vec!["from file".to_string()]),
            ..Default::default()
        };
        let cli = ProbeConfig {
            timeout_ms: Some(250),
            ..Default::default()
        };

        let merged = file.merge(cli);
        assert_eq!(merged.url.as_deref(), Some("ws://file:1"));
        assert_eq!(merged.timeout_ms, Some(250));
        assert_eq!(merged.messages, Some(vec!["from file".to_string()]));
    }
}
