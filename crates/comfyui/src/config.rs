//! Client configuration.
//!
//! [`ClientConfig`] is the per-instance session description: which
//! ComfyUI server to talk to, which `client_id` to present, and how long
//! to wait for the WebSocket handshake. Nothing here is global; build one
//! config per client.

use std::net::IpAddr;
use std::time::Duration;

/// Address used when `COMFYUI_SERVER` is not set.
pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8188";

/// Default WebSocket handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Transport security for both the HTTP API and the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `http://` + `ws://`
    Plain,
    /// `https://` + `wss://`
    Secure,
}

impl Scheme {
    /// Pick a scheme from the shape of a server address.
    ///
    /// Local-looking addresses (`localhost`, IP literals) are assumed to
    /// serve plaintext; anything with a hostname gets TLS.
    pub fn for_address(address: &str) -> Self {
        if is_local_address(address) {
            Scheme::Plain
        } else {
            Scheme::Secure
        }
    }

    pub fn http(self) -> &'static str {
        match self {
            Scheme::Plain => "http",
            Scheme::Secure => "https",
        }
    }

    pub fn ws(self) -> &'static str {
        match self {
            Scheme::Plain => "ws",
            Scheme::Secure => "wss",
        }
    }
}

/// Returns `true` when `address` names `localhost` or an IP literal.
///
/// Accepts `host`, `host:port`, `[v6]:port` and bare IPv6 forms.
pub fn is_local_address(address: &str) -> bool {
    let host = host_part(address).to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok()
}

fn host_part(address: &str) -> &str {
    let authority = address.split('/').next().unwrap_or(address);
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => authority,
    }
}

/// Configuration for one [`ComfyUIClient`](crate::ComfyUIClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host[:port]` of the ComfyUI server, without a scheme.
    pub server_address: String,
    /// Opaque session id sent as `clientId` on the WebSocket and as
    /// `client_id` on prompt submission. Must be unique per concurrent
    /// user or event frames will cross-talk.
    pub client_id: String,
    /// Explicit scheme. `None` derives it from `server_address`.
    pub scheme: Option<Scheme>,
    /// How long [`connect`](crate::ComfyUIClient::connect) waits for the
    /// handshake.
    pub connect_timeout: Duration,
    /// Overrides the derived HTTP base URL (e.g. `http://host:8188`).
    pub api_url: Option<String>,
    /// Overrides the derived WebSocket base URL (e.g. `ws://host:8188`).
    pub ws_url: Option<String>,
}

impl ClientConfig {
    /// Create a config for `server_address`.
    ///
    /// A leading `http://`, `https://`, `ws://` or `wss://` is stripped
    /// and pins the scheme.
    pub fn new(server_address: impl Into<String>, client_id: impl Into<String>) -> Self {
        let raw = server_address.into();
        let (scheme, address) = split_scheme(&raw);

        Self {
            server_address: address.trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            scheme,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            api_url: None,
            ws_url: None,
        }
    }

    /// Same as [`new`](Self::new) with a freshly generated UUID v4 client id.
    pub fn with_random_client_id(server_address: impl Into<String>) -> Self {
        Self::new(server_address, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                        | Default              |
    /// |--------------------------------|----------------------|
    /// | `COMFYUI_SERVER`               | `127.0.0.1:8188`     |
    /// | `COMFYUI_CLIENT_ID`            | random UUID v4       |
    /// | `COMFYUI_SECURE`               | derived from address |
    /// | `COMFYUI_CONNECT_TIMEOUT_SECS` | `20`                 |
    /// | `COMFYUI_API_URL`              | derived              |
    /// | `COMFYUI_WS_URL`               | derived              |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server = lookup("COMFYUI_SERVER").unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.into());

        let mut config = match lookup("COMFYUI_CLIENT_ID") {
            Some(client_id) if !client_id.trim().is_empty() => Self::new(server, client_id),
            _ => Self::with_random_client_id(server),
        };

        if let Some(value) = lookup("COMFYUI_SECURE") {
            let scheme = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Scheme::Secure,
                "0" | "false" | "no" => Scheme::Plain,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "COMFYUI_SECURE",
                        value,
                    })
                }
            };
            config.scheme = Some(scheme);
        }

        if let Some(value) = lookup("COMFYUI_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "COMFYUI_CONNECT_TIMEOUT_SECS",
                value: value.clone(),
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }

        config.api_url = lookup("COMFYUI_API_URL");
        config.ws_url = lookup("COMFYUI_WS_URL");

        Ok(config)
    }

    /// The scheme in effect: the explicit one, or one derived from the address.
    pub fn resolved_scheme(&self) -> Scheme {
        self.scheme
            .unwrap_or_else(|| Scheme::for_address(&self.server_address))
    }

    /// HTTP base URL without a trailing slash.
    pub fn api_url(&self) -> String {
        match &self.api_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}://{}", self.resolved_scheme().http(), self.server_address),
        }
    }

    /// WebSocket base URL without a trailing slash.
    pub fn ws_url(&self) -> String {
        match &self.ws_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}://{}", self.resolved_scheme().ws(), self.server_address),
        }
    }

    /// Full event channel URL: `{ws_url}/ws?clientId={client_id}`.
    pub fn event_stream_url(&self) -> Result<reqwest::Url, ConfigError> {
        let base = format!("{}/ws", self.ws_url());
        let mut url =
            reqwest::Url::parse(&base).map_err(|e| ConfigError::InvalidUrl(format!("{base}: {e}")))?;
        url.query_pairs_mut().append_pair("clientId", &self.client_id);
        Ok(url)
    }
}

fn split_scheme(raw: &str) -> (Option<Scheme>, &str) {
    for (prefix, scheme) in [
        ("https://", Scheme::Secure),
        ("wss://", Scheme::Secure),
        ("http://", Scheme::Plain),
        ("ws://", Scheme::Plain),
    ] {
        if let Some(rest) = raw.strip_prefix(prefix) {
            return (Some(scheme), rest);
        }
    }
    (None, raw)
}

/// Errors raised while building a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn local_addresses_use_plaintext() {
        for address in ["localhost:8188", "127.0.0.1:8188", "192.168.1.20", "[::1]:8188", "::1"] {
            assert_eq!(Scheme::for_address(address), Scheme::Plain, "{address}");
        }
    }

    #[test]
    fn hostnames_use_tls() {
        for address in ["comfy.example.com", "gpu-box.tail1234.ts.net:443", "localhost.example.com"] {
            assert_eq!(Scheme::for_address(address), Scheme::Secure, "{address}");
        }
    }

    #[test]
    fn explicit_prefix_pins_scheme() {
        let config = ClientConfig::new("https://10.0.0.5:8188/", "c1");
        assert_eq!(config.server_address, "10.0.0.5:8188");
        assert_eq!(config.resolved_scheme(), Scheme::Secure);
        assert_eq!(config.api_url(), "https://10.0.0.5:8188");
        assert_eq!(config.ws_url(), "wss://10.0.0.5:8188");
    }

    #[test]
    fn event_stream_url_carries_client_id() {
        let config = ClientConfig::new("localhost:8188", "abc-123");
        let url = config.event_stream_url().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8188/ws?clientId=abc-123");
    }

    #[test]
    fn url_overrides_win() {
        let config = ClientConfig::new("comfy.example.com", "c1")
            .with_api_url("http://127.0.0.1:9000/")
            .with_ws_url("ws://127.0.0.1:9001");
        assert_eq!(config.api_url(), "http://127.0.0.1:9000");
        assert_eq!(
            config.event_stream_url().unwrap().as_str(),
            "ws://127.0.0.1:9001/ws?clientId=c1"
        );
    }

    #[test]
    fn from_lookup_uses_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.server_address, DEFAULT_SERVER_ADDRESS);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert!(uuid::Uuid::parse_str(&config.client_id).is_ok());
        assert_eq!(config.resolved_scheme(), Scheme::Plain);
    }

    #[test]
    fn from_lookup_reads_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("COMFYUI_SERVER", "gpu.internal:8188"),
            ("COMFYUI_CLIENT_ID", "worker-7"),
            ("COMFYUI_SECURE", "false"),
            ("COMFYUI_CONNECT_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.client_id, "worker-7");
        assert_eq!(config.resolved_scheme(), Scheme::Plain);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.api_url(), "http://gpu.internal:8188");
    }

    #[test]
    fn from_lookup_rejects_bad_values() {
        let err = ClientConfig::from_lookup(lookup_from(&[("COMFYUI_SECURE", "maybe")]));
        assert_matches!(err, Err(ConfigError::Invalid { var: "COMFYUI_SECURE", .. }));

        let err = ClientConfig::from_lookup(lookup_from(&[("COMFYUI_CONNECT_TIMEOUT_SECS", "soon")]));
        assert_matches!(err, Err(ConfigError::Invalid { var: "COMFYUI_CONNECT_TIMEOUT_SECS", .. }));
    }
}
