//! Host configuration.
//!
//! Plain structs with sensible defaults. The `microbase-host` binary fills
//! them from [`HostArgs`] (command line with `MICROBASE_*` environment
//! fallbacks); embedders can build them directly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, ValueEnum};

/// Request body cap applied when none is configured (2 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Top-level configuration for one service host.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Identity and routing of the hosted service.
    pub service: ServiceConfig,
    /// Gateway used for operations not hosted locally.
    pub gateway: GatewayConfig,
    /// Token verification settings.
    pub auth: AuthConfig,
    /// Listener settings.
    pub network: NetworkConfig,
    /// Module table: configuration key -> module name in the catalog.
    pub modules: BTreeMap<String, String>,
}

/// How operation routes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RouteStyle {
    /// Method and path come from the operation definition (method defaults to POST).
    #[default]
    Rest,
    /// Every operation is `POST base/service/version/operation`.
    Rpc,
}

impl FromStr for RouteStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REST" => Ok(Self::Rest),
            "RPC" => Ok(Self::Rpc),
            other => Err(format!("unknown route style `{other}`, expected REST or RPC")),
        }
    }
}

impl fmt::Display for RouteStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rest => f.write_str("REST"),
            Self::Rpc => f.write_str("RPC"),
        }
    }
}

/// Identity of the hosted service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
    /// Base path of every local operation route.
    pub path: String,
    pub style: RouteStyle,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "service".to_string(),
            version: microbase_core::DEFAULT_VERSION.to_string(),
            path: "/api".to_string(),
            style: RouteStyle::Rest,
        }
    }
}

/// Location of the shared gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Base path the gateway expects in front of `service/version/operation`.
    pub path: String,
}

impl GatewayConfig {
    /// `http://host:port`, the prefix of every remote call URL.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            path: "/api".to_string(),
        }
    }
}

/// Token verification settings.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Scope required by operations that do not declare their own.
    pub default_scope: Vec<String>,
    /// HS256 signing key. Required when any operation is protected and no
    /// custom verifier is installed.
    pub signing_key: Option<String>,
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Largest accepted request body, in bytes.
    pub max_body_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Command line of the `microbase-host` binary.
#[derive(Debug, Parser)]
#[command(name = "microbase-host", about = "Hosts microbase operations over HTTP")]
pub struct HostArgs {
    #[command(flatten)]
    pub service: ServiceArgs,

    #[command(flatten)]
    pub gateway: GatewayArgs,

    #[command(flatten)]
    pub auth: AuthArgs,

    #[command(flatten)]
    pub network: NetworkArgs,

    /// Operation module to load, as `key=module-name`. Repeatable.
    #[arg(long = "module", value_parser = parse_module_entry)]
    pub modules: Vec<(String, String)>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "MICROBASE_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Args)]
pub struct ServiceArgs {
    #[arg(id = "service_name", long = "service-name", env = "MICROBASE_SERVICE_NAME", default_value = "service")]
    pub name: String,

    #[arg(id = "service_version", long = "service-version", env = "MICROBASE_SERVICE_VERSION", default_value = "v1")]
    pub version: String,

    #[arg(id = "service_path", long = "service-path", env = "MICROBASE_SERVICE_PATH", default_value = "/api")]
    pub path: String,

    #[arg(
        id = "service_style",
        long = "style",
        env = "MICROBASE_SERVICE_STYLE",
        value_enum,
        ignore_case = true,
        default_value_t = RouteStyle::Rest
    )]
    pub style: RouteStyle,
}

#[derive(Debug, Args)]
pub struct GatewayArgs {
    #[arg(id = "gateway_host", long = "gateway-host", env = "MICROBASE_GATEWAY_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(id = "gateway_port", long = "gateway-port", env = "MICROBASE_GATEWAY_PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(id = "gateway_path", long = "gateway-path", env = "MICROBASE_GATEWAY_PATH", default_value = "/api")]
    pub path: String,
}

#[derive(Debug, Args)]
pub struct AuthArgs {
    /// Default scope of protected operations. Repeatable.
    #[arg(id = "auth_scope", long = "auth-scope", env = "MICROBASE_AUTH_SCOPE", value_delimiter = ',')]
    pub scope: Vec<String>,

    #[arg(long = "token-secret", env = "MICROBASE_TOKEN_SECRET", hide_env_values = true)]
    pub signing_key: Option<String>,
}

#[derive(Debug, Args)]
pub struct NetworkArgs {
    #[arg(id = "bind_host", long = "host", env = "MICROBASE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(id = "bind_port", long = "port", env = "MICROBASE_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long = "cors-origin", env = "MICROBASE_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    #[arg(long = "request-timeout-secs", env = "MICROBASE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Largest accepted request body, in bytes. Larger bodies get 413.
    #[arg(long = "max-body-bytes", env = "MICROBASE_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_SIZE)]
    pub max_body_size: usize,
}

fn parse_module_entry(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, name)) if !key.is_empty() && !name.is_empty() => {
            Ok((key.to_string(), name.to_string()))
        }
        _ => Err(format!("expected `key=module-name`, got `{raw}`")),
    }
}

impl From<HostArgs> for HostConfig {
    fn from(args: HostArgs) -> Self {
        Self {
            service: ServiceConfig {
                name: args.service.name,
                version: args.service.version,
                path: args.service.path,
                style: args.service.style,
            },
            gateway: GatewayConfig {
                host: args.gateway.host,
                port: args.gateway.port,
                path: args.gateway.path,
            },
            auth: AuthConfig {
                default_scope: args.auth.scope,
                signing_key: args.auth.signing_key,
            },
            network: NetworkConfig {
                host: args.network.host,
                port: args.network.port,
                cors_origins: args.network.cors_origins,
                request_timeout: Duration::from_secs(args.network.request_timeout_secs),
                max_body_size: args.network.max_body_size,
            },
            modules: args.modules.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_config_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.service.version, "v1");
        assert_eq!(config.service.style, RouteStyle::Rest);
        assert_eq!(config.gateway.base_url(), "http://localhost:8000");
        assert!(config.auth.signing_key.is_none());
        assert!(config.modules.is_empty());
    }

    #[test]
    fn network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 0);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_size, DEFAULT_MAX_BODY_SIZE);
    }

    #[test]
    fn route_style_parses_case_insensitively() {
        assert_eq!("REST".parse::<RouteStyle>(), Ok(RouteStyle::Rest));
        assert_eq!("rpc".parse::<RouteStyle>(), Ok(RouteStyle::Rpc));
        assert!("soap".parse::<RouteStyle>().is_err());
        assert_eq!(RouteStyle::Rpc.to_string(), "RPC");
    }

    #[test]
    fn args_map_onto_config() {
        let args = HostArgs::try_parse_from([
            "microbase-host",
            "--service-name",
            "orders",
            "--service-version",
            "v2",
            "--style",
            "RPC",
            "--gateway-host",
            "gw.internal",
            "--gateway-port",
            "9000",
            "--gateway-path",
            "/gw",
            "--service-path",
            "/svc",
            "--host",
            "127.0.0.1",
            "--port",
            "9100",
            "--max-body-bytes",
            "4096",
            "--auth-scope",
            "user,admin",
            "--module",
            "orders=orders-module",
        ])
        .unwrap();

        let config = HostConfig::from(args);
        assert_eq!(config.service.name, "orders");
        assert_eq!(config.service.version, "v2");
        assert_eq!(config.service.style, RouteStyle::Rpc);
        assert_eq!(config.gateway.base_url(), "http://gw.internal:9000");
        assert_eq!(config.gateway.path, "/gw");
        assert_eq!(config.service.path, "/svc");
        assert_eq!(config.network.host, "127.0.0.1");
        assert_eq!(config.network.port, 9100);
        assert_eq!(config.network.max_body_size, 4096);
        assert_eq!(config.auth.default_scope, vec!["user", "admin"]);
        assert_eq!(
            config.modules.get("orders").map(String::as_str),
            Some("orders-module")
        );
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        HostArgs::command().debug_assert();
    }

    #[test]
    fn defaults_keep_gateway_and_bind_address_apart() {
        let config = HostConfig::from(HostArgs::try_parse_from(["microbase-host"]).unwrap());
        assert_eq!(config.gateway.host, "localhost");
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.gateway.path, "/api");
        assert_eq!(config.service.path, "/api");
        assert_eq!(config.network.host, "0.0.0.0");
        assert_eq!(config.network.port, 8080);
    }

    #[test]
    fn module_entry_requires_key_and_name() {
        assert!(parse_module_entry("orders").is_err());
        assert!(parse_module_entry("=x").is_err());
        assert_eq!(
            parse_module_entry("a=b"),
            Ok(("a".to_string(), "b".to_string()))
        );
    }
}
