//! Endpoint and data directory configuration for the embedded etcd node.

use crate::error::{Error, Result};

use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

use url::{Host, Url};

/// Name under which the etcd configuration is composed by the orchestrator.
pub const ETCD_NAME: &str = "etcd";

/// Member name etcd uses until one is assigned.
pub const DEFAULT_NAME: &str = "default";

/// Port etcd serves clients on.
pub const DEFAULT_CLIENT_PORT: u16 = 2379;

/// Port etcd uses for peer (raft) traffic.
pub const DEFAULT_PEER_PORT: u16 = 2380;

static DEFAULT_LISTEN_PEER_URL: &str = "http://0.0.0.0:2380";
static DEFAULT_ADVERTISE_PEER_URL: &str = "http://127.0.0.1:2380";
static DEFAULT_LISTEN_CLIENT_URL: &str = "http://0.0.0.0:2379";

/// Options for building an `EtcdConfig`.
#[derive(Clone, Debug)]
pub struct EtcdConfigOptions {
    /// The directory etcd persists its state to. Created by the engine if missing.
    pub data_dir: PathBuf,

    /// The IP or hostname clients should use to reach this node.
    pub host_address: String,
}

/// Configuration handed to the etcd engine.
///
/// Every endpoint has been parsed by the time a value of this type exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EtcdConfig {
    advertise_client_urls: Vec<Url>,
    advertise_peer_urls: Vec<Url>,
    data_dir: PathBuf,
    listen_client_urls: Vec<Url>,
    listen_peer_urls: Vec<Url>,
    name: String,
}

impl EtcdConfig {
    /// Derives the endpoints for a node reachable at `host_address`.
    ///
    /// Peer and client listeners bind all interfaces, peers are advertised on
    /// loopback, and clients are told to use `http://<host_address>:2379`.
    /// Host names are normalised the way URLs normalise them, so they come out
    /// in lower case.
    ///
    /// # Errors
    ///
    /// Returns an error if the host address is blank, is not a valid host (for
    /// example it carries a path, query or user info), or any derived endpoint
    /// fails to parse.
    pub fn new(
        EtcdConfigOptions {
            data_dir,
            host_address,
        }: EtcdConfigOptions,
    ) -> Result<Self> {
        let host = host_address.trim();
        if host.is_empty() {
            return Err(Error::EmptyHostAddress);
        }

        // Parsing the host on its own stops `/`, `?`, `#` or `@` in the input
        // from moving the port into another part of the URL.
        let host = Host::parse(&bracket_ipv6(host)).map_err(|source| Error::InvalidEndpoint {
            endpoint: host.to_string(),
            source,
        })?;

        let advertise_client_url = format!("http://{host}:{DEFAULT_CLIENT_PORT}");

        Ok(Self {
            advertise_client_urls: vec![parse_endpoint(&advertise_client_url)?],
            advertise_peer_urls: vec![parse_endpoint(DEFAULT_ADVERTISE_PEER_URL)?],
            data_dir,
            listen_client_urls: vec![parse_endpoint(DEFAULT_LISTEN_CLIENT_URL)?],
            listen_peer_urls: vec![parse_endpoint(DEFAULT_LISTEN_PEER_URL)?],
            name: DEFAULT_NAME.to_string(),
        })
    }

    /// The component key this configuration is registered under.
    #[must_use]
    pub const fn component_name() -> &'static str {
        ETCD_NAME
    }

    /// URLs advertised to clients.
    #[must_use]
    pub fn advertise_client_urls(&self) -> &[Url] {
        &self.advertise_client_urls
    }

    /// URLs advertised to peers.
    #[must_use]
    pub fn advertise_peer_urls(&self) -> &[Url] {
        &self.advertise_peer_urls
    }

    /// Where etcd keeps its state.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// URLs etcd listens on for clients.
    #[must_use]
    pub fn listen_client_urls(&self) -> &[Url] {
        &self.listen_client_urls
    }

    /// URLs etcd listens on for peers.
    #[must_use]
    pub fn listen_peer_urls(&self) -> &[Url] {
        &self.listen_peer_urls
    }

    /// The member name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy of this configuration with one setting replaced.
    ///
    /// Keys follow etcd's flag names: `name`, `data-dir`, `listen-peer-urls`,
    /// `initial-advertise-peer-urls`, `listen-client-urls` and
    /// `advertise-client-urls`. URL lists are comma separated.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown keys or endpoints that fail to parse.
    pub fn with_override(mut self, key: &str, value: &str) -> Result<Self> {
        match key {
            "name" => self.name = value.to_string(),
            "data-dir" => self.data_dir = PathBuf::from(value),
            "listen-peer-urls" => self.listen_peer_urls = parse_endpoints(value)?,
            "initial-advertise-peer-urls" => self.advertise_peer_urls = parse_endpoints(value)?,
            "listen-client-urls" => self.listen_client_urls = parse_endpoints(value)?,
            "advertise-client-urls" => self.advertise_client_urls = parse_endpoints(value)?,
            _ => return Err(Error::UnknownOverride(key.to_string())),
        }

        Ok(self)
    }
}

/// Renders an endpoint the way etcd expects it on the command line.
#[must_use]
pub fn format_endpoint(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();

    url.port().map_or_else(
        || format!("{}://{}", url.scheme(), host),
        |port| format!("{}://{}:{}", url.scheme(), host, port),
    )
}

/// Renders a list of endpoints as a single comma separated flag value.
#[must_use]
pub fn format_endpoints(urls: &[Url]) -> String {
    urls.iter()
        .map(format_endpoint)
        .collect::<Vec<_>>()
        .join(",")
}

fn bracket_ipv6(host: &str) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|source| Error::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source,
    })?;

    // Non-hierarchical URLs such as `localhost:2379` parse, but have no host.
    if url.host_str().is_none() {
        return Err(Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source: url::ParseError::EmptyHost,
        });
    }

    // etcd only takes scheme, host and port.
    let extra = if !url.username().is_empty() || url.password().is_some() {
        Some("user info")
    } else if !matches!(url.path(), "" | "/") {
        Some("path")
    } else if url.query().is_some() {
        Some("query")
    } else if url.fragment().is_some() {
        Some("fragment")
    } else {
        None
    };

    if let Some(part) = extra {
        return Err(Error::EndpointNotBare {
            endpoint: endpoint.to_string(),
            part,
        });
    }

    Ok(url)
}

fn parse_endpoints(endpoints: &str) -> Result<Vec<Url>> {
    endpoints
        .split(',')
        .map(|endpoint| parse_endpoint(endpoint.trim()))
        .collect()
}
