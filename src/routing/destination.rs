/// Parsing of the `destinations` configuration value.
///
/// A value containing `://` is a URI referencing the metadata cache; anything
/// else is a comma-separated list of literal backend addresses. The two forms
/// resolve to the two variants of `DestinationSpec`, which is what the
/// dispatcher consumes at run time.
use std::fmt;

use url::Url;

use crate::error::ConfigError;
use crate::utils::split_host_port;

pub const DEFAULT_DESTINATION_PORT: u16 = 3306;

/// One literal backend address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpDestination {
    pub host: String,
    pub port: u16,
}

impl TcpDestination {
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port >= 1
    }
}

impl fmt::Display for TcpDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationSpec {
    /// Backends come from the metadata cache. `target` names the replica set
    /// (or group) to serve; `cache_ref` is the URI authority, kept for
    /// display.
    MetadataCache {
        scheme: String,
        command: String,
        target: String,
        cache_ref: String,
    },
    /// A fixed, ordered backend list.
    AddressList { addresses: Vec<TcpDestination> },
}

impl fmt::Display for DestinationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationSpec::MetadataCache {
                scheme,
                command,
                target,
                cache_ref,
            } => write!(f, "{scheme}://{cache_ref}/{command}/{target}"),
            DestinationSpec::AddressList { addresses } => {
                let rendered: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
                f.write_str(&rendered.join(","))
            }
        }
    }
}

pub fn parse_destinations(value: &str) -> Result<DestinationSpec, ConfigError> {
    let value = value.trim();
    if value.contains("://") {
        parse_uri(value)
    } else {
        parse_address_list(value)
    }
}

fn parse_uri(value: &str) -> Result<DestinationSpec, ConfigError> {
    let uri = Url::parse(value)
        .map_err(|err| ConfigError::Invalid(format!("invalid URI '{value}': {err}")))?;

    let mut segments = uri.path_segments().into_iter().flatten();
    let command = segments.next().unwrap_or("").to_ascii_lowercase();
    let target = segments.next().unwrap_or("").to_string();

    match uri.scheme() {
        "fabric+cache" => {
            if command != "group" {
                return Err(ConfigError::Invalid(format!(
                    "invalid Fabric command in URI; was '{command}'"
                )));
            }
        }
        "mysql" => {
            if command != "replicaset" {
                return Err(ConfigError::Invalid(format!(
                    "invalid metadata cache command in URI; was '{command}'"
                )));
            }
        }
        scheme => {
            return Err(ConfigError::Invalid(format!(
                "invalid URI scheme '{scheme}' for URI {value}"
            )));
        }
    }

    let cache_ref = match (uri.host_str(), uri.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };

    Ok(DestinationSpec::MetadataCache {
        scheme: uri.scheme().to_string(),
        command,
        target,
        cache_ref,
    })
}

fn parse_address_list(value: &str) -> Result<DestinationSpec, ConfigError> {
    let empty_address =
        || ConfigError::Invalid(format!("empty address in destination list (was '{value}')"));

    if value.is_empty() || value.starts_with(',') || value.ends_with(',') {
        return Err(empty_address());
    }

    let mut addresses = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(empty_address());
        }
        let (host, port) = split_host_port(part).map_err(|reason| {
            ConfigError::Invalid(format!("invalid destination address '{part}': {reason}"))
        })?;
        let destination = TcpDestination {
            host,
            port: port.unwrap_or(DEFAULT_DESTINATION_PORT),
        };
        if !destination.is_valid() {
            return Err(ConfigError::Invalid(format!(
                "invalid destination address '{destination}'"
            )));
        }
        addresses.push(destination);
    }

    Ok(DestinationSpec::AddressList { addresses })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(spec: &DestinationSpec) -> &[TcpDestination] {
        match spec {
            DestinationSpec::AddressList { addresses } => addresses,
            other => panic!("expected address list, got {other:?}"),
        }
    }

    #[test]
    fn address_list_with_mixed_ports() {
        let spec = parse_destinations("localhost,127.0.0.1:3307, host3:3308").unwrap();
        assert_eq!(
            addresses(&spec),
            &[
                TcpDestination { host: "localhost".to_string(), port: 3306 },
                TcpDestination { host: "127.0.0.1".to_string(), port: 3307 },
                TcpDestination { host: "host3".to_string(), port: 3308 },
            ]
        );
    }

    #[test]
    fn address_list_rendering_round_trip() {
        let input = "localhost:3306,127.0.0.1:3307,host3:3308";
        let spec = parse_destinations(input).unwrap();
        assert_eq!(spec.to_string(), input);

        // whitespace is trimmed away by parsing
        let spec = parse_destinations(" localhost:3306 , 127.0.0.1:3307 ").unwrap();
        assert_eq!(spec.to_string(), "localhost:3306,127.0.0.1:3307");
    }

    #[test]
    fn leading_comma_is_an_empty_address() {
        let err = parse_destinations(",localhost").unwrap_err();
        assert!(err.to_string().contains("empty address in destination list"));
    }

    #[test]
    fn trailing_and_doubled_commas_are_empty_addresses() {
        for input in ["localhost,", "localhost,,host3", " , "] {
            let err = parse_destinations(input).unwrap_err();
            assert!(
                err.to_string().contains("empty address in destination list"),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        assert!(parse_destinations("host:0").is_err());
        assert!(parse_destinations("host:notaport").is_err());
        assert!(parse_destinations("host:99999").is_err());
    }

    #[test]
    fn metadata_cache_uri() {
        let spec = parse_destinations("mysql://server/replicaset/rs-1").unwrap();
        assert_eq!(
            spec,
            DestinationSpec::MetadataCache {
                scheme: "mysql".to_string(),
                command: "replicaset".to_string(),
                target: "rs-1".to_string(),
                cache_ref: "server".to_string(),
            }
        );
        assert_eq!(spec.to_string(), "mysql://server/replicaset/rs-1");
    }

    #[test]
    fn metadata_cache_command_is_case_insensitive() {
        let spec = parse_destinations("mysql://server/ReplicaSet/rs-1").unwrap();
        assert!(matches!(
            spec,
            DestinationSpec::MetadataCache { ref command, .. } if command == "replicaset"
        ));
    }

    #[test]
    fn fabric_uri_requires_group_command() {
        let spec = parse_destinations("fabric+cache://x/group/ha").unwrap();
        assert!(matches!(
            spec,
            DestinationSpec::MetadataCache { ref scheme, .. } if scheme == "fabric+cache"
        ));

        let err = parse_destinations("fabric+cache://x/notgroup").unwrap_err();
        assert!(err.to_string().contains("invalid Fabric command"));
    }

    #[test]
    fn mysql_uri_requires_replicaset_command() {
        let err = parse_destinations("mysql://server/cluster/rs-1").unwrap_err();
        assert!(err.to_string().contains("invalid metadata cache command"));
    }

    #[test]
    fn unknown_uri_scheme_is_rejected() {
        let err = parse_destinations("http://server/replicaset/rs-1").unwrap_err();
        assert!(err.to_string().contains("invalid URI scheme 'http'"));
    }

    #[test]
    fn uri_authority_port_is_preserved() {
        let spec = parse_destinations("mysql://server:13306/replicaset/rs-1").unwrap();
        assert!(matches!(
            spec,
            DestinationSpec::MetadataCache { ref cache_ref, .. } if cache_ref == "server:13306"
        ));
    }
}
