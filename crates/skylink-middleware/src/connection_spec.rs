//! Connection specification strings.
//!
//! | Form | Meaning |
//! |---|---|
//! | `unified://websocket=ws://h:1;mavlink=/dev/ttyACM0;primary=mavlink;distribution=ALL_PROTOCOLS` | several protocols, options |
//! | `ws://host:port` or `wss://…` | WebSocket only |
//! | anything else | MAVLink endpoint only |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use skylink_types::{LinkError, ProtocolType};

const UNIFIED_SCHEME: &str = "unified://";

/// How outgoing commands are spread over the connected adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionMode {
    #[default]
    PrimaryOnly,
    AllProtocols,
    ProtocolSpecific,
}

impl FromStr for DistributionMode {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRIMARY_ONLY" => Ok(DistributionMode::PrimaryOnly),
            "ALL_PROTOCOLS" => Ok(DistributionMode::AllProtocols),
            "PROTOCOL_SPECIFIC" => Ok(DistributionMode::ProtocolSpecific),
            other => Err(LinkError::InvalidSpec(format!(
                "unknown distribution mode '{other}'"
            ))),
        }
    }
}

impl fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DistributionMode::PrimaryOnly => "PRIMARY_ONLY",
            DistributionMode::AllProtocols => "ALL_PROTOCOLS",
            DistributionMode::ProtocolSpecific => "PROTOCOL_SPECIFIC",
        })
    }
}

/// Parsed connection specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub endpoints: BTreeMap<ProtocolType, String>,
    pub preferred_primary: Option<ProtocolType>,
    pub distribution: DistributionMode,
}

impl ConnectionSpec {
    pub fn parse(spec: &str) -> Result<Self, LinkError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(LinkError::InvalidSpec("empty connection specification".into()));
        }

        let Some(body) = spec.strip_prefix(UNIFIED_SCHEME) else {
            let protocol = if spec.starts_with("ws://") || spec.starts_with("wss://") {
                ProtocolType::WebSocket
            } else {
                ProtocolType::Mavlink
            };
            return Ok(Self::single(protocol, spec));
        };

        let mut endpoints = BTreeMap::new();
        let mut preferred_primary = None;
        let mut distribution = DistributionMode::default();

        for pair in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(LinkError::InvalidSpec(format!("expected key=value, got '{pair}'")));
            };
            let (key, value) = (key.trim(), value.trim());
            match key.to_ascii_lowercase().as_str() {
                "primary" => {
                    let protocol = ProtocolType::from_key(value).ok_or_else(|| {
                        LinkError::InvalidSpec(format!("unknown primary protocol '{value}'"))
                    })?;
                    preferred_primary = Some(protocol);
                }
                "distribution" => distribution = value.parse()?,
                other => {
                    let protocol = ProtocolType::from_key(other).ok_or_else(|| {
                        LinkError::InvalidSpec(format!("unknown key '{other}'"))
                    })?;
                    if value.is_empty() {
                        return Err(LinkError::InvalidSpec(format!(
                            "empty endpoint for {protocol}"
                        )));
                    }
                    endpoints.insert(protocol, value.to_string());
                }
            }
        }

        if endpoints.is_empty() {
            return Err(LinkError::InvalidSpec("no protocol endpoints given".into()));
        }
        if let Some(preferred) = preferred_primary {
            if !endpoints.contains_key(&preferred) {
                return Err(LinkError::InvalidSpec(format!(
                    "preferred primary {preferred} has no endpoint"
                )));
            }
        }

        Ok(Self {
            endpoints,
            preferred_primary,
            distribution,
        })
    }

    fn single(protocol: ProtocolType, endpoint: &str) -> Self {
        Self {
            endpoints: BTreeMap::from([(protocol, endpoint.to_string())]),
            preferred_primary: None,
            distribution: DistributionMode::PrimaryOnly,
        }
    }

    pub fn protocols(&self) -> impl Iterator<Item = ProtocolType> + '_ {
        self.endpoints.keys().copied()
    }

    pub fn endpoint(&self, protocol: ProtocolType) -> Option<&str> {
        self.endpoints.get(&protocol).map(String::as_str)
    }
}

impl FromStr for ConnectionSpec {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_unified_spec() {
        let spec = ConnectionSpec::parse(
            "unified://websocket=ws://host:1;mavlink=/dev/x;primary=mavlink;distribution=ALL_PROTOCOLS",
        )
        .unwrap();
        assert_eq!(spec.endpoint(ProtocolType::WebSocket), Some("ws://host:1"));
        assert_eq!(spec.endpoint(ProtocolType::Mavlink), Some("/dev/x"));
        assert_eq!(spec.preferred_primary, Some(ProtocolType::Mavlink));
        assert_eq!(spec.distribution, DistributionMode::AllProtocols);
    }

    #[test]
    fn bare_websocket_url_selects_websocket_only() {
        let spec = ConnectionSpec::parse("wss://drone.local/link").unwrap();
        assert_eq!(spec.protocols().collect::<Vec<_>>(), vec![ProtocolType::WebSocket]);
        assert_eq!(spec.distribution, DistributionMode::PrimaryOnly);
        assert!(spec.preferred_primary.is_none());
    }

    #[test]
    fn other_bare_strings_are_mavlink_endpoints() {
        let spec = ConnectionSpec::parse("udpin:0.0.0.0:14550").unwrap();
        assert_eq!(spec.endpoint(ProtocolType::Mavlink), Some("udpin:0.0.0.0:14550"));
        assert_eq!(spec.endpoints.len(), 1);
    }

    #[test]
    fn defaults_to_primary_only_distribution() {
        let spec = ConnectionSpec::parse("unified://websocket=ws://a:1").unwrap();
        assert_eq!(spec.distribution, DistributionMode::PrimaryOnly);
    }

    #[test]
    fn malformed_specs_are_rejected() {
        for bad in [
            "",
            "unified://",
            "unified://bluetooth=hci0",
            "unified://websocket",
            "unified://websocket=ws://a:1;distribution=SOMETIMES",
            "unified://websocket=ws://a:1;primary=mavlink",
            "unified://mavlink=",
        ] {
            assert!(
                matches!(ConnectionSpec::parse(bad), Err(LinkError::InvalidSpec(_))),
                "expected rejection of {bad:?}"
            );
        }
    }

    #[test]
    fn distribution_names_are_case_insensitive() {
        assert_eq!(
            "protocol_specific".parse::<DistributionMode>().unwrap(),
            DistributionMode::ProtocolSpecific
        );
        assert_eq!(DistributionMode::AllProtocols.to_string(), "ALL_PROTOCOLS");
    }
}
