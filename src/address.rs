//! Node endpoint addresses
//!
//! An address has the form `host:port/tag[.name]`. The `host:port/tag` part
//! names a node (one engine process); the optional `name` selects a partition
//! served by that node.

use crate::RoutingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parsed node endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
    pub tag: String,
    pub local_name: Option<String>,
}

impl NodeAddress {
    /// Create an address; an empty local name is treated as absent
    pub fn new(
        host: impl Into<String>,
        port: u16,
        tag: impl Into<String>,
        local_name: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            tag: tag.into(),
            local_name: local_name.filter(|name| !name.is_empty()),
        }
    }

    /// Parse `host:port/tag` or `host:port/tag.name`
    pub fn parse(value: &str) -> Result<Self, RoutingError> {
        let invalid = || RoutingError::InvalidAddress(value.to_string());

        // The host may itself contain ':' or '/', so prefer the right-most
        // separator that leaves a valid `:port` in front of it.
        let mut slashes: Vec<usize> = value.match_indices('/').map(|(i, _)| i).collect();
        slashes.reverse();

        for slash in slashes {
            let (head, rest) = (&value[..slash], &value[slash + 1..]);
            let Some((host, port)) = head.rsplit_once(':') else {
                continue;
            };
            if host.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let Ok(port) = port.parse::<u16>() else {
                continue;
            };

            let (tag, local_name) = match rest.split_once('.') {
                Some((tag, name)) => (tag, Some(name.to_string())),
                None => (rest, None),
            };
            if tag.is_empty() {
                continue;
            }

            return Ok(Self::new(host, port, tag, local_name));
        }

        Err(invalid())
    }

    /// `host:port/tag`, shared by every partition on the same node
    pub fn node(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.tag)
    }

    /// Same node, different partition
    pub fn with_local_name(&self, local_name: impl Into<String>) -> Self {
        Self::new(
            self.host.clone(),
            self.port,
            self.tag.clone(),
            Some(local_name.into()),
        )
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.tag)?;
        if let Some(name) = &self.local_name {
            write!(f, ".{}", name)?;
        }
        Ok(())
    }
}

impl FromStr for NodeAddress {
    type Err = RoutingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = RoutingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeAddress> for String {
    fn from(address: NodeAddress) -> Self {
        address.to_string()
    }
}

/// Sort addresses by their string form and drop duplicates
pub fn sort_and_dedup(addresses: &mut Vec<NodeAddress>) {
    addresses.sort_by_cached_key(|address| address.to_string());
    addresses.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_local_name() {
        let address = NodeAddress::parse("192.168.0.1:10031/droonga.000").unwrap();
        assert_eq!(address.host, "192.168.0.1");
        assert_eq!(address.port, 10031);
        assert_eq!(address.tag, "droonga");
        assert_eq!(address.local_name.as_deref(), Some("000"));
        assert_eq!(address.node(), "192.168.0.1:10031/droonga");
    }

    #[test]
    fn test_parse_without_local_name() {
        let address = NodeAddress::parse("localhost:24224/droonga").unwrap();
        assert_eq!(address.local_name, None);
        assert_eq!(address.to_string(), "localhost:24224/droonga");
    }

    #[test]
    fn test_local_name_may_contain_dots() {
        let address = NodeAddress::parse("host:1/tag.a.b").unwrap();
        assert_eq!(address.tag, "tag");
        assert_eq!(address.local_name.as_deref(), Some("a.b"));
    }

    #[test]
    fn test_empty_local_name_is_normalized() {
        let address = NodeAddress::parse("host:1/tag.").unwrap();
        assert_eq!(address.local_name, None);
        assert_eq!(address.to_string(), "host:1/tag");
    }

    #[test]
    fn test_ipv6_like_host() {
        let address = NodeAddress::parse("::1:10031/droonga.001").unwrap();
        assert_eq!(address.host, "::1");
        assert_eq!(address.port, 10031);
    }

    #[test]
    fn test_rejects_malformed() {
        for value in ["", "host", "host:port/tag", "host:1/", ":1/tag", "host:70000/tag"] {
            assert!(
                NodeAddress::parse(value).is_err(),
                "{} should be rejected",
                value
            );
        }
    }

    #[test]
    fn test_round_trip() {
        for value in ["a:1/b", "a:1/b.c", "node-1.example.com:10031/droonga.000"] {
            let address = NodeAddress::parse(value).unwrap();
            assert_eq!(address.to_string(), value);
            assert_eq!(NodeAddress::parse(&address.to_string()).unwrap(), address);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let address = NodeAddress::parse("a:1/b.c").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"a:1/b.c\"");
        let decoded: NodeAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, address);
    }

    #[test]
    fn test_sort_and_dedup() {
        let mut addresses = vec![
            NodeAddress::parse("b:1/t.0").unwrap(),
            NodeAddress::parse("a:1/t.1").unwrap(),
            NodeAddress::parse("b:1/t.0").unwrap(),
        ];
        sort_and_dedup(&mut addresses);
        let strings: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        assert_eq!(strings, vec!["a:1/t.1", "b:1/t.0"]);
    }
}
