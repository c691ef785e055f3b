//! Server addresses.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Default server port.
pub const DEFAULT_PORT: u16 = 27017;

/// Error parsing a `host[:port]` string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid server address {input:?}: {reason}")]
pub struct AddressParseError {
    input: String,
    reason: &'static str,
}

/// A server's host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    /// Hostname, IPv4 address, or IPv6 address without brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ServerAddress {
    /// Create an address from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, or `[v6addr]:port`.
    pub fn parse(input: &str) -> Result<Self, AddressParseError> {
        let err = |reason| AddressParseError {
            input: input.to_string(),
            reason,
        };

        let input_trimmed = input.trim();
        if input_trimmed.is_empty() {
            return Err(err("empty host"));
        }

        let (host, port) = if let Some(rest) = input_trimmed.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(|| err("unterminated '['"))?;
            match after {
                "" => (host, None),
                _ => {
                    let port = after.strip_prefix(':').ok_or_else(|| err("expected ':' after ']'"))?;
                    (host, Some(port))
                }
            }
        } else {
            match input_trimmed.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                Some(_) => return Err(err("IPv6 addresses must be enclosed in brackets")),
                None => (input_trimmed, None),
            }
        };

        if host.is_empty() {
            return Err(err("empty host"));
        }

        let port = match port {
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => return Err(err("port must be between 1 and 65535")),
                Ok(p) => p,
            },
            None => DEFAULT_PORT,
        };

        Ok(Self::new(host.to_ascii_lowercase(), port))
    }
}

impl FromStr for ServerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
