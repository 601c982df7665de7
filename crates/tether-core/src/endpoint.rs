//! Instrument connection endpoints.
//!
//! An endpoint describes where an instrument serves its JSONL protocol:
//! either a TCP host/port on the local network (`net://`) or a local serial
//! device (`serial://`). Parsing and opening are separate steps; a parsed
//! endpoint is a plain value that can be displayed, compared and stored.

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::{SerialPort, SerialPortBuilderExt};

use crate::error::{Error, Result};

/// Default TCP port instruments serve the JSONL protocol on.
pub const DEFAULT_PORT: u16 = 5732;

/// Fixed baud rate for USB serial connections.
pub const SERIAL_BAUD: u32 = 115_200;

/// A duplex byte stream to an instrument, regardless of transport.
pub trait InstrumentStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> InstrumentStream for T {}

/// Where an instrument serves.
///
/// Adding a transport means adding a variant here and updating every match,
/// which the compiler enforces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP socket on the local network.
    Net { host: String, port: u16 },
    /// Local serial device (USB).
    Serial { path: String },
}

impl Endpoint {
    /// Whether the endpoint holds useful data. This is a structural check
    /// only; it says nothing about whether the endpoint can be opened.
    pub fn is_valid(&self) -> bool {
        match self {
            Endpoint::Net { host, port } => !host.is_empty() && *port != 0,
            Endpoint::Serial { path } => !path.is_empty(),
        }
    }

    /// Open a duplex byte stream to the instrument.
    ///
    /// Serial devices are opened at the fixed baud rate and any bytes the
    /// device already buffered (boot chatter) are discarded before the
    /// session begins.
    pub async fn open(&self) -> Result<Box<dyn InstrumentStream>> {
        if !self.is_valid() {
            return Err(Error::InvalidEndpoint(self.to_string()));
        }
        match self {
            Endpoint::Net { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|source| Error::Dial {
                        endpoint: self.to_string(),
                        source,
                    })?;
                Ok(Box::new(stream))
            }
            Endpoint::Serial { path } => {
                let serial_error = |source| Error::Serial {
                    endpoint: self.to_string(),
                    source,
                };
                let port = tokio_serial::new(path, SERIAL_BAUD)
                    .open_native_async()
                    .map_err(serial_error)?;
                port.clear(tokio_serial::ClearBuffer::All)
                    .map_err(serial_error)?;
                Ok(Box::new(port))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Net { host, port } => write!(f, "net://{host}:{port}"),
            Endpoint::Serial { path } => write!(f, "serial://{path}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Parses an endpoint URL.
    ///
    /// `net://host[:port]` defaults the port to [`DEFAULT_PORT`]. For
    /// `serial://` the authority/path split carries platform quirks that
    /// must be kept as-is: `serial://dev/null` names the POSIX device
    /// `/dev/null`, while `serial://COM1` names the Windows port `COM1`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = text
            .split_once("://")
            .ok_or_else(|| EndpointParseError::MissingScheme(text.to_string()))?;
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, format!("/{path}")),
            None => (rest, String::new()),
        };
        if scheme.is_empty() || authority.is_empty() {
            return Err(EndpointParseError::MissingAuthority(text.to_string()));
        }

        match scheme {
            "net" => {
                let (host, port) = match authority.rsplit_once(':') {
                    // A trailing colon with nothing after it counts as an
                    // omitted port.
                    Some((host, "")) => (host, DEFAULT_PORT),
                    Some((host, port)) => {
                        let port =
                            port.parse::<u16>()
                                .map_err(|_| EndpointParseError::InvalidPort {
                                    input: text.to_string(),
                                    port: port.to_string(),
                                })?;
                        (host, port)
                    }
                    None => (authority, DEFAULT_PORT),
                };
                Ok(Endpoint::Net {
                    host: host.to_string(),
                    port,
                })
            }
            "serial" => {
                let path = if path.is_empty() {
                    // serial://COM1
                    authority.to_string()
                } else {
                    // serial://dev/null -> /dev/null
                    format!("/{authority}{path}")
                };
                Ok(Endpoint::Serial { path })
            }
            other => Err(EndpointParseError::UnknownScheme {
                input: text.to_string(),
                scheme: other.to_string(),
            }),
        }
    }
}

/// Error parsing an endpoint URL.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointParseError {
    #[error(
        "'{0}' is not an endpoint URL; provide one like net://192.168.1.2 or serial://ttyACM0"
    )]
    MissingScheme(String),
    #[error("'{0}' has no host; provide an endpoint like net://192.168.1.2 or serial://ttyACM0")]
    MissingAuthority(String),
    #[error("'{port}' in '{input}' is not a valid port number")]
    InvalidPort { input: String, port: String },
    #[error("unknown endpoint scheme '{scheme}' in '{input}'; expected net:// or serial://")]
    UnknownScheme { input: String, scheme: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(host: &str, port: u16) -> Endpoint {
        Endpoint::Net {
            host: host.to_string(),
            port,
        }
    }

    fn serial(path: &str) -> Endpoint {
        Endpoint::Serial {
            path: path.to_string(),
        }
    }

    #[test]
    fn parse_valid_candidates() {
        let candidates = [
            ("net://1.2.3.4", net("1.2.3.4", 5732)),
            ("net://1.2.3.4:123", net("1.2.3.4", 123)),
            ("net://1.2.3.4:", net("1.2.3.4", 5732)),
            ("serial://dev/null", serial("/dev/null")),
            ("serial://COM1", serial("COM1")),
        ];
        for (input, expected) in candidates {
            let endpoint: Endpoint = input.parse().unwrap();
            assert_eq!(endpoint, expected, "parsing {input}");
            assert!(endpoint.is_valid());
        }
    }

    #[test]
    fn parse_known_failures() {
        let failures = [
            "net:/1.2.3.4:123",
            "tcp:/1.2.3.4:123",
            "serial:/dev/null",
            "serial:///dev/null",
            "net://",
            "1.2.3.4",
            "",
            "ftp://example.org",
            "net://host:notaport",
            "net://host:99999",
        ];
        for input in failures {
            assert!(
                input.parse::<Endpoint>().is_err(),
                "expected failure for {input}"
            );
        }
    }

    #[test]
    fn net_endpoints_round_trip_through_display() {
        for input in ["net://1.2.3.4:5732", "net://lab-rack:123"] {
            let endpoint: Endpoint = input.parse().unwrap();
            assert_eq!(endpoint.to_string(), input);
            assert_eq!(endpoint.to_string().parse::<Endpoint>().unwrap(), endpoint);
        }
    }

    #[test]
    fn default_port_applied_when_omitted() {
        let endpoint: Endpoint = "net://lab-rack".parse().unwrap();
        assert_eq!(endpoint, net("lab-rack", DEFAULT_PORT));
    }

    #[test]
    fn zero_port_parses_but_is_invalid() {
        let endpoint: Endpoint = "net://1.2.3.4:0".parse().unwrap();
        assert!(!endpoint.is_valid());
    }

    #[tokio::test]
    async fn opening_invalid_endpoint_is_refused() {
        let endpoint = net("1.2.3.4", 0);
        assert!(matches!(
            endpoint.open().await,
            Err(Error::InvalidEndpoint(_))
        ));
    }
}
