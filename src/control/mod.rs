//! AVS4000 daemon control protocol.
//!
//! Requests and responses are single JSON arrays terminated by a newline. A request is
//! `["get", [<group>, ...]]`, `["set", {<group>: {<key>: <value>}}]` or a bare `["get"]` to
//! enumerate devices. A response is `[<success>, <payload>]` where the payload is optional.
mod settings;

pub use settings::*;

use std::{
    fmt,
    io::{BufRead, BufReader, ErrorKind, Write},
    net::TcpStream,
    time::Duration,
};

use serde::{de::DeserializeOwned, ser::SerializeTuple, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Get(Vec<Group>),
    Set(Settings),
    /// `get` with no payload, answered by the manager with the device list.
    Enumerate,
}

impl Serialize for ControlRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ControlRequest::Get(groups) => {
                let mut tup = serializer.serialize_tuple(2)?;
                tup.serialize_element("get")?;
                tup.serialize_element(groups)?;
                tup.end()
            }
            ControlRequest::Set(settings) => {
                let mut tup = serializer.serialize_tuple(2)?;
                tup.serialize_element("set")?;
                tup.serialize_element(settings)?;
                tup.end()
            }
            ControlRequest::Enumerate => {
                let mut tup = serializer.serialize_tuple(1)?;
                tup.serialize_element("get")?;
                tup.end()
            }
        }
    }
}

impl fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlRequest::Get(groups) => {
                let names: Vec<_> = groups.iter().map(|g| g.name()).collect();
                write!(f, "get {}", names.join(","))
            }
            ControlRequest::Set(settings) => write!(f, "set {}", settings.groups().join(",")),
            ControlRequest::Enumerate => write!(f, "get"),
        }
    }
}

/// Decoded `[success, payload]` response.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlResponse {
    pub success: bool,
    pub payload: Option<Value>,
}

impl TryFrom<Vec<Value>> for ControlResponse {
    type Error = String;

    fn try_from(mut items: Vec<Value>) -> std::result::Result<Self, Self::Error> {
        if items.is_empty() || items.len() > 2 {
            return Err(format!("expected 1 or 2 elements, got {}", items.len()));
        }
        let payload = if items.len() == 2 { items.pop() } else { None };
        match items.pop() {
            Some(Value::Bool(success)) => Ok(ControlResponse { success, payload }),
            Some(other) => Err(format!("expected a boolean status, got {other}")),
            None => Err("empty response".into()),
        }
    }
}

impl ControlResponse {
    /// Decode a single response line.
    ///
    /// # Errors
    /// [Error::Protocol] if `line` is not JSON, [Error::MalformedResponse] if it does not have
    /// the response shape.
    pub fn parse(line: &str) -> Result<Self> {
        let items: Vec<Value> = serde_json::from_str(line)?;
        ControlResponse::try_from(items).map_err(Error::MalformedResponse)
    }

    /// Deserialize the named group from the payload.
    ///
    /// # Errors
    /// [Error::MalformedResponse] if the payload does not contain `group`, [Error::Protocol]
    /// if it cannot be decoded as `T`.
    pub fn group<T: DeserializeOwned>(&self, group: Group) -> Result<T> {
        let value = self
            .payload
            .as_ref()
            .and_then(|p| p.get(group.name()))
            .ok_or_else(|| {
                Error::MalformedResponse(format!("response has no {} group", group.name()))
            })?;
        Ok(T::deserialize(value)?)
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection {
    fn open(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Connection {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    fn exchange(&mut self, request: &ControlRequest) -> Result<ControlResponse> {
        let mut buf = serde_json::to_vec(request)?;
        trace!(request = %String::from_utf8_lossy(&buf), "control request");
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(
                std::io::Error::new(ErrorKind::UnexpectedEof, "control connection closed").into(),
            );
        }
        trace!(response = line.trim_end(), "control response");
        ControlResponse::parse(line.trim_end())
    }
}

/// Synchronous request/response client for a daemon control port.
///
/// The connection is opened on first use. Any failure during an exchange drops the
/// connection, so the next request reconnects; nothing is retried here.
pub struct ControlChannel {
    host: String,
    port: u16,
    timeout: Duration,
    conn: Option<Connection>,
}

impl ControlChannel {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        ControlChannel {
            host: host.into(),
            port,
            timeout,
            conn: None,
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Connect if not already connected.
    ///
    /// # Errors
    /// [Error::Transport] if the connection cannot be established.
    pub fn connect(&mut self) -> Result<()> {
        if self.conn.is_none() {
            debug!(host = %self.host, port = self.port, "connecting control channel");
            self.conn = Some(Connection::open(&self.host, self.port, self.timeout)?);
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!(port = self.port, "control channel disconnected");
        }
    }

    /// Send `request` and wait for its response, connecting first if necessary.
    ///
    /// # Errors
    /// [Error::Transport] on connect, write or read failure. [Error::Protocol] or
    /// [Error::MalformedResponse] if the response cannot be decoded.
    pub fn send(&mut self, request: &ControlRequest) -> Result<ControlResponse> {
        self.connect()?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(std::io::Error::from(ErrorKind::NotConnected).into());
        };
        match conn.exchange(request) {
            Ok(response) => {
                debug!(%request, success = response.success, "control exchange");
                Ok(response)
            }
            Err(err) => {
                warn!(%request, "control exchange failed, dropping connection: {err}");
                self.conn = None;
                Err(err)
            }
        }
    }

    /// Like [Self::send] but a `false` status is an error.
    ///
    /// # Errors
    /// As [Self::send], plus [Error::Rejected] if the daemon does not accept the request.
    pub fn command(&mut self, request: &ControlRequest) -> Result<ControlResponse> {
        let response = self.send(request)?;
        if !response.success {
            warn!(%request, "daemon rejected request");
            return Err(Error::Rejected {
                command: request.to_string(),
            });
        }
        Ok(response)
    }
}
