//! The protocol engine: one open stream, one sequential conversation.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

use crate::endpoint::{Endpoint, InstrumentStream};
use crate::envelope::{RecvEnvelope, SendEnvelope};
use crate::error::{Error, Result};

type BoxedStream = Box<dyn InstrumentStream>;

/// A live connection to one instrument.
///
/// The controller owns the stream exclusively and models a single
/// sequential request/reply conversation; it is not meant to be shared
/// between concurrent callers.
///
/// By default [`Controller::command`] blocks until the instrument answers.
/// A device that never replies blocks the call forever; set a read timeout
/// with [`Controller::with_read_timeout`] when that is not acceptable.
pub struct Controller {
    endpoint: Endpoint,
    pub(crate) reader: BufReader<ReadHalf<BoxedStream>>,
    pub(crate) writer: WriteHalf<BoxedStream>,
    read_timeout: Option<Duration>,
}

impl Controller {
    /// Open the endpoint and wrap the stream in a controller.
    pub async fn connect(endpoint: Endpoint) -> Result<Self> {
        tracing::debug!(%endpoint, "connecting to instrument");
        let stream = endpoint.open().await?;
        Ok(Self::from_stream(endpoint, stream))
    }

    /// Parse an endpoint URL and connect to it.
    pub async fn connect_to(text: &str) -> Result<Self> {
        Self::connect(text.parse::<Endpoint>()?).await
    }

    pub(crate) fn from_stream(endpoint: Endpoint, stream: BoxedStream) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            endpoint,
            reader: BufReader::new(read),
            writer: write,
            read_timeout: None,
        }
    }

    /// Bound every reply wait in [`Controller::command`] by `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// The endpoint this controller was opened from.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send a request envelope and wait for the matching reply line.
    ///
    /// Serial links tend to reflect the outbound line back before the
    /// genuine reply arrives; any line that decodes to a request deep-equal
    /// to the one just sent is treated as such an echo and skipped. The
    /// first non-echo line is returned as the reply. A reply whose type
    /// differs from the request only logs a warning; the id is carried for
    /// forward compatibility but deliberately not checked.
    pub async fn command(&mut self, request: &SendEnvelope) -> Result<RecvEnvelope> {
        let line = serde_json::to_string(request).map_err(Error::Serialize)?;
        self.write_raw_line(line.as_bytes()).await?;
        match self.read_timeout {
            Some(window) => tokio::time::timeout(window, self.read_reply(request))
                .await
                .map_err(|_| Error::Timeout(window))?,
            None => self.read_reply(request).await,
        }
    }

    async fn read_reply(&mut self, request: &SendEnvelope) -> Result<RecvEnvelope> {
        loop {
            let line = self.read_line().await?.ok_or(Error::ConnectionClosed)?;
            if let Ok(echoed) = serde_json::from_str::<SendEnvelope>(&line) {
                if echoed == *request {
                    tracing::debug!("discarding echoed request line");
                    continue;
                }
            }
            let reply: RecvEnvelope = serde_json::from_str(&line)
                .map_err(|source| Error::MalformedReply { line, source })?;
            if reply.ty != request.ty {
                tracing::warn!(sent = %request.ty, received = %reply.ty,
                    "reply type does not match request");
            }
            return Ok(reply);
        }
    }

    /// Send a request of the given type with no payload.
    pub async fn query(&mut self, ty: &str) -> Result<RecvEnvelope> {
        self.command(&SendEnvelope::new(ty)).await
    }

    /// Send a request of the given type carrying a payload object.
    pub async fn query_with_payload(
        &mut self,
        ty: &str,
        msg: serde_json::Map<String, serde_json::Value>,
    ) -> Result<RecvEnvelope> {
        self.command(&SendEnvelope::with_msg(ty, serde_json::Value::Object(msg)))
            .await
    }

    /// Read the next raw line from the instrument, with the terminator
    /// stripped. `None` means the stream ended.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        strip_terminator(&mut line);
        Ok(Some(line))
    }

    /// Write one raw line to the instrument, appending the CRLF terminator
    /// the device expects. Bypasses envelope correlation entirely.
    pub async fn write_raw_line(&mut self, line: &[u8]) -> Result<()> {
        self.writer.write_all(line).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Drop the trailing CRLF (or bare LF) from a received line.
pub(crate) fn strip_terminator(line: &mut String) {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
}
