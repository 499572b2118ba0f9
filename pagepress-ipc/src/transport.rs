//! Newline-delimited JSON framing over async pipes
//!
//! One serialized [`Envelope`] per line. The same reader/writer pair serves
//! the orchestrating side (child pipes), the worker side (stdio), and the
//! tests (in-memory duplex streams).

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{Envelope, Message, PROTOCOL_VERSION};

pub struct FramedReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next envelope; `Ok(None)` means the peer closed the pipe.
    pub async fn read_envelope(&mut self) -> Result<Option<Envelope>, IpcError> {
        loop {
            self.line.clear();
            let read = self
                .inner
                .read_line(&mut self.line)
                .await
                .map_err(|err| IpcError::Io(err.to_string()))?;
            if read == 0 {
                return Ok(None);
            }

            let line = self.line.trim_end();
            if line.is_empty() {
                continue;
            }

            let envelope: Envelope = serde_json::from_str(line)
                .map_err(|err| IpcError::Deserialization(err.to_string()))?;
            if !envelope.is_compatible() {
                return Err(IpcError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    actual: envelope.protocol_version,
                });
            }
            return Ok(Some(envelope));
        }
    }
}

pub struct FramedWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    pub async fn write_envelope(&mut self, envelope: &Envelope) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(envelope)
            .map_err(|err| IpcError::Serialization(err.to_string()))?;
        json.push('\n');
        self.inner
            .write_all(json.as_bytes())
            .await
            .map_err(|err| IpcError::Io(err.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|err| IpcError::Io(err.to_string()))?;
        Ok(())
    }

    pub async fn write_message(&mut self, message: Message) -> Result<(), IpcError> {
        self.write_envelope(&Envelope::new(message)).await
    }
}

/// The worker side of the pipe: stdin carries inbound envelopes, stdout
/// outbound ones. Anything the worker wants a human to read goes to stderr.
pub fn stdio() -> (
    FramedReader<tokio::io::Stdin>,
    FramedWriter<tokio::io::Stdout>,
) {
    (
        FramedReader::new(tokio::io::stdin()),
        FramedWriter::new(tokio::io::stdout()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, client_write) = tokio::io::split(client);

        let mut writer = FramedWriter::new(client_write);
        let mut reader = FramedReader::new(server_read);

        let correlation_id = Uuid::new_v4();
        writer
            .write_message(Message::Ping { correlation_id })
            .await
            .unwrap();

        let envelope = reader.read_envelope().await.unwrap().unwrap();
        match envelope.message {
            Message::Ping { correlation_id: id } => assert_eq!(id, correlation_id),
            other => panic!("expected ping, got {}", other.event_name()),
        }
    }

    #[tokio::test]
    async fn eof_reports_end_of_stream() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let (server_read, _server_write) = tokio::io::split(server);
        let mut reader = FramedReader::new(server_read);
        assert!(reader.read_envelope().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_line_is_a_typed_error() {
        let (mut client, server) = tokio::io::duplex(256);
        tokio::io::AsyncWriteExt::write_all(&mut client, b"this is not json\n")
            .await
            .unwrap();
        let (server_read, _server_write) = tokio::io::split(server);
        let mut reader = FramedReader::new(server_read);
        let err = reader.read_envelope().await.unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn incompatible_version_is_rejected() {
        let (mut client, server) = tokio::io::duplex(512);
        let line = format!(
            "{{\"protocol_version\":99,\"timestamp\":\"{}\",\"message\":{{\"event\":\"ping\",\"correlationId\":\"{}\"}}}}\n",
            chrono::Utc::now().to_rfc3339(),
            Uuid::new_v4()
        );
        tokio::io::AsyncWriteExt::write_all(&mut client, line.as_bytes())
            .await
            .unwrap();
        let (server_read, _server_write) = tokio::io::split(server);
        let mut reader = FramedReader::new(server_read);
        let err = reader.read_envelope().await.unwrap_err();
        assert!(matches!(err, IpcError::VersionMismatch { actual: 99, .. }));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (mut client, server) = tokio::io::duplex(512);
        let payload = serde_json::to_string(&Envelope::new(Message::Ping {
            correlation_id: Uuid::new_v4(),
        }))
        .unwrap();
        let stream = format!("\n\n{}\n", payload);
        tokio::io::AsyncWriteExt::write_all(&mut client, stream.as_bytes())
            .await
            .unwrap();
        let (server_read, _server_write) = tokio::io::split(server);
        let mut reader = FramedReader::new(server_read);
        assert!(reader.read_envelope().await.unwrap().is_some());
    }
}
