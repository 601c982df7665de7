//! Bridging a client message stream onto the instrument's raw byte stream.
//!
//! This is what lets a browser talk to hardware it cannot reach directly:
//! the proxy upgrades a socket connection and pumps text frames 1:1 against
//! device lines, bypassing envelope correlation entirely.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use crate::controller::{Controller, strip_terminator};

/// Copy lines bidirectionally between a client and the instrument until
/// either side closes or fails.
///
/// Device lines (terminator stripped) are forwarded to `to_client` one
/// message per line; client messages get the CRLF terminator appended and
/// are written raw to the instrument. Both directions run concurrently in
/// this task; whichever finishes first ends the whole session. Errors end
/// the session and are logged, never propagated.
pub async fn bridge<Tx, Rx>(controller: &mut Controller, mut to_client: Tx, mut from_client: Rx)
where
    Tx: Sink<String> + Unpin,
    Rx: Stream<Item = String> + Unpin,
{
    let Controller { reader, writer, .. } = controller;

    let device_to_client = async {
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    strip_terminator(&mut line);
                    if to_client.send(line).await.is_err() {
                        tracing::debug!("client went away while forwarding");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("instrument read failed: {e}");
                    break;
                }
            }
        }
    };

    let client_to_device = async {
        while let Some(message) = from_client.next().await {
            tracing::debug!(%message, "forwarding client line to instrument");
            let write = async {
                writer.write_all(message.as_bytes()).await?;
                writer.write_all(b"\r\n").await?;
                writer.flush().await
            };
            if let Err(e) = write.await {
                tracing::warn!("instrument write failed: {e}");
                break;
            }
        }
    };

    tokio::select! {
        _ = device_to_client => tracing::debug!("instrument stream ended, closing bridge"),
        _ = client_to_device => tracing::debug!("client stream ended, closing bridge"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use futures::channel::mpsc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn test_controller(stream: DuplexStream) -> Controller {
        Controller::from_stream(
            Endpoint::Net {
                host: "test".to_string(),
                port: 5732,
            },
            Box::new(stream),
        )
    }

    #[tokio::test]
    async fn forwards_both_directions_until_client_closes() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let mut controller = test_controller(ours);
        let (device_read, mut device_write) = tokio::io::split(theirs);
        let mut device_lines = BufReader::new(device_read).lines();

        let (client_tx, from_client) = mpsc::unbounded::<String>();
        let (to_client, mut client_rx) = mpsc::unbounded::<String>();

        let session = bridge(&mut controller, to_client, from_client);
        let script = async {
            device_write.write_all(b"hello\r\n").await.unwrap();
            assert_eq!(client_rx.next().await.unwrap(), "hello");

            client_tx.unbounded_send("ping".to_string()).unwrap();
            assert_eq!(device_lines.next_line().await.unwrap().unwrap(), "ping");

            // Client hangs up; the whole session must end.
            drop(client_tx);
        };
        tokio::join!(session, script);
    }

    #[tokio::test]
    async fn device_eof_ends_the_session() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let mut controller = test_controller(ours);

        // Client side stays open the whole time.
        let (_client_tx, from_client) = mpsc::unbounded::<String>();
        let (to_client, _client_rx) = mpsc::unbounded::<String>();

        drop(theirs);
        bridge(&mut controller, to_client, from_client).await;
    }
}
