//! The message channel over a worker's pipe
//!
//! Wraps a child process's pipe pair into an event interface. Control
//! messages are routed to a receiver owned by the pool layer; application
//! events are re-broadcast to local subscribers. When a process has no peer
//! pipe at all, [`MessageChannel::loopback`] provides an in-memory
//! pass-through instead of failing.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::protocol::{Envelope, Message};
use crate::transport::{FramedReader, FramedWriter};

const APP_EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
enum Outbound {
    Pipe(mpsc::UnboundedSender<Message>),
    Loopback,
}

#[derive(Clone)]
pub struct MessageChannel {
    outbound: Outbound,
    app_events: broadcast::Sender<Message>,
}

impl MessageChannel {
    /// Wrap a pipe pair. The returned receiver carries control messages and
    /// belongs to the pool layer; it closes when the peer closes the pipe.
    pub fn wrap<R, W>(reader: R, writer: W) -> (Self, mpsc::UnboundedReceiver<Message>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (app_tx, _) = broadcast::channel(APP_EVENT_CAPACITY);

        tokio::spawn(async move {
            let mut writer = FramedWriter::new(writer);
            while let Some(message) = out_rx.recv().await {
                if let Err(err) = writer.write_envelope(&Envelope::new(message)).await {
                    debug!(error = %err, "channel writer closed, further sends are dropped");
                    break;
                }
            }
        });

        let app_for_reader = app_tx.clone();
        tokio::spawn(async move {
            let mut reader = FramedReader::new(reader);
            loop {
                match reader.read_envelope().await {
                    Ok(Some(envelope)) => {
                        let message = envelope.message;
                        if message.is_control() {
                            if control_tx.send(message).is_err() {
                                break;
                            }
                        } else {
                            // no subscribers is fine
                            let _ = app_for_reader.send(message);
                        }
                    }
                    Ok(None) => break,
                    Err(err) if err.is_malformed() => {
                        warn!(error = %err, "dropping malformed message on channel");
                    }
                    Err(err) => {
                        debug!(error = %err, "channel reader stopped");
                        break;
                    }
                }
            }
            // dropping control_tx tells the pool the pipe is gone
        });

        (
            Self {
                outbound: Outbound::Pipe(out_tx),
                app_events: app_tx,
            },
            control_rx,
        )
    }

    /// In-memory pass-through for processes with no peer pipe.
    pub fn loopback() -> Self {
        let (app_tx, _) = broadcast::channel(APP_EVENT_CAPACITY);
        Self {
            outbound: Outbound::Loopback,
            app_events: app_tx,
        }
    }

    /// Fire-and-forget send. Once the pipe is gone, emits are silently
    /// dropped; callers needing a delivery guarantee use the dispatcher's
    /// response protocol instead.
    pub fn emit(&self, message: Message) {
        match &self.outbound {
            Outbound::Pipe(tx) => {
                let _ = tx.send(message);
            }
            Outbound::Loopback => {
                // control kinds have no peer to handle them in loopback mode
                if !message.is_control() {
                    let _ = self.app_events.send(message);
                }
            }
        }
    }

    /// Subscribe to application events; control kinds never show up here.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.app_events.subscribe()
    }
}
