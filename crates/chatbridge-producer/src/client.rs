//! Producer client that keeps the response producer attached to the relay.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use chatbridge_core::protocol::{self, ClientKind, Inbound, Message};

use crate::config::ProducerSettings;
use crate::driver::{ResponseProducer, drive};
use crate::error::ProducerError;

/// Text of the `ready` notification sent after every (re)connect.
pub const READY_TEXT: &str = "Extension connected and ready";

/// Connections that stayed up this long reset the backoff.
const STABLE_CONNECTION: Duration = Duration::from_secs(60);

/// Producer client that maintains a persistent connection to the relay.
pub struct ProducerClient<P> {
    settings: ProducerSettings,
    producer: Arc<P>,
}

impl<P: ResponseProducer> ProducerClient<P> {
    pub fn new(settings: ProducerSettings, producer: P) -> Self {
        Self {
            settings,
            producer: Arc::new(producer),
        }
    }

    /// Run the producer client with automatic reconnection.
    ///
    /// Connects to the relay, identifies as the producer and answers
    /// queries. On disconnect it waits per the reconnect policy and tries
    /// again, until `shutdown` flips or the policy gives up.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Producer client shutting down");
                return;
            }

            let started = Instant::now();
            match self.connect_and_serve(&mut shutdown).await {
                Ok(()) => {
                    info!("Producer connection closed cleanly");
                    return;
                }
                Err(e) => {
                    if started.elapsed() > STABLE_CONNECTION {
                        attempt = 0;
                    }

                    if !self.settings.reconnect.should_retry(attempt) {
                        error!(error = %e, attempt, "Max reconnect attempts reached");
                        return;
                    }

                    let delay = self.settings.reconnect.delay_for_attempt(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis(), "Reconnecting");

                    tokio::select! {
                        () = sleep(delay) => {}
                        _ = shutdown.changed() => {
                            info!("Producer client shutting down during reconnect wait");
                            return;
                        }
                    }

                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Connect, identify and serve queries until the connection drops or
    /// shutdown is requested.
    async fn connect_and_serve(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ProducerError> {
        let url = self.settings.url.as_str();
        let (ws_stream, _response) =
            tokio::time::timeout(self.settings.connect_timeout, connect_async(url))
                .await
                .map_err(|_| ProducerError::Connection(format!("Timed out connecting to {url}")))?
                .map_err(|e| ProducerError::Connection(e.to_string()))?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(128);

        let mut writer: JoinHandle<Result<(), ProducerError>> = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let frame = protocol::encode(&msg)?;
                ws_sender
                    .send(WsMessage::Text(frame))
                    .await
                    .map_err(|e| ProducerError::Stream(e.to_string()))?;
            }
            let _ = ws_sender.close().await;
            Ok(())
        });

        for msg in [
            Message::identify(ClientKind::Extension),
            Message::ready(READY_TEXT),
        ] {
            outbound_tx
                .send(msg)
                .await
                .map_err(|_| ProducerError::Connection("Failed to send identify".into()))?;
        }
        info!(url, "Producer connected to relay");

        let mut in_flight: Option<JoinHandle<()>> = None;

        let result = loop {
            tokio::select! {
                frame = ws_receiver.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        self.handle_frame(&text, &outbound_tx, &mut in_flight);
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => self.handle_frame(&text, &outbound_tx, &mut in_flight),
                        Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        break Err(ProducerError::Connection("Connection closed by relay".into()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(ProducerError::Stream(e.to_string())),
                },
                res = &mut writer => {
                    break match res {
                        Ok(Ok(())) => Err(ProducerError::Stream("Writer stopped".into())),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(ProducerError::Stream(e.to_string())),
                    };
                }
                _ = shutdown.changed() => {
                    info!("Producer client received shutdown signal");
                    break Ok(());
                }
            }
        };

        if let Some(task) = in_flight.take() {
            task.abort();
        }
        drop(outbound_tx);

        if result.is_ok() {
            // Let the writer send the close frame.
            if tokio::time::timeout(Duration::from_secs(1), &mut writer)
                .await
                .is_err()
            {
                writer.abort();
            }
        } else {
            writer.abort();
        }

        result
    }

    fn handle_frame(
        &self,
        frame: &str,
        outbound_tx: &mpsc::Sender<Message>,
        in_flight: &mut Option<JoinHandle<()>>,
    ) {
        let text = match protocol::decode(frame) {
            Ok(Inbound::Known(Message::Query { text })) => text,
            Ok(other) => {
                debug!(?other, "Ignoring non-query message");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        if let Some(previous) = in_flight.take() {
            if !previous.is_finished() {
                warn!("New query arrived while another was in flight; cancelling the previous one");
                previous.abort();
            }
        }

        info!(query_len = text.len(), "Received query");
        let producer = Arc::clone(&self.producer);
        let outbound = outbound_tx.clone();
        let stall_timeout = self.settings.stall_timeout;
        *in_flight = Some(tokio::spawn(async move {
            match drive(producer.as_ref(), text, &outbound, stall_timeout).await {
                Ok(outcome) => info!(?outcome, "Query finished"),
                Err(e) => warn!(error = %e, "Query aborted"),
            }
        }));
    }
}
