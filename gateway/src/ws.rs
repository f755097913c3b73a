//! WebSocket subscription connection with a reconnecting supervisor task.
//!
//! The supervisor owns the socket. Callers talk to it through a command
//! channel. When the socket drops, every server-side subscription is
//! forgotten and `Disconnected` is broadcast; callers re-subscribe after the
//! next `Connected`.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::provider::{ConnectionEvent, SubscriptionHandle, SubscriptionMessage, SubscriptionTopic};
use crate::rpc_types::{RpcBlock, RpcTransaction};
use crate::ProviderError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub(crate) enum Command {
    Subscribe {
        handle: SubscriptionHandle,
        topic: SubscriptionTopic,
        sink: mpsc::UnboundedSender<SubscriptionMessage>,
        reply: oneshot::Sender<Result<(), ProviderError>>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
    },
    Reconnect,
}

/// Client side of the supervisor task.
pub(crate) struct WsSubscriber {
    commands: mpsc::UnboundedSender<Command>,
}

impl WsSubscriber {
    pub(crate) fn spawn(url: String, events: broadcast::Sender<ConnectionEvent>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(supervise(url, rx, events));
        Self { commands }
    }

    pub(crate) async fn subscribe(
        &self,
        handle: SubscriptionHandle,
        topic: SubscriptionTopic,
        sink: mpsc::UnboundedSender<SubscriptionMessage>,
    ) -> Result<(), ProviderError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                handle,
                topic,
                sink,
                reply,
            })
            .map_err(|_| ProviderError::NotConnected)?;
        response.await.map_err(|_| ProviderError::NotConnected)?
    }

    pub(crate) fn unsubscribe(&self, handle: SubscriptionHandle) {
        let _ = self.commands.send(Command::Unsubscribe { handle });
    }

    pub(crate) fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }
}

struct ActiveSubscription {
    handle: SubscriptionHandle,
    topic: SubscriptionTopic,
    sink: mpsc::UnboundedSender<SubscriptionMessage>,
}

struct PendingSubscribe {
    subscription: ActiveSubscription,
    reply: oneshot::Sender<Result<(), ProviderError>>,
}

/// Why a connected session ended.
enum SessionEnd {
    Dropped,
    ReconnectRequested,
    Shutdown,
}

async fn supervise(
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ConnectionEvent>,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(%url, "subscription connection established");
                backoff = INITIAL_BACKOFF;
                let _ = events.send(ConnectionEvent::Connected);
                let end = run_session(stream, &mut commands).await;
                let _ = events.send(ConnectionEvent::Disconnected);
                match end {
                    SessionEnd::Shutdown => return,
                    SessionEnd::ReconnectRequested => {
                        info!(%url, "reconnecting on request");
                        continue;
                    }
                    SessionEnd::Dropped => warn!(%url, "subscription connection dropped"),
                }
            }
            Err(e) => warn!(%url, "subscription connection failed: {e}"),
        }

        // Refuse subscriptions while waiting to reconnect.
        let sleep = tokio::time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    None => return,
                    Some(Command::Subscribe { reply, .. }) => {
                        let _ = reply.send(Err(ProviderError::NotConnected));
                    }
                    Some(Command::Reconnect) => break,
                    Some(Command::Unsubscribe { .. }) => {}
                },
            }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn run_session(mut stream: WsStream, commands: &mut mpsc::UnboundedReceiver<Command>) -> SessionEnd {
    let mut next_request_id: u64 = 1;
    let mut pending: HashMap<u64, PendingSubscribe> = HashMap::new();
    let mut active: HashMap<String, ActiveSubscription> = HashMap::new();

    let end = loop {
        tokio::select! {
            command = commands.recv() => match command {
                None => break SessionEnd::Shutdown,
                Some(Command::Reconnect) => break SessionEnd::ReconnectRequested,
                Some(Command::Subscribe { handle, topic, sink, reply }) => {
                    let id = next_request_id;
                    next_request_id += 1;
                    let request = json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "method": "eth_subscribe",
                        "params": subscribe_params(&topic),
                    });
                    if let Err(e) = stream.send(Message::Text(request.to_string().into())).await {
                        let _ = reply.send(Err(ProviderError::Transport(e.to_string())));
                        break SessionEnd::Dropped;
                    }
                    pending.insert(id, PendingSubscribe {
                        subscription: ActiveSubscription { handle, topic, sink },
                        reply,
                    });
                }
                Some(Command::Unsubscribe { handle }) => {
                    let server_id = active
                        .iter()
                        .find(|(_, sub)| sub.handle == handle)
                        .map(|(id, _)| id.clone());
                    if let Some(server_id) = server_id {
                        active.remove(&server_id);
                        let id = next_request_id;
                        next_request_id += 1;
                        let request = json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "method": "eth_unsubscribe",
                            "params": [server_id],
                        });
                        if stream.send(Message::Text(request.to_string().into())).await.is_err() {
                            break SessionEnd::Dropped;
                        }
                    }
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => handle_frame(value, &mut pending, &mut active),
                    Err(e) => warn!("discarding malformed subscription frame: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => break SessionEnd::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("subscription socket error: {e}");
                    break SessionEnd::Dropped;
                }
            },
        }
    };

    for (_, waiting) in pending.drain() {
        let _ = waiting.reply.send(Err(ProviderError::NotConnected));
    }
    let _ = stream.close(None).await;
    end
}

/// `eth_subscribe` answers for a subscription type or filter the node does
/// not serve: method not found, invalid params.
const REJECTED_TOPIC_CODES: [i64; 2] = [-32601, -32602];

fn subscribe_params(topic: &SubscriptionTopic) -> Value {
    match topic {
        SubscriptionTopic::NewHeads => json!(["newHeads"]),
        SubscriptionTopic::PendingTransactions { address } => json!([
            "alchemy_pendingTransactions",
            { "fromAddress": address, "toAddress": address }
        ]),
    }
}

fn handle_frame(
    value: Value,
    pending: &mut HashMap<u64, PendingSubscribe>,
    active: &mut HashMap<String, ActiveSubscription>,
) {
    // Response to one of our requests.
    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let Some(waiting) = pending.remove(&id) else {
            return;
        };
        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let error = if REJECTED_TOPIC_CODES.contains(&code) {
                ProviderError::Unsupported(format!("{:?}: {message}", waiting.subscription.topic))
            } else {
                ProviderError::Rpc { code, message }
            };
            let _ = waiting.reply.send(Err(error));
            return;
        }
        match value.get("result").and_then(Value::as_str) {
            Some(server_id) => {
                debug!(server_id, topic = ?waiting.subscription.topic, "subscribed");
                active.insert(server_id.to_string(), waiting.subscription);
                let _ = waiting.reply.send(Ok(()));
            }
            None => {
                let _ = waiting
                    .reply
                    .send(Err(ProviderError::MissingResult("eth_subscribe".into())));
            }
        }
        return;
    }

    // Subscription notification.
    let Some(params) = value.get("params") else {
        return;
    };
    let Some(server_id) = params.get("subscription").and_then(Value::as_str) else {
        return;
    };
    let Some(subscription) = active.get(server_id) else {
        return;
    };
    let result = params.get("result").cloned().unwrap_or(Value::Null);
    let message = match parse_notification(&subscription.topic, result) {
        Ok(message) => message,
        Err(e) => {
            warn!(server_id, "discarding notification: {e}");
            return;
        }
    };
    if subscription.sink.send(message).is_err() {
        debug!(server_id, "subscription sink closed");
        active.remove(server_id);
    }
}

fn parse_notification(topic: &SubscriptionTopic, result: Value) -> Result<SubscriptionMessage, ProviderError> {
    let invalid = |e: serde_json::Error| ProviderError::InvalidResponse(e.to_string());
    match topic {
        SubscriptionTopic::NewHeads => Ok(SubscriptionMessage::NewHead(
            serde_json::from_value::<RpcBlock>(result).map_err(invalid)?,
        )),
        SubscriptionTopic::PendingTransactions { .. } => {
            if result.is_string() {
                Ok(SubscriptionMessage::PendingHash(
                    serde_json::from_value(result).map_err(invalid)?,
                ))
            } else {
                Ok(SubscriptionMessage::PendingTransaction(
                    serde_json::from_value::<RpcTransaction>(result).map_err(invalid)?,
                ))
            }
        }
    }
}
