use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::common::{LinkError, LinkResult};
use crate::config::{ClientConfig, NodeConfig};
use crate::protocol::{NodeMessage, OutboundMessage};

/// One classified frame (or lifecycle notice) from a node, tagged with the
/// node it came from so a shared sink can fan messages back out.
#[derive(Debug)]
pub struct ChannelEvent {
    pub node: String,
    pub payload: ChannelPayload,
}

#[derive(Debug)]
pub enum ChannelPayload {
    Message(NodeMessage),
    /// The receive loop ended; the channel will not recover on its own.
    Closed,
}

/// Persistent bidirectional message channel to a single node.
///
/// Owns the websocket plus its receive loop and write task. Reconnecting is
/// deliberately not handled here: blindly re-dialing from inside the channel
/// could replay commands into a fresh node session, so the pool decides
/// whether and when a replacement connection is made.
#[derive(Debug)]
pub struct ProtocolChannel {
    node: String,
    outbound: flume::Sender<Message>,
    connected: Arc<AtomicBool>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl ProtocolChannel {
    /// Dial the node and authenticate. Returns as soon as the handshake
    /// completes; inbound traffic flows to `sink` from a spawned task.
    pub async fn connect(
        config: &NodeConfig,
        identity: &ClientConfig,
        connected: Arc<AtomicBool>,
        sink: flume::Sender<ChannelEvent>,
    ) -> LinkResult<Self> {
        let name = config.display_name();
        let url = format!("ws://{}:{}/", config.host, config.port);

        let mut request = url
            .into_client_request()
            .map_err(|e| LinkError::ConnectionRefused {
                node: name.clone(),
                message: e.to_string(),
            })?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            header_value(&config.password, &name)?,
        );
        headers.insert(
            "User-Id",
            header_value(&identity.user_id.to_string(), &name)?,
        );
        headers.insert(
            "Client-Name",
            header_value(&identity.client_name, &name)?,
        );

        debug!(node = %name, "connecting as {} ({})", identity.client_name, identity.user_id);

        let (ws_stream, _) = connect_async(request).await.map_err(|e| match e {
            WsError::Http(response) => LinkError::HandshakeRejected {
                node: name.clone(),
                status: response.status().as_u16(),
            },
            other => LinkError::ConnectionRefused {
                node: name.clone(),
                message: other.to_string(),
            },
        })?;
        info!(node = %name, "connected");
        connected.store(true, Ordering::Relaxed);

        let (mut write, mut read) = ws_stream.split();
        let (tx, rx) = flume::unbounded::<Message>();

        let write_node = name.clone();
        let write_task = tokio::spawn(async move {
            while let Ok(msg) = rx.recv_async().await {
                if let Err(e) = write.send(msg).await {
                    warn!(node = %write_node, "websocket write failed: {e}");
                    break;
                }
            }
        });

        let read_node = name.clone();
        let read_connected = connected.clone();
        let read_task = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let message = NodeMessage::classify(&text);
                        if let NodeMessage::Unknown { op, .. } = &message {
                            debug!(
                                node = %read_node,
                                "dropping unrecognized payload (op {op:?})"
                            );
                        }
                        let event = ChannelEvent {
                            node: read_node.clone(),
                            payload: ChannelPayload::Message(message),
                        };
                        if sink.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        info!(node = %read_node, "node closed the connection: {frame:?}");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(node = %read_node, "websocket read failed: {e}");
                        break;
                    }
                }
            }
            read_connected.store(false, Ordering::Relaxed);
            let _ = sink.send(ChannelEvent {
                node: read_node,
                payload: ChannelPayload::Closed,
            });
        });

        Ok(Self {
            node: name,
            outbound: tx,
            connected,
            read_task,
            write_task,
        })
    }

    /// Serialize and queue one command. No retry: a failure means the write
    /// task is gone and the channel is dead.
    pub fn send(&self, command: &OutboundMessage) -> LinkResult<()> {
        let json = serde_json::to_string(command)?;
        debug!(node = %self.node, "sending command :: {json}");
        self.outbound
            .send(Message::Text(json.into()))
            .map_err(|_| LinkError::ChannelWrite {
                node: self.node.clone(),
            })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Tear the channel down without waiting for the socket.
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.read_task.abort();
        self.write_task.abort();
    }
}

#[cfg(test)]
impl ProtocolChannel {
    /// A channel without a socket: sends land in the returned receiver.
    pub(crate) fn loopback(
        node: &str,
        connected: Arc<AtomicBool>,
    ) -> (Self, flume::Receiver<Message>) {
        let (tx, rx) = flume::unbounded();
        connected.store(true, Ordering::Relaxed);
        let channel = Self {
            node: node.to_string(),
            outbound: tx,
            connected,
            read_task: tokio::spawn(async {}),
            write_task: tokio::spawn(async {}),
        };
        (channel, rx)
    }
}

impl Drop for ProtocolChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn header_value(value: &str, node: &str) -> LinkResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| LinkError::ConnectionRefused {
        node: node.to_string(),
        message: "handshake header contains invalid characters".into(),
    })
}
