//! TCP transport: a concrete [`Channel`] over a length-prefixed, `serde_json`-encoded frame
//! stream (§4.7 of the design notes — this codec is one implementation of `Channel`, not part
//! of the handshake FSM itself).
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{trace, warn};

use crate::address::{PeerAddress, Services};
use crate::crypto::{ChallengeNonce, Signature};
use crate::error::{CloseReason, Error};
use crate::events::InboundFrame;
use crate::time::LocalTime;
use crate::traits::{Channel, ProtocolMask};

/// The on-wire representation of a frame. Distinct from [`InboundFrame`]: this type is what
/// actually crosses the socket, while `InboundFrame` is what the agent's FSM consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireMessage {
    Version {
        peer_address: PeerAddress,
        protocol_version: u32,
        genesis_hash: [u8; 32],
        head_hash: [u8; 32],
        challenge_nonce: ChallengeNonce,
    },
    Verack {
        public_key: Vec<u8>,
        signature: Vec<u8>,
    },
    Addr(Vec<PeerAddress>),
    GetAddr {
        protocols: u8,
        services: u64,
    },
    Ping(u32),
    Pong(u32),
    Reject {
        message_type: String,
        code: String,
        reason: String,
    },
    Close {
        code: String,
        reason: String,
    },
}

type WriteHalf = futures::stream::SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
type ReadHalf = futures::stream::SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;

/// A single TCP connection to a peer, implementing [`Channel`] by framing `serde_json`
/// messages behind a four-byte length prefix.
pub struct TcpChannel {
    sink: Mutex<WriteHalf>,
    peer_address: StdMutex<Option<PeerAddress>>,
    last_message_received_at: StdMutex<LocalTime>,
    closed: AtomicBool,
    genesis_hash: [u8; 32],
}

impl TcpChannel {
    /// Split `stream` into a [`TcpChannel`] and a background reader task that decodes inbound
    /// frames and forwards them on the returned receiver. The reader task exits (and marks the
    /// channel closed) when the socket is torn down. `genesis_hash` is stamped on every
    /// outbound version message; it's a property of the network this channel belongs to, not
    /// of any one peer.
    pub fn split(
        stream: TcpStream,
        peer_address: Option<PeerAddress>,
        genesis_hash: [u8; 32],
    ) -> (std::sync::Arc<Self>, mpsc::Receiver<InboundFrame>) {
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let (sink, stream) = framed.split();

        let channel = std::sync::Arc::new(Self {
            sink: Mutex::new(sink),
            peer_address: StdMutex::new(peer_address),
            last_message_received_at: StdMutex::new(LocalTime::now()),
            closed: AtomicBool::new(false),
            genesis_hash,
        });

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(read_loop(stream, tx, channel.clone()));

        (channel, rx)
    }

    async fn send(&self, message: &WireMessage) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let encoded = match encode(message) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "failed to encode outbound frame");
                return false;
            }
        };

        let mut sink = self.sink.lock().await;
        match sink.send(Bytes::from(encoded)).await {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "failed to write outbound frame");
                self.closed.store(true, Ordering::Release);
                false
            }
        }
    }
}

fn encode(message: &WireMessage) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(message).map_err(Error::Encode)
}

fn decode_frame(bytes: &[u8]) -> Result<WireMessage, Error> {
    serde_json::from_slice(bytes).map_err(Error::Decode)
}

async fn read_loop(mut stream: ReadHalf, tx: mpsc::Sender<InboundFrame>, channel: std::sync::Arc<TcpChannel>) {
    while let Some(next) = stream.next().await {
        let bytes = match next {
            Ok(bytes) => bytes,
            Err(error) => {
                trace!(%error, "reading frame failed, closing");
                break;
            }
        };

        let message = match decode_frame(&bytes) {
            Ok(message) => message,
            Err(error) => {
                trace!(%error, "dropping malformed frame");
                continue;
            }
        };

        *channel.last_message_received_at.lock().unwrap() = LocalTime::now();

        let frame = match decode(message) {
            Some(frame) => frame,
            None => continue,
        };
        if tx.send(frame).await.is_err() {
            break;
        }
    }

    channel.closed.store(true, Ordering::Release);
    let _ = tx.send(InboundFrame::Close).await;
}

fn decode(message: WireMessage) -> Option<InboundFrame> {
    match message {
        WireMessage::Version {
            peer_address,
            protocol_version,
            genesis_hash,
            head_hash,
            challenge_nonce,
        } => Some(InboundFrame::Version {
            peer_address,
            protocol_version,
            genesis_hash,
            head_hash,
            challenge_nonce,
        }),
        WireMessage::Verack { public_key, signature } => {
            let public_key = bitcoin::secp256k1::PublicKey::from_slice(&public_key).ok()?;
            let signature = bitcoin::secp256k1::ecdsa::Signature::from_der(&signature)
                .or_else(|_| bitcoin::secp256k1::ecdsa::Signature::from_compact(&signature))
                .ok()?;
            Some(InboundFrame::Verack {
                public_key,
                signature: Signature(signature),
            })
        }
        WireMessage::Addr(addresses) => Some(InboundFrame::Addr(addresses)),
        WireMessage::GetAddr { protocols, services } => Some(InboundFrame::GetAddr {
            protocols: ProtocolMask(protocols),
            services: Services(services),
        }),
        WireMessage::Ping(nonce) => Some(InboundFrame::Ping(nonce)),
        WireMessage::Pong(nonce) => Some(InboundFrame::Pong(nonce)),
        WireMessage::Reject { .. } => None,
        WireMessage::Close { .. } => Some(InboundFrame::Close),
    }
}

#[async_trait::async_trait]
impl Channel for TcpChannel {
    fn peer_address(&self) -> Option<PeerAddress> {
        self.peer_address.lock().unwrap().clone()
    }

    fn set_peer_address(&self, address: PeerAddress) {
        *self.peer_address.lock().unwrap() = Some(address);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn last_message_received_at(&self) -> LocalTime {
        *self.last_message_received_at.lock().unwrap()
    }

    async fn send_version(&self, self_address: &PeerAddress, head_hash: [u8; 32], nonce: ChallengeNonce) -> bool {
        self.send(&WireMessage::Version {
            peer_address: self_address.clone(),
            protocol_version: crate::constants::PROTOCOL_VERSION,
            genesis_hash: self.genesis_hash,
            head_hash,
            challenge_nonce: nonce,
        })
        .await
    }

    async fn send_verack(&self, public_key: bitcoin::secp256k1::PublicKey, signature: Signature) -> bool {
        self.send(&WireMessage::Verack {
            public_key: public_key.serialize().to_vec(),
            signature: signature.0.serialize_der().to_vec(),
        })
        .await
    }

    async fn send_addr(&self, addresses: Vec<PeerAddress>) -> bool {
        self.send(&WireMessage::Addr(addresses)).await
    }

    async fn send_get_addr(&self, protocols: ProtocolMask, services: Services) -> bool {
        self.send(&WireMessage::GetAddr {
            protocols: protocols.0,
            services: services.0,
        })
        .await
    }

    async fn send_ping(&self, nonce: u32) -> bool {
        self.send(&WireMessage::Ping(nonce)).await
    }

    async fn send_pong(&self, nonce: u32) -> bool {
        self.send(&WireMessage::Pong(nonce)).await
    }

    async fn send_reject(&self, message_type: &str, code: &str, reason: &str) {
        self.send(&WireMessage::Reject {
            message_type: message_type.to_string(),
            code: code.to_string(),
            reason: reason.to_string(),
        })
        .await;
    }

    async fn close(&self, code: CloseReason, reason: &str) {
        self.send(&WireMessage::Close {
            code: code.code().to_string(),
            reason: reason.to_string(),
        })
        .await;
        self.closed.store(true, Ordering::Release);
    }
}
