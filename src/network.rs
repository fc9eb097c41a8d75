//! Minimal bitcoin P2P client for fetching block bodies.
//!
//! Each fetch opens a fresh connection to a randomly chosen peer, performs the
//! version handshake and asks for a single witness block. Message framing is
//! `bitcoin`'s `RawNetworkMessage`; this module only moves frames over tokio.

use crate::blockchain::{BlockHash, BlockRecord};
use crate::error::{FacadeError, Result};
use crate::sources::PeerNetwork;
use async_trait::async_trait;
use bitcoin::consensus;
use bitcoin::p2p::message::{NetworkMessage, RawNetworkMessage};
use bitcoin::p2p::message_blockdata::Inventory;
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::{Address, Magic, ServiceFlags};
use rand::seq::SliceRandom;
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

pub const PROTOCOL_VERSION: u32 = 70015;
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;
const MESSAGE_HEADER_SIZE: usize = 24;

pub fn encode_message(magic: Magic, message: NetworkMessage) -> Vec<u8> {
    consensus::serialize(&RawNetworkMessage::new(magic, message))
}

/// Reads one frame, checking magic and size before the payload is buffered.
pub async fn read_message<R>(reader: &mut R, magic: Magic) -> Result<NetworkMessage>
where
    R: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; MESSAGE_HEADER_SIZE];
    reader.read_exact(&mut frame).await?;
    if frame[0..4] != magic.to_bytes() {
        return Err(FacadeError::Protocol(format!(
            "unexpected network magic {}",
            hex::encode(&frame[0..4])
        )));
    }

    let length = u32::from_le_bytes([frame[16], frame[17], frame[18], frame[19]]) as usize;
    if length > MAX_PAYLOAD_SIZE {
        return Err(FacadeError::Protocol(format!(
            "payload of {} bytes exceeds limit",
            length
        )));
    }

    frame.resize(MESSAGE_HEADER_SIZE + length, 0);
    reader.read_exact(&mut frame[MESSAGE_HEADER_SIZE..]).await?;
    let raw: RawNetworkMessage = consensus::deserialize(&frame)
        .map_err(|e| FacadeError::Protocol(format!("undecodable message: {}", e)))?;
    Ok(raw.into_payload())
}

async fn send<W>(writer: &mut W, magic: Magic, message: NetworkMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_message(magic, message)).await?;
    writer.flush().await?;
    Ok(())
}

/// Version announcement with no services and relay off.
pub fn version_message(user_agent: &str, nonce: u64) -> VersionMessage {
    let unspecified = SocketAddr::from(([0, 0, 0, 0], 0));
    let mut version = VersionMessage::new(
        ServiceFlags::NONE,
        chrono::Utc::now().timestamp(),
        Address::new(&unspecified, ServiceFlags::NONE),
        Address::new(&unspecified, ServiceFlags::NONE),
        nonce,
        user_agent.to_string(),
        0,
    );
    version.version = PROTOCOL_VERSION;
    version.relay = false;
    version
}

pub fn getdata_message(hash: &BlockHash) -> NetworkMessage {
    NetworkMessage::GetData(vec![Inventory::WitnessBlock(*hash)])
}

pub struct PeerClient {
    peers: Vec<String>,
    magic: Magic,
    timeout: Duration,
    user_agent: String,
}

impl PeerClient {
    pub fn new(peers: Vec<String>, magic: Magic, timeout: Duration) -> Self {
        Self {
            peers,
            magic,
            timeout,
            user_agent: format!("/chainfacade:{}/", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    async fn fetch_from(&self, peer: &str, hash: &BlockHash) -> Result<Option<BlockRecord>> {
        let mut stream = TcpStream::connect(peer)
            .await
            .map_err(|e| FacadeError::Transport(format!("connect to {}: {}", peer, e)))?;

        self.handshake(&mut stream).await?;
        debug!(peer, hash = %hash, "handshake complete, requesting block");
        send(&mut stream, self.magic, getdata_message(hash)).await?;

        loop {
            match read_message(&mut stream, self.magic).await? {
                NetworkMessage::Block(block) => {
                    if block.block_hash() == *hash {
                        return Ok(Some(BlockRecord::from_block(&block)));
                    }
                    debug!(peer, got = %block.block_hash(), "ignoring unrequested block");
                }
                NetworkMessage::NotFound(_) => return Ok(None),
                NetworkMessage::Ping(nonce) => {
                    send(&mut stream, self.magic, NetworkMessage::Pong(nonce)).await?
                }
                other => debug!(peer, command = other.cmd(), "ignoring message"),
            }
        }
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<()> {
        let nonce = rand::thread_rng().gen::<u64>();
        let version = version_message(&self.user_agent, nonce);
        send(stream, self.magic, NetworkMessage::Version(version)).await?;

        let (mut got_version, mut got_verack) = (false, false);
        while !(got_version && got_verack) {
            match read_message(stream, self.magic).await? {
                NetworkMessage::Version(_) => {
                    got_version = true;
                    send(stream, self.magic, NetworkMessage::Verack).await?;
                }
                NetworkMessage::Verack => got_verack = true,
                NetworkMessage::Ping(nonce) => {
                    send(stream, self.magic, NetworkMessage::Pong(nonce)).await?
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PeerNetwork for PeerClient {
    async fn get_block(&self, hash: &BlockHash) -> Result<Option<BlockRecord>> {
        let peer = self
            .peers
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| FacadeError::Transport("no p2p peers configured".into()))?;

        match tokio::time::timeout(self.timeout, self.fetch_from(peer, hash)).await {
            Ok(Ok(block)) => Ok(block),
            Ok(Err(FacadeError::Io(e))) => Err(FacadeError::Transport(format!("{}: {}", peer, e))),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                info!(peer = %peer, hash = %hash, "peer fetch timed out");
                Err(FacadeError::Transport(format!(
                    "{} timed out after {:?}",
                    peer, self.timeout
                )))
            }
        }
    }
}
