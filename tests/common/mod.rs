//! Scripted mock peer for session tests.
//!
//! The peer side of an in-memory duplex stream. Tests drive it step by step:
//! receive what the shim sent, assert on it, answer.

#![allow(dead_code)]

use std::time::Duration;

use chaincode_shim::codec::MsgPackCodec;
use chaincode_shim::protocol::{
    encode_message, ChaincodeId, ChaincodeInput, ChaincodeMessage, MessageType, QueryResponse,
    Response,
};
use chaincode_shim::transport::MessageReader;
use chaincode_shim::{Chaincode, Shim, ShimConfig};
use serde::Serialize;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

pub const CHANNEL: &str = "testChannel";

/// Upper bound for anything the shim is expected to send.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Window used to assert that the shim sends nothing.
pub const QUIET_WINDOW: Duration = Duration::from_millis(200);

pub struct MockPeer {
    reader: MessageReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockPeer {
    /// Create a peer and the stream end to hand to the shim.
    pub fn new() -> (MockPeer, DuplexStream) {
        Self::with_buffer(256 * 1024)
    }

    /// Like [`new`](Self::new) with `size` bytes of in-flight buffer. A tiny
    /// buffer stalls the shim's writer until the peer reads.
    pub fn with_buffer(size: usize) -> (MockPeer, DuplexStream) {
        let (shim_side, peer_side) = duplex(size);
        let (read_half, write_half) = tokio::io::split(peer_side);
        let peer = MockPeer {
            reader: MessageReader::new(read_half),
            writer: write_half,
        };
        (peer, shim_side)
    }

    /// Next message from the shim. Panics on timeout or end of stream.
    pub async fn recv(&mut self) -> ChaincodeMessage {
        match tokio::time::timeout(RECV_TIMEOUT, self.reader.receive()).await {
            Ok(Ok(Some(msg))) => msg,
            Ok(Ok(None)) => panic!("shim closed the stream"),
            Ok(Err(e)) => panic!("read failed: {e}"),
            Err(_) => panic!("no message from shim within {RECV_TIMEOUT:?}"),
        }
    }

    /// Next message, asserting its type.
    pub async fn expect(&mut self, msg_type: MessageType) -> ChaincodeMessage {
        let msg = self.recv().await;
        assert_eq!(
            msg.msg_type, msg_type,
            "expected {msg_type}, got {} ({})",
            msg.msg_type,
            msg.payload_text()
        );
        msg
    }

    /// `None` when the shim stays silent for `window`.
    pub async fn try_recv(&mut self, window: Duration) -> Option<ChaincodeMessage> {
        match tokio::time::timeout(window, self.reader.receive()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(_)) | Err(_) => None,
        }
    }

    pub async fn assert_quiet(&mut self) {
        if let Some(msg) = self.try_recv(QUIET_WINDOW).await {
            panic!("unexpected {} from shim", msg.msg_type);
        }
    }

    pub async fn send(&mut self, msg: &ChaincodeMessage) {
        let bytes = encode_message(msg).unwrap();
        self.writer.write_all(&bytes).await.unwrap();
    }

    pub async fn send_type(&mut self, msg_type: MessageType, txid: &str, payload: Vec<u8>) {
        self.send(&ChaincodeMessage::new(msg_type, CHANNEL, txid, payload))
            .await;
    }

    /// Send INIT or TRANSACTION with string arguments.
    pub async fn invoke(&mut self, msg_type: MessageType, txid: &str, args: &[&str]) {
        let input = MsgPackCodec::encode(&ChaincodeInput::from_args(args.iter().copied())).unwrap();
        self.send_type(msg_type, txid, input).await;
    }

    /// Answer `request` with RESPONSE carrying `payload`.
    pub async fn respond(&mut self, request: &ChaincodeMessage, payload: Vec<u8>) {
        let reply = ChaincodeMessage::new(
            MessageType::Response,
            &request.channel_id,
            &request.txid,
            payload,
        );
        self.send(&reply).await;
    }

    pub async fn respond_with<T: Serialize>(&mut self, request: &ChaincodeMessage, body: &T) {
        self.respond(request, MsgPackCodec::encode(body).unwrap())
            .await;
    }

    /// Answer `request` with one query page.
    pub async fn respond_page(
        &mut self,
        request: &ChaincodeMessage,
        id: &str,
        records: Vec<Vec<u8>>,
        has_more: bool,
    ) {
        let page = QueryResponse {
            results: records.into_iter().map(serde_bytes::ByteBuf::from).collect(),
            has_more,
            id: id.to_string(),
        };
        self.respond_with(request, &page).await;
    }

    pub async fn respond_error(&mut self, request: &ChaincodeMessage, message: &str) {
        self.send(&ChaincodeMessage::error(
            &request.channel_id,
            &request.txid,
            message,
        ))
        .await;
    }

    /// Expect REGISTER for `chaincode_id`; returns without answering.
    pub async fn expect_register(&mut self, chaincode_id: &str) {
        let msg = self.expect(MessageType::Register).await;
        let id: ChaincodeId = MsgPackCodec::decode(&msg.payload).unwrap();
        assert_eq!(id.name, chaincode_id);
    }

    /// REGISTER → REGISTERED → READY.
    pub async fn accept_registration(&mut self, chaincode_id: &str) {
        self.expect_register(chaincode_id).await;
        self.send_type(MessageType::Registered, "", Vec::new()).await;
        self.send_type(MessageType::Ready, "", Vec::new()).await;
    }

    /// Expect COMPLETED for `txid` and decode its Response.
    pub async fn expect_completed(&mut self, txid: &str) -> Response {
        let msg = self.expect(MessageType::Completed).await;
        assert_eq!(msg.txid, txid);
        MsgPackCodec::decode(&msg.payload).unwrap()
    }

    /// Expect ERROR for `txid` and return its text.
    pub async fn expect_error(&mut self, txid: &str) -> String {
        let msg = self.expect(MessageType::Error).await;
        assert_eq!(msg.txid, txid);
        msg.payload_text()
    }
}

pub fn test_config() -> ShimConfig {
    ShimConfig::new("testcc").request_timeout(RECV_TIMEOUT)
}

/// Start a session with `config` and complete the handshake.
pub async fn start_with<C: Chaincode>(config: ShimConfig, chaincode: C) -> (Shim, MockPeer) {
    let (peer, stream) = MockPeer::new();
    start_on(peer, stream, config, chaincode).await
}

/// Start a session over an already created peer/stream pair.
pub async fn start_on<C: Chaincode>(
    mut peer: MockPeer,
    stream: DuplexStream,
    config: ShimConfig,
    chaincode: C,
) -> (Shim, MockPeer) {
    let chaincode_id = config.chaincode_id.clone();
    let shim = tokio::spawn(Shim::start(stream, config, chaincode));

    peer.accept_registration(&chaincode_id).await;
    let shim = shim.await.unwrap().unwrap();
    (shim, peer)
}

pub async fn start<C: Chaincode>(chaincode: C) -> (Shim, MockPeer) {
    start_with(test_config(), chaincode).await
}

pub fn key_value(key: &str, value: &str) -> Vec<u8> {
    MsgPackCodec::encode(&chaincode_shim::KeyValue {
        key: key.to_string(),
        value: value.as_bytes().to_vec(),
    })
    .unwrap()
}
