//! Message encoding and decoding for the TCP transport.
//!
//! # Wire format
//!
//! ```text
//! [length: u32 BE][version: u8][payload: JSON-encoded frame body]
//! ```
//!
//! The length covers the version byte and the payload. Peer protocol
//! messages and client requests share one frame type, [`WireRequest`];
//! peer messages are fire-and-forget (no response frame), everything else
//! is answered with a [`WireResponse`] on the same connection.

use consort_core::{NodeStatus, OutboundMessage, SubmitOutcome};
use consort_types::{Command, NodeId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on a single frame; replication batches stay far below.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown wire version: {0}")]
    UnknownVersion(u8),

    #[error("frame too short")]
    FrameTooShort,

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that can arrive on a node's listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireRequest {
    /// Consensus traffic from a peer node. Fire-and-forget.
    Peer {
        from: NodeId,
        message: OutboundMessage,
    },
    /// Client submission of a command for replication.
    Submit { command: Command },
    /// Client read against the local store.
    Get { key: String },
    /// Control: replace the blocked-peers set.
    SetPartition { blocked: Vec<NodeId> },
    /// Control: liveness probe.
    Ping,
    /// Control: protocol state snapshot.
    Status,
}

/// Answers for the request/response subset of [`WireRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireResponse {
    Submit(SubmitReply),
    Value { value: Option<String> },
    Ack,
    Pong { node_id: NodeId },
    Status(NodeStatus),
    Error { message: String },
}

/// Client-visible outcome of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReply {
    pub ok: bool,
    /// Log index / sequence number when committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    /// Where to retry when not the leader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_hint: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<SubmitOutcome> for SubmitReply {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Committed { index } => SubmitReply {
                ok: true,
                index: Some(index),
                leader_hint: None,
                error: None,
            },
            SubmitOutcome::NotLeader { hint } => SubmitReply {
                ok: false,
                index: None,
                leader_hint: hint,
                error: Some("not leader".to_string()),
            },
            SubmitOutcome::Rejected { reason } => SubmitReply {
                ok: false,
                index: None,
                leader_hint: None,
                error: Some(reason),
            },
            SubmitOutcome::TimedOut => SubmitReply {
                ok: false,
                index: None,
                leader_hint: None,
                error: Some("timed out waiting for commit".to_string()),
            },
        }
    }
}

/// Encode a frame body to wire bytes, length prefix included.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(value)?;
    let body_len = payload.len() + 1;
    if body_len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(body_len));
    }

    let mut bytes = Vec::with_capacity(4 + body_len);
    bytes.extend_from_slice(&(body_len as u32).to_be_bytes());
    bytes.push(WIRE_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a frame body (version byte + payload, length prefix stripped).
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    let (&version, payload) = body.split_first().ok_or(CodecError::FrameTooShort)?;
    if version != WIRE_VERSION {
        return Err(CodecError::UnknownVersion(version));
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Write one frame to an async stream.
pub async fn write_frame<T: Serialize, W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: &T,
) -> Result<(), CodecError> {
    let bytes = encode_frame(value)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from an async stream.
pub async fn read_frame<T: DeserializeOwned, R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<T, CodecError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len == 0 {
        return Err(CodecError::FrameTooShort);
    }
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode_body(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use consort_types::message::RequestVoteArgs;

    #[test]
    fn frame_round_trip() {
        let request = WireRequest::Peer {
            from: NodeId(3),
            message: OutboundMessage::RequestVote(RequestVoteArgs {
                term: 7,
                candidate_id: NodeId(3),
                last_log_index: 12,
                last_log_term: 6,
            }),
        };

        let bytes = encode_frame(&request).unwrap();
        let len = u32::from_be_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - 4);
        assert_eq!(bytes[4], WIRE_VERSION);

        let decoded: WireRequest = decode_body(&bytes[4..]).unwrap();
        match decoded {
            WireRequest::Peer { from, message } => {
                assert_eq!(from, NodeId(3));
                assert_eq!(message.type_name(), "RequestVote");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = encode_frame(&WireRequest::Ping).unwrap();
        bytes[4] = 99;
        let result: Result<WireRequest, _> = decode_body(&bytes[4..]);
        assert!(matches!(result, Err(CodecError::UnknownVersion(99))));
    }

    #[test]
    fn empty_body_is_rejected() {
        let result: Result<WireRequest, _> = decode_body(&[]);
        assert!(matches!(result, Err(CodecError::FrameTooShort)));
    }

    #[tokio::test]
    async fn async_stream_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, &WireResponse::Pong { node_id: NodeId(5) })
            .await
            .unwrap();
        let response: WireResponse = read_frame(&mut b).await.unwrap();
        assert!(matches!(response, WireResponse::Pong { node_id: NodeId(5) }));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocation() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut a, &len).await.unwrap();

        let result: Result<WireRequest, _> = read_frame(&mut b).await;
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }

    #[test]
    fn submit_reply_from_outcomes() {
        let reply: SubmitReply = SubmitOutcome::Committed { index: 4 }.into();
        assert!(reply.ok);
        assert_eq!(reply.index, Some(4));

        let reply: SubmitReply = SubmitOutcome::NotLeader {
            hint: Some(NodeId(2)),
        }
        .into();
        assert!(!reply.ok);
        assert_eq!(reply.leader_hint, Some(NodeId(2)));

        let reply: SubmitReply = SubmitOutcome::TimedOut.into();
        assert!(!reply.ok);
        assert!(reply.error.unwrap().contains("timed out"));
    }
}
