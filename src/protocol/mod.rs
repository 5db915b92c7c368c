use serde::{Deserialize, Serialize};

use crate::core::domain::TransferToken;
use crate::core::error::{Result, TransferError};

pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const PROTOCOL_ID: &str = "/peerbeam/file-transfer/1.0.0";

/// Messages exchanged over an open connection. One FilePayload carries one
/// whole file; the protocol never splits a file across messages, so the
/// transport must accept frames at least as large as the largest file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// One complete file with its metadata
    FilePayload {
        token: TransferToken,
        filename: String,
        filetype: String,
        filesize: u64,
        filedata: Vec<u8>,
    },
    /// Confirms receipt of exactly one FilePayload; `ack` carries the
    /// filename for display, `token` is what the sender reconciles on
    Acknowledgement { token: TransferToken, ack: String },
}

impl WireMessage {
    pub fn payload(
        token: TransferToken,
        filename: impl Into<String>,
        filetype: impl Into<String>,
        filedata: Vec<u8>,
    ) -> Self {
        WireMessage::FilePayload {
            token,
            filename: filename.into(),
            filetype: filetype.into(),
            filesize: filedata.len() as u64,
            filedata,
        }
    }

    pub fn ack(token: TransferToken, filename: impl Into<String>) -> Self {
        WireMessage::Acknowledgement {
            token,
            ack: filename.into(),
        }
    }

    /// Enforce the filesize invariant: the declared size must equal the
    /// byte length of the payload.
    pub fn validate(&self) -> Result<()> {
        if let WireMessage::FilePayload {
            filename,
            filesize,
            filedata,
            ..
        } = self
        {
            let actual = filedata.len() as u64;
            if *filesize != actual {
                return Err(TransferError::SizeMismatch {
                    filename: filename.clone(),
                    declared: *filesize,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Serialize a message for the wire. Invalid messages never leave the
/// process.
pub fn encode_frame(message: &WireMessage) -> Result<Vec<u8>> {
    message.validate()?;
    Ok(serde_json::to_vec(message)?)
}

/// Parse and validate one frame. Malformed frames come back as errors and
/// must not poison the caller's event loop.
pub fn decode_frame(bytes: &[u8]) -> Result<WireMessage> {
    let message: WireMessage = serde_json::from_slice(bytes)?;
    message.validate()?;
    Ok(message)
}
