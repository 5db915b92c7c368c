use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::error::{Result, TransferError};
use crate::utils;

/// Broker-assigned identifier for one reachable peer endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentifier {
    pub id: String,
}

impl PeerIdentifier {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for PeerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<PeerIdentifier> for String {
    fn from(identifier: PeerIdentifier) -> String {
        identifier.id
    }
}

impl Serialize for PeerIdentifier {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.id.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PeerIdentifier {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = String::deserialize(deserializer)?;
        Ok(PeerIdentifier::new(id))
    }
}

/// Transfer-scoped token correlating one FilePayload with its
/// Acknowledgement. Correlation is by token rather than filename so two
/// queued files that happen to share a name reconcile independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferToken(pub String);

impl TransferToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransferToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one established connection, scoped to this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a selected file's bytes come from
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Vec<u8>),
}

/// A file the user picked for sending: name, MIME type, size and a
/// byte-content accessor
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub token: TransferToken,
    pub name: String,
    pub mime: String,
    pub size: u64,
    source: FileSource,
}

impl SelectedFile {
    /// Select a file on disk. The bytes are not read until the send is
    /// triggered.
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }

        let name = utils::get_filename(path).ok_or_else(|| {
            TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no filename",
            ))
        })?;
        let mime = utils::guess_mime(&name).to_string();

        Ok(Self {
            token: TransferToken::new(),
            name,
            mime,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Select an already-materialized buffer (drop-surface handles, tests)
    pub fn from_bytes(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            token: TransferToken::new(),
            name: name.into(),
            mime: mime.into(),
            size: bytes.len() as u64,
            source: FileSource::Memory(bytes),
        }
    }

    /// Read the full file contents into memory
    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        match &self.source {
            FileSource::Path(path) => Ok(tokio::fs::read(path).await?),
            FileSource::Memory(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Why a send did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    AckTimeout,
    ConnectionClosed,
    ConnectionError(String),
    ReadError(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::AckTimeout => write!(f, "no acknowledgement before timeout"),
            FailureReason::ConnectionClosed => {
                write!(f, "connection closed before acknowledgement")
            }
            FailureReason::ConnectionError(reason) => write!(f, "connection error: {}", reason),
            FailureReason::ReadError(reason) => write!(f, "could not read file: {}", reason),
        }
    }
}

/// Sender-side lifecycle of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendState {
    Queued,
    InFlight,
    Acknowledged,
    Failed(FailureReason),
}

impl SendState {
    /// Queued and in-flight files are still waiting on the peer
    pub fn is_active(&self) -> bool {
        matches!(self, SendState::Queued | SendState::InFlight)
    }
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendState::Queued => write!(f, "queued"),
            SendState::InFlight => write!(f, "in-flight"),
            SendState::Acknowledged => write!(f, "acknowledged"),
            SendState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Sender-side record of a file that has not been acknowledged yet
#[derive(Debug, Clone)]
pub struct OutstandingFile {
    pub file: SelectedFile,
    pub state: SendState,
}

impl OutstandingFile {
    pub fn queued(file: SelectedFile) -> Self {
        Self {
            file,
            state: SendState::Queued,
        }
    }
}

/// Receiver-side record of one completed FilePayload. Immutable; the
/// session's artifact list is append-only and never deduplicated.
#[derive(Debug, Clone)]
pub struct ReceivedArtifact {
    pub token: TransferToken,
    pub filename: String,
    pub filetype: String,
    pub filesize: u64,
    bytes: Arc<Vec<u8>>,
}

impl ReceivedArtifact {
    pub fn new(
        token: TransferToken,
        filename: impl Into<String>,
        filetype: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            token,
            filename: filename.into(),
            filetype: filetype.into(),
            filesize: bytes.len() as u64,
            bytes: Arc::new(bytes),
        }
    }

    /// The exact bytes that were transferred
    pub fn content(&self) -> &[u8] {
        &self.bytes
    }

    /// Save the artifact into a directory, returning the written path.
    /// Only the filename component of the declared name is used, so a
    /// remote peer cannot steer the write outside the directory. If a file
    /// with that name already exists the token is spliced into the name;
    /// two artifacts may legitimately share a filename.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        let safe_name = Path::new(&self.filename)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("artifact-{}", self.token));

        let mut path = dir.join(&safe_name);
        if tokio::fs::try_exists(&path).await? {
            let base = Path::new(&safe_name);
            let stem = base
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| "artifact".to_string());
            let renamed = match base.extension().and_then(|ext| ext.to_str()) {
                Some(ext) => format!("{}-{}.{}", stem, self.token, ext),
                None => format!("{}-{}", stem, self.token),
            };
            path = dir.join(renamed);
        }

        tokio::fs::write(&path, self.bytes.as_slice()).await?;
        Ok(path)
    }
}

/// Events the protocol core exposes to the UI layer
#[derive(Debug, Clone)]
pub enum TransferEvent {
    IdentityReady {
        identifier: PeerIdentifier,
    },
    ConnectionOpened {
        connection: ConnectionId,
        remote: Option<PeerIdentifier>,
    },
    ConnectionClosed {
        connection: ConnectionId,
    },
    ConnectionFailed {
        connection: ConnectionId,
        reason: String,
    },
    FileQueued {
        token: TransferToken,
        filename: String,
    },
    FileRemoved {
        token: TransferToken,
        filename: String,
    },
    SendStarted {
        count: usize,
    },
    FileInFlight {
        token: TransferToken,
        filename: String,
    },
    FileAcknowledged {
        token: TransferToken,
        filename: String,
    },
    FileFailed {
        token: TransferToken,
        filename: String,
        reason: FailureReason,
    },
    FileReceived {
        token: TransferToken,
        filename: String,
        filesize: u64,
    },
    AcknowledgementSent {
        token: TransferToken,
        filename: String,
    },
}
