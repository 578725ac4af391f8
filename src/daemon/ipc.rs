// Unix socket IPC with a length-prefixed JSON protocol
//
// Every frame is a big-endian u32 byte count followed by that many bytes of JSON.
// A connection carries exactly one request and one response.

use crate::error::{KnowError, Result};
use crate::storage::{ArticleEdit, NewArticle};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Maximum frame size (10MB)
const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Requests sent from the CLI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IpcMessage {
    Create { article: NewArticle },
    Update { id: i64, edit: ArticleEdit },
    Delete { id: i64 },
    Get { id: i64 },
    Search { query: String, limit: usize },
    /// Popular tags, most frequent first
    Tags,
    /// Re-queue articles missing tags or a summary
    Sweep,
    /// Re-queue one article regardless of its state
    Reprocess { id: i64 },
    /// Load `count` dataset rows as articles and queue them
    Seed { count: i64 },
    /// Delete every article, vector and tag count
    Clear,
    Status,
    Stop,
}

/// Response sent from the daemon back to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn success_with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Serialize `value` as the response payload
    pub fn with_data<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Self::success_with_data(data),
            Err(e) => Self::error(format!("Failed to encode response: {}", e)),
        }
    }

    /// Decode the payload, failing if the daemon reported an error
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T> {
        if !self.success {
            return Err(KnowError::Daemon(
                self.message.unwrap_or_else(|| "Request failed".to_string()),
            ));
        }
        let data = self.data.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(data).map_err(|e| KnowError::Json {
            source: e,
            context: "Failed to decode response payload".to_string(),
        })
    }
}

/// Unix domain socket server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Bind the socket, replacing any stale socket file
    pub async fn bind(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| KnowError::Io {
                source: e,
                context: format!("Failed to remove existing socket: {:?}", self.socket_path),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KnowError::Io {
                source: e,
                context: format!("Failed to create socket directory: {:?}", parent),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| KnowError::Io {
            source: e,
            context: format!("Failed to bind to socket: {:?}", self.socket_path),
        })?;
        self.listener = Some(listener);

        tracing::info!("IPC server listening on {:?}", self.socket_path);
        Ok(())
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| KnowError::Daemon("Server not bound".to_string()))?;

        let (stream, _addr) = listener.accept().await.map_err(|e| KnowError::Io {
            source: e,
            context: "Failed to accept connection".to_string(),
        })?;
        Ok(stream)
    }

    /// Remove the socket file
    pub fn shutdown(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| KnowError::Io {
                source: e,
                context: format!("Failed to remove socket: {:?}", self.socket_path),
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn read_frame<R, T>(reader: &mut R, what: &str) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let length = reader.read_u32().await.map_err(|e| KnowError::Io {
        source: e,
        context: format!("Failed to read {} length", what),
    })?;

    if length > MAX_MESSAGE_SIZE {
        return Err(KnowError::Daemon(format!(
            "{} too large: {} bytes (max: {})",
            what, length, MAX_MESSAGE_SIZE
        )));
    }

    let mut buffer = vec![0u8; length as usize];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|e| KnowError::Io {
            source: e,
            context: format!("Failed to read {} payload", what),
        })?;

    serde_json::from_slice(&buffer).map_err(|e| KnowError::Json {
        source: e,
        context: format!("Failed to deserialize {}", what),
    })
}

async fn write_frame<W, T>(writer: &mut W, value: &T, what: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(|e| KnowError::Json {
        source: e,
        context: format!("Failed to serialize {}", what),
    })?;

    if payload.len() > MAX_MESSAGE_SIZE as usize {
        return Err(KnowError::Daemon(format!(
            "{} too large: {} bytes (max: {})",
            what,
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let io = |context: &str| {
        let context = format!("Failed to write {} {}", what, context);
        move |source: std::io::Error| KnowError::Io { source, context }
    };
    writer
        .write_u32(payload.len() as u32)
        .await
        .map_err(io("length"))?;
    writer.write_all(&payload).await.map_err(io("payload"))?;
    writer.flush().await.map_err(io("flush"))?;

    Ok(())
}

pub async fn read_message(stream: &mut UnixStream) -> Result<IpcMessage> {
    read_frame(stream, "message").await
}

pub async fn write_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
    write_frame(stream, response, "response").await
}

/// Client side of the daemon socket
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send one request and wait for its response
    pub async fn send(&self, message: &IpcMessage) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
            ) {
                KnowError::DaemonNotRunning
            } else {
                KnowError::Io {
                    source: e,
                    context: format!("Failed to connect to daemon at {:?}", self.socket_path),
                }
            }
        })?;

        write_frame(&mut stream, message, "message").await?;
        read_frame(&mut stream, "response").await
    }
}
