//! Negotiation tokens and settings exchange shared by every RPC: fixed
//! accept/stop/error strings, and the settings-then-accept preamble that
//! begins FormContract and every ReviseContract/Download iteration.

use tokio::io::{AsyncRead, AsyncWrite};

use storage_host_common::encoding::{read_bincode, read_string, write_bincode, write_string};

use crate::negotiation::error::NegotiationError;
use crate::settings::HostInternalSettings;

/// Token the peer sends to proceed past a negotiation checkpoint.
pub const ACCEPTED: &str = "accepted";
/// Token a client may send instead of a new batch to end a ReviseContract
/// or Download loop gracefully.
pub const STOP: &str = "stop";

pub const MAX_TOKEN_SIZE: usize = 256;

pub fn error_token(msg: &str) -> String {
    format!("error: {msg}")
}

/// Sends `settings`, then reads the peer's token. Returns `true` if the
/// peer accepted, `false` if it sent anything else (including `stop`),
/// meaning the caller should end this RPC or iteration without error.
pub async fn exchange_settings<S>(
    stream: &mut S,
    settings: &HostInternalSettings,
) -> Result<bool, NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_bincode(stream, settings).await?;
    let token = read_string(stream, MAX_TOKEN_SIZE).await?;
    Ok(token == ACCEPTED)
}

pub async fn write_accepted<S: AsyncWrite + Unpin>(stream: &mut S) -> Result<(), NegotiationError> {
    write_string(stream, ACCEPTED).await?;
    Ok(())
}

pub async fn write_error<S: AsyncWrite + Unpin>(
    stream: &mut S,
    msg: &str,
) -> Result<(), NegotiationError> {
    write_string(stream, &error_token(msg)).await?;
    Ok(())
}

pub async fn write_payload<S, T>(stream: &mut S, value: &T) -> Result<(), NegotiationError>
where
    S: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    write_bincode(stream, value).await?;
    Ok(())
}

pub async fn read_payload<S, T>(stream: &mut S, max_size: usize) -> Result<T, NegotiationError>
where
    S: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    Ok(read_bincode(stream, max_size).await?)
}

/// Runs `body` under `deadline`, translating a timeout into a connection
/// close.
pub async fn with_deadline<F, T>(deadline: std::time::Duration, body: F) -> Result<T, NegotiationError>
where
    F: std::future::Future<Output = Result<T, NegotiationError>>,
{
    tokio::time::timeout(deadline, body)
        .await
        .map_err(|_| NegotiationError::Encoding(storage_host_common::encoding::EncodingError::Io(
            std::io::Error::new(std::io::ErrorKind::TimedOut, "negotiation deadline exceeded"),
        )))?
}
