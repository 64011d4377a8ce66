//! Length-prefixed, little-endian, type-tag-less wire encoding.
//!
//! Every RPC payload is read and written with these helpers instead of a
//! generic serde codec: the wire format has no type tags, and every
//! variable-length field is capped at read time so a peer cannot force an
//! unbounded allocation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Hash256;

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("object of size {size} exceeds the {cap} byte cap")]
    TooLarge { size: u64, cap: usize },
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}

pub async fn write_u8<W: AsyncWrite + Unpin>(w: &mut W, v: u8) -> Result<(), EncodingError> {
    w.write_all(&[v]).await?;
    Ok(())
}

pub async fn read_u8<R: AsyncRead + Unpin>(r: &mut R) -> Result<u8, EncodingError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).await?;
    Ok(buf[0])
}

pub async fn write_bool<W: AsyncWrite + Unpin>(w: &mut W, v: bool) -> Result<(), EncodingError> {
    write_u8(w, v as u8).await
}

pub async fn read_bool<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool, EncodingError> {
    Ok(read_u8(r).await? != 0)
}

pub async fn write_u64<W: AsyncWrite + Unpin>(w: &mut W, v: u64) -> Result<(), EncodingError> {
    w.write_all(&v.to_le_bytes()).await?;
    Ok(())
}

pub async fn read_u64<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64, EncodingError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).await?;
    Ok(u64::from_le_bytes(buf))
}

pub async fn write_u128<W: AsyncWrite + Unpin>(w: &mut W, v: u128) -> Result<(), EncodingError> {
    w.write_all(&v.to_le_bytes()).await?;
    Ok(())
}

pub async fn read_u128<R: AsyncRead + Unpin>(r: &mut R) -> Result<u128, EncodingError> {
    let mut buf = [0u8; 16];
    r.read_exact(&mut buf).await?;
    Ok(u128::from_le_bytes(buf))
}

pub async fn write_hash<W: AsyncWrite + Unpin>(
    w: &mut W,
    hash: &Hash256,
) -> Result<(), EncodingError> {
    w.write_all(hash).await?;
    Ok(())
}

pub async fn read_hash<R: AsyncRead + Unpin>(r: &mut R) -> Result<Hash256, EncodingError> {
    let mut buf = [0u8; 32];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_bytes<W: AsyncWrite + Unpin>(
    w: &mut W,
    data: &[u8],
) -> Result<(), EncodingError> {
    write_u64(w, data.len() as u64).await?;
    w.write_all(data).await?;
    Ok(())
}

/// Reads a length-prefixed byte vector, rejecting anything over `max_size`
/// before allocating the buffer.
pub async fn read_bytes<R: AsyncRead + Unpin>(
    r: &mut R,
    max_size: usize,
) -> Result<Vec<u8>, EncodingError> {
    let len = read_u64(r).await?;
    if len as usize > max_size {
        return Err(EncodingError::TooLarge {
            size: len,
            cap: max_size,
        });
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_string<W: AsyncWrite + Unpin>(
    w: &mut W,
    s: &str,
) -> Result<(), EncodingError> {
    write_bytes(w, s.as_bytes()).await
}

pub async fn read_string<R: AsyncRead + Unpin>(
    r: &mut R,
    max_size: usize,
) -> Result<String, EncodingError> {
    let bytes = read_bytes(r, max_size).await?;
    String::from_utf8(bytes).map_err(|_| EncodingError::InvalidUtf8)
}

pub async fn write_hash_vec<W: AsyncWrite + Unpin>(
    w: &mut W,
    hashes: &[Hash256],
) -> Result<(), EncodingError> {
    write_u64(w, hashes.len() as u64).await?;
    for hash in hashes {
        write_hash(w, hash).await?;
    }
    Ok(())
}

pub async fn read_hash_vec<R: AsyncRead + Unpin>(
    r: &mut R,
    max_count: usize,
) -> Result<Vec<Hash256>, EncodingError> {
    let len = read_u64(r).await?;
    if len as usize > max_count {
        return Err(EncodingError::TooLarge {
            size: len,
            cap: max_count,
        });
    }
    let mut out = Vec::with_capacity(len as usize);
    for _ in 0..len {
        out.push(read_hash(r).await?);
    }
    Ok(out)
}

/// Writes a length-prefixed bincode payload. Used for the structured
/// transaction/contract types that already derive `Serialize`, so every
/// nested field doesn't need its own hand-rolled encoder.
pub async fn write_bincode<W, T>(w: &mut W, value: &T) -> Result<(), EncodingError>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let bytes = bincode::serialize(value)?;
    write_bytes(w, &bytes).await
}

/// Reads a length-prefixed bincode payload, rejecting anything over
/// `max_size` before allocating or deserializing.
pub async fn read_bincode<R, T>(r: &mut R, max_size: usize) -> Result<T, EncodingError>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let bytes = read_bytes(r, max_size).await?;
    Ok(bincode::deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[tokio::test]
    async fn round_trips_bytes() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"hello world").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let out = read_bytes(&mut cursor, 1024).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn rejects_oversized_reads() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, &vec![0u8; 100]).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let err = read_bytes(&mut cursor, 10).await.unwrap_err();
        assert!(matches!(err, EncodingError::TooLarge { size: 100, cap: 10 }));
    }

    #[tokio::test]
    async fn round_trips_hash_vec() {
        let mut buf = Vec::new();
        let hashes = vec![[1u8; 32], [2u8; 32]];
        write_hash_vec(&mut buf, &hashes).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let out = read_hash_vec(&mut cursor, 10).await.unwrap();
        assert_eq!(out, hashes);
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Sample {
        a: u64,
        b: String,
    }

    #[tokio::test]
    async fn round_trips_bincode_payload() {
        let mut buf = Vec::new();
        let value = Sample { a: 7, b: "contract".to_string() };
        write_bincode(&mut buf, &value).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let out: Sample = read_bincode(&mut cursor, 1024).await.unwrap();
        assert_eq!(out, value);
    }

    #[tokio::test]
    async fn rejects_oversized_bincode_payload() {
        let mut buf = Vec::new();
        let value = Sample { a: 7, b: "x".repeat(200) };
        write_bincode(&mut buf, &value).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let err = read_bincode::<_, Sample>(&mut cursor, 10).await.unwrap_err();
        assert!(matches!(err, EncodingError::TooLarge { cap: 10, .. }));
    }
}
