//! Frame codec: length-prefixed records over a byte stream.
//!
//! Every record on the wire is `[4-byte length, big-endian u32] [payload]`.
//! The handshake payload is always JSON; header and body payloads use the
//! format the handshake negotiated. Bodies cross this layer as raw bytes so
//! a payload that fails typed decoding can never desynchronize the frame
//! stream; typed (de)serialization happens at the edges through
//! [`CodecType::encode`] and [`CodecType::decode`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{Result, RpcError};
use crate::proto::{CodecType, Header, Options};

/// Upper bound on a single record, guarding the length-prefix allocation.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

impl CodecType {
    /// Serializes a value in this codec's body format.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecType::Gob => Ok(postcard::to_allocvec(value)?),
            CodecType::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Deserializes a value from this codec's body format.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecType::Gob => Ok(postcard::from_bytes(bytes)?),
            CodecType::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RpcError::Codec(format!(
            "frame too large: {} bytes (max {} bytes)",
            len, MAX_FRAME_SIZE
        )));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    Ok(())
}

/// Writes the handshake record and flushes it.
pub async fn write_options<W: AsyncWrite + Unpin>(writer: &mut W, options: &Options) -> Result<()> {
    let bytes = serde_json::to_vec(options)?;
    write_record(writer, &bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the handshake record. Any framing or decode failure is a handshake
/// failure: the peer is not speaking this protocol.
pub async fn read_options<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Options> {
    let bytes = read_record(reader).await?;
    serde_json::from_slice(&bytes).map_err(|err| RpcError::Handshake(err.to_string()))
}

/// Read half of a negotiated connection. Frames must be consumed in
/// header-then-body alternation; the single reader task on each side is what
/// preserves that discipline.
pub struct CodecReader<R> {
    codec_type: CodecType,
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> CodecReader<R> {
    pub fn new(codec_type: CodecType, reader: R) -> Self {
        Self {
            codec_type,
            reader: BufReader::new(reader),
        }
    }

    /// Reads and decodes the next frame header.
    pub async fn read_header(&mut self) -> Result<Header> {
        let bytes = read_record(&mut self.reader).await?;
        self.codec_type.decode(&bytes)
    }

    /// Reads the body that follows a header, as raw payload bytes.
    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        read_record(&mut self.reader).await
    }
}

/// Write half of a negotiated connection.
pub struct CodecWriter<W> {
    codec_type: CodecType,
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> CodecWriter<W> {
    pub fn new(codec_type: CodecType, writer: W) -> Self {
        Self {
            codec_type,
            writer: BufWriter::new(writer),
        }
    }

    /// Writes header and body as one logical frame and flushes before
    /// returning. A failed write shuts the stream down so the peer observes
    /// the break rather than a half-written frame.
    pub async fn write(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        if let Err(err) = self.write_frame(header, body).await {
            let _ = self.writer.shutdown().await;
            return Err(err);
        }
        Ok(())
    }

    async fn write_frame(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header_bytes = self.codec_type.encode(header)?;
        write_record(&mut self.writer, &header_bytes).await?;
        write_record(&mut self.writer, body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flushes and closes the write direction.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
