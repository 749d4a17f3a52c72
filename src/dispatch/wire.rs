//! Length-prefixed frames exchanged between the dispatcher and its workers.
//!
//! A frame is a little-endian `u32` header length, the JSON header, a
//! little-endian `u32` body length and the raw body. Image bodies are PNG.

use std::io::{self, Cursor, Read, Write};

use image::{DynamicImage, ImageFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::OcrSettings;
use crate::types::{WorkerMode, WorkerRecord};

const MAX_HEADER_LEN: u32 = 64 * 1024 * 1024;
const MAX_BODY_LEN: u32 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Init { settings: OcrSettings },
    /// Followed by the PNG-encoded image as the frame body.
    Job { index: usize, mode: WorkerMode },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ready { recognizer_available: bool },
    Done { index: usize, record: WorkerRecord },
    Failed { index: usize, message: String },
}

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed frame header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("Frame section of {0} bytes exceeds the limit")]
    TooLarge(u32),

    #[error("Image transport error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Protocol violation: {0}")]
    Protocol(String),
}

fn write_section<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(bytes.len()).map_err(|_| WireError::TooLarge(u32::MAX))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_len<R: Read>(reader: &mut R, limit: u32) -> Result<u32, WireError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    let len = u32::from_le_bytes(buf);
    if len > limit {
        return Err(WireError::TooLarge(len));
    }
    Ok(len)
}

pub fn write_frame<W: Write, H: Serialize>(writer: &mut W, header: &H, body: &[u8]) -> Result<(), WireError> {
    let header = serde_json::to_vec(header)?;
    write_section(writer, &header)?;
    write_section(writer, body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame; `Ok(None)` on a clean end of stream before a new frame.
pub fn read_frame<R: Read, H: DeserializeOwned>(reader: &mut R) -> Result<Option<(H, Vec<u8>)>, WireError> {
    let mut first = [0u8; 1];
    loop {
        match reader.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }

    let mut rest = [0u8; 3];
    reader.read_exact(&mut rest)?;
    let header_len = u32::from_le_bytes([first[0], rest[0], rest[1], rest[2]]);
    if header_len > MAX_HEADER_LEN {
        return Err(WireError::TooLarge(header_len));
    }
    let mut header = vec![0u8; header_len as usize];
    reader.read_exact(&mut header)?;

    let body_len = read_len(reader, MAX_BODY_LEN)?;
    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body)?;

    Ok(Some((serde_json::from_slice(&header)?, body)))
}

/// Lossless transport encoding for images crossing the process boundary.
pub fn encode_image(image: &DynamicImage) -> Result<Vec<u8>, WireError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, WireError> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?)
}
