//! In-memory PNG encoding and base64 text transport.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use common::span;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use thiserror::Error;

pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to encode PNG: {0}")]
    Png(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Image payload is empty")]
    Empty,

    #[error("Invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, EncodeError> {
    let _s = span!("encode");
    let mut buf = Cursor::new(Vec::with_capacity(image.as_raw().len() / 2));
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn to_data_uri(png: &[u8]) -> String {
    format!("{PNG_DATA_URI_PREFIX}{}", to_base64(png))
}

/// Decode a base64 image payload, dropping any `data:...;base64,` prefix
/// (everything up to the first comma).
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, PayloadError> {
    let encoded = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    }
    .trim();

    if encoded.is_empty() {
        return Err(PayloadError::Empty);
    }
    Ok(STANDARD.decode(encoded)?)
}
