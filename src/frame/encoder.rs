//! Multipart frame encoding
//!
//! Devices publish JPEG frames as base64 text. Each frame is decoded once on
//! ingest and wrapped in the multipart framing that viewers expect, so the
//! dispatcher can write the same `Bytes` to every sink without touching it.
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <decoded length>\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};

use super::device::DeviceId;
use super::error::FrameError;

/// Multipart boundary between frames
pub const MULTIPART_BOUNDARY: &str = "frame";

/// Content type the HTTP layer must advertise for the viewer stream
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const FRAME_TRAILER: &[u8] = b"\r\n";

/// One fully framed multipart chunk
///
/// Cheap to clone: the underlying `Bytes` is reference counted, so fan-out to
/// many viewers never copies the JPEG data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    header_len: usize,
    payload_len: usize,
}

impl Frame {
    /// Complete chunk (header + payload + trailer), written verbatim to sinks
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    /// The JPEG payload without framing
    pub fn payload(&self) -> Bytes {
        self.data
            .slice(self.header_len..self.header_len + self.payload_len)
    }

    /// Length of the JPEG payload (the declared Content-Length)
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Length of the complete chunk
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the chunk is empty (never true for encoder output)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decodes bus payloads into multipart frames
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder;

impl FrameEncoder {
    /// Decode a base64 JPEG payload and frame it
    ///
    /// Surrounding whitespace is ignored. The device id is only used to
    /// attribute errors.
    pub fn decode(device: &DeviceId, payload: &str) -> Result<Frame, FrameError> {
        let jpeg = STANDARD
            .decode(payload.trim())
            .map_err(|source| FrameError::InvalidBase64 {
                device: device.clone(),
                source,
            })?;

        if jpeg.is_empty() {
            return Err(FrameError::EmptyPayload {
                device: device.clone(),
            });
        }

        Ok(Self::frame_jpeg(&jpeg))
    }

    /// Frame raw JPEG bytes
    pub fn frame_jpeg(jpeg: &[u8]) -> Frame {
        let header = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            MULTIPART_BOUNDARY,
            jpeg.len()
        );

        let mut buf = BytesMut::with_capacity(header.len() + jpeg.len() + FRAME_TRAILER.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(jpeg);
        buf.put_slice(FRAME_TRAILER);

        Frame {
            data: buf.freeze(),
            header_len: header.len(),
            payload_len: jpeg.len(),
        }
    }
}
