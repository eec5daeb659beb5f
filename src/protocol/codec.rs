//! Package framing for client connections.
//!
//! Each frame is a 4-byte big-endian length prefix followed by the JSON
//! encoding of a [`Package`].

use super::package::Package;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Minimum frame size (length prefix only).
pub const MIN_FRAME_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("malformed package: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
enum DecodeState {
    #[default]
    ReadingLength,
    ReadingPayload {
        length: usize,
    },
}

/// Incremental package decoder.
#[derive(Debug)]
pub struct PackageDecoder {
    state: DecodeState,
    max_frame: usize,
}

impl PackageDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            state: DecodeState::ReadingLength,
            max_frame,
        }
    }

    /// Decode a package from the buffer.
    ///
    /// Returns `Ok(Some(package))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol error.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Package>, CodecError> {
        loop {
            match self.state {
                DecodeState::ReadingLength => {
                    if buf.len() < MIN_FRAME_SIZE {
                        return Ok(None);
                    }
                    let length = buf.get_u32() as usize;
                    if length > self.max_frame {
                        return Err(CodecError::FrameTooLarge {
                            size: length,
                            max: self.max_frame,
                        });
                    }
                    self.state = DecodeState::ReadingPayload { length };
                }
                DecodeState::ReadingPayload { length } => {
                    if buf.len() < length {
                        return Ok(None);
                    }
                    let frame = buf.split_to(length).freeze();
                    self.state = DecodeState::ReadingLength;
                    return Ok(Some(serde_json::from_slice(&frame)?));
                }
            }
        }
    }
}

/// Package encoder with the same frame bound as the decoder.
#[derive(Debug, Clone, Copy)]
pub struct PackageEncoder {
    max_frame: usize,
}

impl PackageEncoder {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }

    pub fn encode(&self, package: &Package, buf: &mut BytesMut) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(package)?;
        if payload.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame,
            });
        }
        buf.reserve(MIN_FRAME_SIZE + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        Ok(())
    }

    pub fn encode_to_bytes(&self, package: &Package) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        self.encode(package, &mut buf)?;
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Header, WireMessage};

    fn sample(seq: &str) -> Package {
        Package::with_message(
            Header::request(Command::AsyncMessageToServer, seq),
            WireMessage::new("orders", "payload"),
        )
    }

    #[test]
    fn decodes_frames_split_across_reads() {
        let encoder = PackageEncoder::new(1024);
        let bytes = encoder.encode_to_bytes(&sample("1")).unwrap();
        let mut decoder = PackageDecoder::new(1024);

        let mut buf = BytesMut::from(&bytes[..2]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[2..10]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[10..]);
        let pkg = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(pkg.header.seq, "1");
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let encoder = PackageEncoder::new(1024);
        let mut buf = BytesMut::new();
        encoder.encode(&sample("1"), &mut buf).unwrap();
        encoder.encode(&sample("2"), &mut buf).unwrap();
        let mut decoder = PackageDecoder::new(1024);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().header.seq, "1");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().header.seq, "2");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_frames_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(2048);
        let mut decoder = PackageDecoder::new(1024);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::FrameTooLarge { size: 2048, .. })
        ));

        let encoder = PackageEncoder::new(8);
        assert!(encoder.encode_to_bytes(&sample("1")).is_err());
    }

    #[test]
    fn malformed_payload_surfaces_error() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(b"{x}");
        let mut decoder = PackageDecoder::new(1024);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(CodecError::Malformed(_))
        ));
    }
}
