use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{RawFrame, HEADER_SIZE, MAX_BODY_LENGTH};

/// CQL frame codec for use with tokio Framed
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() >= HEADER_SIZE {
            let body_length = u32::from_be_bytes([src[5], src[6], src[7], src[8]]);
            if body_length > MAX_BODY_LENGTH {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("frame body length {} exceeds protocol maximum", body_length),
                ));
            }
        }
        Ok(RawFrame::decode(src))
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}
