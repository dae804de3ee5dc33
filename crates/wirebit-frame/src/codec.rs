//! Frame wire-format encoding and decoding.
//!
//! Layout (all fields little-endian, packed):
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | magic (0x57424954) |
//! | 4 | 2 | version (1) |
//! | 6 | 2 | frame_type |
//! | 8 | 4 | flags |
//! | 12 | 8 | tx_timestamp_ns |
//! | 20 | 8 | deliver_at_ns |
//! | 28 | 4 | src_endpoint_id |
//! | 32 | 4 | dst_endpoint_id |
//! | 36 | 4 | payload_len |
//! | 40 | 4 | meta_len |
//! | 44 | .. | payload, then meta |
//!
//! Fields are serialized one by one rather than by transmuting a struct, so
//! the encoding never depends on the compiler's layout choices.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::trace;
use wirebit_core::{
    constants::{FRAME_HEADER_SIZE, FRAME_MAGIC, FRAME_VERSION},
    ErrorKind, Result,
};

use crate::frame::Frame;

/// Encodes a frame into a fresh byte vector.
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(frame.total_size());
    encode_into(&mut buffer, frame)?;
    Ok(buffer)
}

/// Encodes a frame, appending the bytes to `buffer`.
pub fn encode_into(buffer: &mut Vec<u8>, frame: &Frame) -> Result<()> {
    trace!(
        frame_type = frame.frame_type,
        payload_len = frame.payload.len(),
        meta_len = frame.meta.len(),
        "encoding frame"
    );

    buffer.write_u32::<LittleEndian>(FRAME_MAGIC)?;
    buffer.write_u16::<LittleEndian>(FRAME_VERSION)?;
    buffer.write_u16::<LittleEndian>(frame.frame_type)?;
    buffer.write_u32::<LittleEndian>(frame.flags)?;
    buffer.write_i64::<LittleEndian>(frame.tx_timestamp_ns)?;
    buffer.write_i64::<LittleEndian>(frame.deliver_at_ns)?;
    buffer.write_u32::<LittleEndian>(frame.src_endpoint_id)?;
    buffer.write_u32::<LittleEndian>(frame.dst_endpoint_id)?;
    buffer.write_u32::<LittleEndian>(frame.payload.len() as u32)?;
    buffer.write_u32::<LittleEndian>(frame.meta.len() as u32)?;
    buffer.extend_from_slice(&frame.payload);
    buffer.extend_from_slice(&frame.meta);
    Ok(())
}

/// Decodes a frame from wire bytes.
///
/// Succeeds only when the data holds a full header, the magic and version
/// match, and both variable sections are completely present. Trailing bytes
/// beyond `header + payload_len + meta_len` are ignored, which is what lets
/// ring records carry alignment padding.
pub fn decode(data: &[u8]) -> Result<Frame> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(ErrorKind::InvalidArgument(format!(
            "frame data too small for header: {} < {}",
            data.len(),
            FRAME_HEADER_SIZE
        )));
    }

    let mut cursor = Cursor::new(data);
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != FRAME_MAGIC {
        return Err(ErrorKind::Format(format!(
            "bad frame magic: {:#010x}",
            magic
        )));
    }
    let version = cursor.read_u16::<LittleEndian>()?;
    if version != FRAME_VERSION {
        return Err(ErrorKind::Format(format!(
            "unsupported frame version: {}",
            version
        )));
    }

    let frame_type = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u32::<LittleEndian>()?;
    let tx_timestamp_ns = cursor.read_i64::<LittleEndian>()?;
    let deliver_at_ns = cursor.read_i64::<LittleEndian>()?;
    let src_endpoint_id = cursor.read_u32::<LittleEndian>()?;
    let dst_endpoint_id = cursor.read_u32::<LittleEndian>()?;
    let payload_len = cursor.read_u32::<LittleEndian>()? as usize;
    let meta_len = cursor.read_u32::<LittleEndian>()? as usize;

    let expected = FRAME_HEADER_SIZE
        .checked_add(payload_len)
        .and_then(|n| n.checked_add(meta_len))
        .ok_or_else(|| {
            ErrorKind::InvalidArgument("frame section lengths overflow".to_string())
        })?;
    if data.len() < expected {
        return Err(ErrorKind::InvalidArgument(format!(
            "frame data incomplete: {} < {}",
            data.len(),
            expected
        )));
    }

    let mut payload = vec![0u8; payload_len];
    cursor.read_exact(&mut payload)?;
    let mut meta = vec![0u8; meta_len];
    cursor.read_exact(&mut meta)?;

    trace!(
        frame_type,
        src = src_endpoint_id,
        dst = dst_endpoint_id,
        payload_len,
        meta_len,
        "decoded frame"
    );

    Ok(Frame {
        frame_type,
        flags,
        tx_timestamp_ns,
        deliver_at_ns,
        src_endpoint_id,
        dst_endpoint_id,
        payload,
        meta,
    })
}

/// Validates the magic and version of an encoded frame without touching the
/// variable sections.
pub fn validate_header(data: &[u8]) -> Result<()> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(ErrorKind::InvalidArgument(format!(
            "data too small for frame header: {}",
            data.len()
        )));
    }
    let mut cursor = Cursor::new(data);
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != FRAME_MAGIC {
        return Err(ErrorKind::Format(format!(
            "bad frame magic: {:#010x}",
            magic
        )));
    }
    let version = cursor.read_u16::<LittleEndian>()?;
    if version != FRAME_VERSION {
        return Err(ErrorKind::Format(format!(
            "unsupported frame version: {}",
            version
        )));
    }
    Ok(())
}

/// Reads the wire frame-type value from an encoded prefix.
///
/// Needs only the first 8 bytes; the payload is neither consumed nor
/// validated. The value is returned raw so reserved types pass through.
pub fn peek_frame_type(data: &[u8]) -> Result<u16> {
    if data.len() < 8 {
        return Err(ErrorKind::InvalidArgument(format!(
            "data too small to peek frame type: {}",
            data.len()
        )));
    }
    let mut cursor = Cursor::new(data);
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != FRAME_MAGIC {
        return Err(ErrorKind::Format(format!(
            "bad frame magic: {:#010x}",
            magic
        )));
    }
    let version = cursor.read_u16::<LittleEndian>()?;
    if version != FRAME_VERSION {
        return Err(ErrorKind::Format(format!(
            "unsupported frame version: {}",
            version
        )));
    }
    Ok(cursor.read_u16::<LittleEndian>()?)
}
