//! Fixed-size timestamp header carried at the front of every payload.
//!
//! Layout (bincode fixed-int, little endian):
//!
//! | offset | size | field        |
//! |--------|------|--------------|
//! | 0      | 8    | `msg_num`    |
//! | 8      | 8    | `send_ts_ns` |
//! | 16     | 4    | `flags`      |
//!
//! The rest of the payload is opaque filler up to the configured length.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Size of the encoded header in bytes
pub const HEADER_LEN: usize = 20;

/// Byte offset of `send_ts_ns` within the encoded header
pub const SEND_TS_OFFSET: usize = 8;

/// The message carries a send timestamp that must be recorded on return
pub const FLAG_TIMESTAMP: u32 = 0x1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfHeader {
    pub msg_num: u64,
    pub send_ts_ns: u64,
    pub flags: u32,
}

impl PerfHeader {
    pub fn is_timestamped(&self) -> bool {
        self.flags & FLAG_TIMESTAMP != 0
    }

    /// Encode into the first `HEADER_LEN` bytes of `buf`
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        let slot = buf
            .get_mut(..HEADER_LEN)
            .context("buffer too short for message header")?;
        bincode::serialize_into(slot, self).context("failed to encode message header")?;
        Ok(())
    }

    /// Decode from the front of a received payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let bytes = payload
            .get(..HEADER_LEN)
            .with_context(|| format!("payload of {} bytes has no header", payload.len()))?;
        bincode::deserialize(bytes).context("failed to decode message header")
    }
}

/// Overwrite the send timestamp of an already encoded header.
///
/// Kept separate from `encode_into` so the clock is read as the very last
/// step before the buffer is handed to the transport.
#[inline]
pub fn stamp_send_ts(buf: &mut [u8], send_ts_ns: u64) {
    buf[SEND_TS_OFFSET..SEND_TS_OFFSET + 8].copy_from_slice(&send_ts_ns.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_header_is_fixed_size() {
        let header = PerfHeader {
            msg_num: 7,
            send_ts_ns: 123_456,
            flags: FLAG_TIMESTAMP,
        };
        let encoded = bincode::serialize(&header).unwrap();
        assert_eq!(encoded.len(), HEADER_LEN);
    }

    #[test]
    fn test_header_survives_payload_padding() {
        let mut buf = vec![0xAAu8; 64];
        let header = PerfHeader {
            msg_num: 42,
            send_ts_ns: 0,
            flags: FLAG_TIMESTAMP,
        };
        header.encode_into(&mut buf).unwrap();
        stamp_send_ts(&mut buf, 987_654_321);

        let decoded = PerfHeader::decode(&buf).unwrap();
        assert_eq!(decoded.msg_num, 42);
        assert_eq!(decoded.send_ts_ns, 987_654_321);
        assert!(decoded.is_timestamped());
        assert_eq!(buf[HEADER_LEN], 0xAA);
    }

    #[test]
    fn test_short_buffers_are_rejected() {
        let header = PerfHeader {
            msg_num: 1,
            send_ts_ns: 1,
            flags: 0,
        };
        assert!(header.encode_into(&mut [0u8; 8]).is_err());
        assert!(PerfHeader::decode(&[0u8; HEADER_LEN - 1]).is_err());
    }
}
