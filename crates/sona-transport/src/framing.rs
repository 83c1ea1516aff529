//! Outbound audio framing and chunking
//!
//! Timestamped packets get a 4-byte big-endian prefix; a zero timestamp is
//! the "no reference time" value and is sent bare. Payloads above 1 KiB are
//! split so a single publish never holds the connection for long.

use sona_core::OutboundPacket;

/// Largest single publish for audio payloads.
pub const MAX_CHUNK_BYTES: usize = 1024;

/// Serialize a packet into its wire form.
pub fn frame_payload(packet: &OutboundPacket) -> Vec<u8> {
    match packet.timestamp {
        Some(timestamp) if timestamp != 0 => {
            let mut framed = Vec::with_capacity(4 + packet.payload.len());
            framed.extend_from_slice(&timestamp.to_be_bytes());
            framed.extend_from_slice(&packet.payload);
            framed
        }
        _ => packet.payload.clone(),
    }
}

/// Split a wire payload into publishable chunks.
pub fn split_chunks(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    payload.chunks(MAX_CHUNK_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untimestamped_payload_is_bare() {
        let packet = OutboundPacket::new(vec![1, 2, 3]);
        assert_eq!(frame_payload(&packet), vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_timestamp_is_bare() {
        let packet = OutboundPacket::with_timestamp(vec![1, 2, 3], 0);
        assert_eq!(frame_payload(&packet), vec![1, 2, 3]);
    }

    #[test]
    fn test_timestamp_prefix_is_big_endian() {
        let packet = OutboundPacket::with_timestamp(vec![0xAA], 0x0102_0304);
        assert_eq!(frame_payload(&packet), vec![0x01, 0x02, 0x03, 0x04, 0xAA]);
    }

    #[test]
    fn test_small_payload_single_chunk() {
        let payload = vec![0u8; 1000];
        let chunks: Vec<_> = split_chunks(&payload).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 1000);
    }

    #[test]
    fn test_large_payload_chunked() {
        let payload = vec![0u8; 2600];
        let chunks: Vec<_> = split_chunks(&payload).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1024);
        assert_eq!(chunks[1].len(), 1024);
        assert_eq!(chunks[2].len(), 552);
        assert!(chunks.iter().all(|c| c.len() <= MAX_CHUNK_BYTES));
    }
}
