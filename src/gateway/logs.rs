//! Decoding of the Docker `logs` endpoint body.
//!
//! Containers without a TTY return a multiplexed stream: each frame starts with an 8-byte
//! header `[stream, 0, 0, 0, len_be32]` followed by `len` bytes of payload. TTY containers
//! return the raw bytes instead.

use bytes::Buf;

const HEADER_LEN: usize = 8;

/// Decode a logs body into text, demultiplexing stdout/stderr frames when present
pub fn decode_log_stream(body: &[u8]) -> String {
    if !looks_multiplexed(body) {
        return String::from_utf8_lossy(body).into_owned();
    }

    let mut buf = body;
    let mut out = Vec::with_capacity(body.len());
    while buf.remaining() >= HEADER_LEN {
        let stream = buf.get_u8();
        buf.advance(3);
        let len = buf.get_u32() as usize;
        if stream > 2 || len > buf.remaining() {
            // Not a frame after all; keep what is left verbatim.
            out.extend_from_slice(buf);
            break;
        }
        out.extend_from_slice(&buf[..len]);
        buf.advance(len);
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn looks_multiplexed(body: &[u8]) -> bool {
    body.len() >= HEADER_LEN && body[0] <= 2 && body[1..4] == [0, 0, 0]
}
