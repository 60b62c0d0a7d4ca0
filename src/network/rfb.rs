//! RFB connection-failure handshake
//!
//! Implements the failure path shared by protocol versions 3.3/3.7/3.8:
//! version banner, zero security types, reason string. Byte order, the
//! zero count, and the close delay are dictated by the protocol; clients
//! drop the reason text on the floor if any of them differ.

use bytes::BufMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Version banner sent before refusing. 3.8 is the newest version whose
/// failure handshake all 3.x clients understand.
pub const PROTOCOL_VERSION: &[u8; 12] = b"RFB 003.008\n";

/// Bounded wait for the client's 12-byte version reply. A conforming
/// client answers immediately; a silent one must not hang the refusal.
const VERSION_REPLY_WAIT: Duration = Duration::from_secs(1);

/// Held open after the reason frame so the peer drains it before the
/// socket is torn down.
const CLOSE_DELAY: Duration = Duration::from_millis(300);

/// Builds the post-version refusal frame: one zero byte (no security
/// types, meaning connection failure), then a big-endian u32 length and
/// the UTF-8 reason text.
pub fn refusal_frame(reason: &str) -> Vec<u8> {
    let text = reason.as_bytes();
    let mut buf = Vec::with_capacity(5 + text.len());
    buf.put_u8(0x00);
    buf.put_u32(text.len() as u32);
    buf.put_slice(text);
    buf
}

/// Refuses `stream` with `reason`, then closes it.
///
/// Any step may fail independently; a failure skips the remaining steps
/// (including the close delay) but the connection is closed regardless.
pub async fn refuse(mut stream: TcpStream, reason: &str) {
    match send_refusal(&mut stream, reason).await {
        Ok(()) => tokio::time::sleep(CLOSE_DELAY).await,
        Err(e) => tracing::debug!("[rfb] [refusal_aborted] err={}", e),
    }
    drop(stream);
}

async fn send_refusal(stream: &mut TcpStream, reason: &str) -> std::io::Result<()> {
    stream.write_all(PROTOCOL_VERSION).await?;

    // The client's version reply: content and timeout are both ignored,
    // only the banner exchange ordering matters.
    let mut reply = [0u8; 12];
    let _ = tokio::time::timeout(VERSION_REPLY_WAIT, stream.read(&mut reply)).await;

    stream.write_all(&refusal_frame(reason)).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_banner_bytes() {
        assert_eq!(PROTOCOL_VERSION, b"RFB 003.008\n");
        assert_eq!(PROTOCOL_VERSION.len(), 12);
    }

    #[test]
    fn test_refusal_frame_exact_bytes() {
        let frame = refusal_frame("X");
        assert_eq!(frame, vec![0x00, 0x00, 0x00, 0x00, 0x01, b'X']);
    }

    #[test]
    fn test_refusal_frame_length_counts_utf8_bytes() {
        // 3 chars, 7 bytes once encoded
        let reason = "a\u{00e9}\u{4e16}";
        assert_eq!(reason.chars().count(), 3);

        let frame = refusal_frame(reason);
        let encoded = reason.as_bytes();
        assert_eq!(frame[0], 0x00);
        assert_eq!(
            u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]),
            encoded.len() as u32
        );
        assert_eq!(&frame[5..], encoded);
    }

    #[test]
    fn test_refusal_frame_empty_reason() {
        let frame = refusal_frame("");
        assert_eq!(frame, vec![0x00, 0x00, 0x00, 0x00, 0x00]);
    }
}
