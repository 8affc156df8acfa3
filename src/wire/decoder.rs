use std::{error, fmt, io};

use bytes::Buf;
use itertools::Itertools;
use tokio_util::codec;

use super::events::ClientEvent;
use super::protocol::{Command, CtlSignal};
use crate::limits;

const FRAME_START: [u8; 2] = [0x02, 0x02];
const FRAME_END: [u8; 2] = [0x03, 0x03];

/// Decodes a byte stream into [`ClientEvent`]s, accepting both message
/// shapes the reference client may produce: framed (`0x02 0x02 ... 0x03
/// 0x03`) and unframed, newline-terminated text. Grounded on the teacher's
/// `Decoder` state machine, generalized from put-body accumulation to
/// frame-vs-line detection.
#[derive(Debug, Default)]
pub enum Decoder {
    #[default]
    ScanForMessage,
    /// A malformed message was seen; discard bytes up to and including the
    /// next plausible message terminator, then resume scanning. Unlike the
    /// teacher's stricter framing, this never surfaces an `Error` — a
    /// protocol slip is reported to the caller as [`ClientEvent::Malformed`]
    /// and the connection stays open.
    DiscardToNewline,
}

impl codec::Decoder for Decoder {
    type Item = ClientEvent;
    type Error = Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match *self {
            Decoder::ScanForMessage => {
                if src.len() >= 2 && src[0] == FRAME_START[0] && src[1] == FRAME_START[1] {
                    return self.decode_framed(src);
                }
                self.decode_unframed(src)
            }
            Decoder::DiscardToNewline => {
                if src.is_empty() {
                    return Ok(None);
                }
                match src.iter().position(|&b| b == b'\n') {
                    Some(idx) => {
                        src.advance(idx + 1);
                        *self = Self::ScanForMessage;
                        Ok(Some(ClientEvent::Malformed))
                    }
                    None => {
                        src.clear();
                        Ok(None)
                    }
                }
            }
        }
    }
}

impl Decoder {
    fn decode_framed(
        &mut self,
        src: &mut bytes::BytesMut,
    ) -> Result<Option<ClientEvent>, Error> {
        match src
            .iter()
            .skip(2)
            .take(limits::MAX_CMD_LEN + 16)
            .tuple_windows()
            .find_position(|&(&a, &b)| a == FRAME_END[0] && b == FRAME_END[1])
        {
            Some((idx, _)) => {
                // idx is relative to the byte after the 2-byte start marker.
                let payload_end = 2 + idx;
                let payload = src[2..payload_end].to_vec();
                src.advance(payload_end + 2);
                Ok(Some(parse_payload(&payload)))
            }
            None => {
                if src.len() > limits::MAX_CMD_LEN + 32 {
                    *self = Self::DiscardToNewline;
                    Ok(Some(ClientEvent::Malformed))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn decode_unframed(
        &mut self,
        src: &mut bytes::BytesMut,
    ) -> Result<Option<ClientEvent>, Error> {
        match src.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let line = src[..idx].to_vec();
                src.advance(idx + 1);
                Ok(Some(parse_payload(&line)))
            }
            None => {
                if src.len() > limits::MAX_CMD_LEN + 32 {
                    *self = Self::DiscardToNewline;
                    Ok(Some(ClientEvent::Malformed))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Parses one already-delimited message body (sans terminator) into a
/// [`ClientEvent`]. Never errors: anything that isn't `CMD ` or `CTL ` is
/// reported as [`ClientEvent::Malformed`] rather than killing the
/// connection, matching the protocol-error handling rules.
fn parse_payload(payload: &[u8]) -> ClientEvent {
    let trimmed = strip_trailing_cr(payload);
    if let Some(rest) = trimmed.strip_prefix(b"CMD ") {
        return ClientEvent::Command(Command::Line(
            String::from_utf8_lossy(rest).into_owned(),
        ));
    }
    if let Some(rest) = trimmed.strip_prefix(b"CTL ") {
        let rest = rest.trim_ascii_start();
        if let Some(&b) = rest.first() {
            if let Some(sig) = CtlSignal::from_byte(b) {
                return ClientEvent::Command(Command::Ctl(sig));
            }
        }
    }
    ClientEvent::Malformed
}

fn strip_trailing_cr(b: &[u8]) -> &[u8] {
    match b.last() {
        Some(b'\r') => &b[..b.len() - 1],
        _ => b,
    }
}

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::IO(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn test_unframed_command() {
        let stream = b"CMD echo hi\n".to_vec();
        let mut framed = FramedRead::new(stream.as_slice(), Decoder::default());
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            ClientEvent::Command(Command::Line("echo hi".into()))
        );
        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unframed_ctl() {
        let stream = b"CTL c\n".to_vec();
        let mut framed = FramedRead::new(stream.as_slice(), Decoder::default());
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            ClientEvent::Command(Command::Ctl(CtlSignal::Interrupt))
        );
    }

    #[tokio::test]
    async fn test_framed_command() {
        let mut stream = vec![0x02, 0x02];
        stream.extend_from_slice(b"CMD ls -la");
        stream.extend_from_slice(&[0x03, 0x03]);
        let mut framed = FramedRead::new(stream.as_slice(), Decoder::default());
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            ClientEvent::Command(Command::Line("ls -la".into()))
        );
    }

    #[tokio::test]
    async fn test_malformed_then_recovers() {
        let stream = b"garbage line\nCMD echo ok\n".to_vec();
        let mut framed = FramedRead::new(stream.as_slice(), Decoder::default());
        assert_eq!(framed.next().await.unwrap().unwrap(), ClientEvent::Malformed);
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            ClientEvent::Command(Command::Line("echo ok".into()))
        );
    }

    #[tokio::test]
    async fn test_multiple_unframed_in_one_chunk() {
        let stream = b"CMD one\nCMD two\n".to_vec();
        let mut framed = FramedRead::new(stream.as_slice(), Decoder::default());
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            ClientEvent::Command(Command::Line("one".into()))
        );
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            ClientEvent::Command(Command::Line("two".into()))
        );
    }
}
