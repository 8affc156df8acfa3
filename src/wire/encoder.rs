use std::{error, fmt, io};

use bytes::BufMut;
use tokio_util::codec;

/// Server-to-client output. Every variant is written as plain bytes with no
/// framing of its own — the reference client doesn't expect any.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ServerMessage {
    /// The literal prompt, `\n# `.
    Prompt,
    /// One line of text, terminated with `\n` by the encoder.
    Line(String),
    /// Raw bytes written through unchanged (used for built-in output that
    /// already carries its own line breaks, e.g. `jobs`).
    Raw(Vec<u8>),
}

#[derive(Debug, Default)]
pub struct Encoder {}

impl codec::Encoder<ServerMessage> for Encoder {
    type Error = Error;

    fn encode(
        &mut self,
        item: ServerMessage,
        dst: &mut bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        match item {
            ServerMessage::Prompt => dst.put_slice(crate::limits::PROMPT.as_bytes()),
            ServerMessage::Line(s) => {
                dst.reserve(s.len() + 1);
                dst.put_slice(s.as_bytes());
                dst.put_u8(b'\n');
            }
            ServerMessage::Raw(bytes) => dst.put_slice(&bytes),
        }
        Ok(())
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
