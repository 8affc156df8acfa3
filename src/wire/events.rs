use super::protocol::Command;

/// An event produced by the decoder for one servant task iteration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientEvent {
    /// A well-formed `CMD`/`CTL` message.
    Command(Command),
    /// A payload that didn't parse as a known message; discarded, the
    /// connection stays open per the protocol-error handling rules.
    Malformed,
}
