//! Message shapes exchanged between `yashd` and a connected client.
//!
//! A client speaks two kinds of message, each on its own line:
//!
//! ```text
//! CMD <command line>
//! CTL c|z|d
//! ```
//!
//! `CMD` carries a shell command line to run; `CTL` carries a single control
//! character standing in for a signal the client's local terminal driver
//! would otherwise have generated: `c` for interrupt (`SIGINT`), `z` for
//! suspend (`SIGTSTP`), `d` for end-of-file.
//!
//! The server never frames its own output: everything it writes — the
//! prompt, built-in output, a job's inherited stdout/stderr — is sent as
//! plain bytes, exactly as the reference client expects.

use std::fmt;

/// The control character named by a `CTL` message.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CtlSignal {
    Interrupt,
    Suspend,
    Eof,
}

impl CtlSignal {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'c' => Some(CtlSignal::Interrupt),
            b'z' => Some(CtlSignal::Suspend),
            b'd' => Some(CtlSignal::Eof),
            _ => None,
        }
    }
}

impl fmt::Display for CtlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            CtlSignal::Interrupt => 'c',
            CtlSignal::Suspend => 'z',
            CtlSignal::Eof => 'd',
        };
        write!(f, "{c}")
    }
}

/// A single parsed message from the client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// `CMD <line>` — a shell command line, not yet tokenized.
    Line(String),
    /// `CTL <c|z|d>` — a control signal.
    Ctl(CtlSignal),
}
