//! Turns one whitespace-tokenized command line into a [`Job`], or a single
//! client-visible syntax error line.
//!
//! Grounded on `examples/original_source/shell.c`'s `parseJob`/
//! `tokenizeString`: tokens are split on ASCII whitespace (no quoting, no
//! escaping — out of scope per the grammar this system supports), and the
//! five punctuation tokens `<`, `>`, `2>`, `|`, `&` are recognized
//! positionally rather than via a general grammar. `parse_job` is total: for
//! any input it returns either `Ok(Job)` or `Err(message)`, never both, and
//! never panics.

use crate::limits;
use crate::types::job::{Job, Side};

const REDIR_IN: &str = "<";
const REDIR_OUT: &str = ">";
const REDIR_ERR: &str = "2>";
const PIPE: &str = "|";
const BG: &str = "&";

fn is_special(tok: &str) -> bool {
    matches!(tok, "<" | ">" | "2>" | "|" | "&")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    In,
    Out,
    Err,
}

struct SideBuilder {
    side: Side,
    pending: Pending,
}

impl SideBuilder {
    fn new() -> Self {
        SideBuilder { side: Side::default(), pending: Pending::None }
    }

    /// Assigns `tok` to whichever redirection is pending. Returns an error
    /// if `tok` is itself a special token (a filename was expected).
    fn take_pending(&mut self, tok: &str) -> Result<(), String> {
        if is_special(tok) {
            return Err(near_token(tok));
        }
        match self.pending {
            Pending::In => self.side.in_path = Some(tok.to_string()),
            Pending::Out => self.side.out_path = Some(tok.to_string()),
            Pending::Err => self.side.err_path = Some(tok.to_string()),
            Pending::None => unreachable!("take_pending called with no pending redirection"),
        }
        self.pending = Pending::None;
        Ok(())
    }

    fn start_redir(&mut self, tok: &str) -> Result<(), String> {
        if self.side.is_empty() {
            // No command name precedes this redirection.
            return Err(near_token(tok));
        }
        let already_set = match tok {
            REDIR_IN => self.side.in_path.is_some(),
            REDIR_OUT => self.side.out_path.is_some(),
            REDIR_ERR => self.side.err_path.is_some(),
            _ => unreachable!(),
        };
        if already_set {
            return Err(near_token(tok));
        }
        self.pending = match tok {
            REDIR_IN => Pending::In,
            REDIR_OUT => Pending::Out,
            REDIR_ERR => Pending::Err,
            _ => unreachable!(),
        };
        Ok(())
    }
}

fn near_token(tok: &str) -> String {
    format!("syntax error: near token {tok}")
}

/// Parses `raw` (already known to be non-blank) into a [`Job`].
///
/// Callers are expected to have already applied `ignoreInput`-style
/// filtering: blank or whitespace-only lines never reach this function.
pub fn parse_job(raw: &str) -> Result<Job, String> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();

    if tokens.is_empty() {
        // Defensive only; callers filter blank input before parsing.
        return Err("syntax error: command should not start with &".to_string());
    }
    if tokens.len() > limits::MAX_TOKENS {
        return Err(format!(
            "syntax error: command has too many tokens (max {})",
            limits::MAX_TOKENS
        ));
    }

    if is_special(tokens[0]) {
        return Err(format!(
            "syntax error: command should not start with {}",
            tokens[0]
        ));
    }

    // `&` may only appear as the very last token.
    if let Some(pos) = tokens.iter().position(|&t| t == BG) {
        if pos != tokens.len() - 1 {
            return Err("syntax error: & should be the last token of the command".to_string());
        }
    }

    let background = tokens.last() == Some(&BG);
    let body: &[&str] = if background {
        &tokens[..tokens.len() - 1]
    } else {
        &tokens[..]
    };

    // body is non-empty: if it were just "&" alone, tokens[0] == "&" was
    // already rejected above by the "should not start with" check.
    if is_special(body[body.len() - 1]) {
        return Err(format!(
            "syntax error: command should not end with {}",
            body[body.len() - 1]
        ));
    }

    let mut left = SideBuilder::new();
    let mut right: Option<SideBuilder> = None;

    for &tok in body {
        let active = right.as_mut().unwrap_or(&mut left);

        if active.pending != Pending::None {
            active.take_pending(tok)?;
            continue;
        }

        match tok {
            REDIR_IN | REDIR_OUT | REDIR_ERR => active.start_redir(tok)?,
            PIPE => {
                if right.is_some() {
                    return Err(near_token(PIPE));
                }
                if left.side.is_empty() {
                    return Err(near_token(PIPE));
                }
                right = Some(SideBuilder::new());
            }
            _ => active.side.argv.push(tok.to_string()),
        }
    }

    let mut job = Job::new(raw.to_string());
    job.tokens = tokens.iter().map(|s| s.to_string()).collect();
    job.background = background;
    job.left = left.side;
    job.right = right.map(|r| r.side);

    if !job.fits_limits() {
        return Err(format!(
            "syntax error: command exceeds maximum length {}",
            limits::MAX_CMD_LEN
        ));
    }

    Ok(job)
}
