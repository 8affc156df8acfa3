//! Fixed resource limits, mirroring `yashd_defs.h` and `yashd.h` in the
//! original implementation.

/// Longest command line accepted from a client, in bytes.
pub const MAX_CMD_LEN: usize = 2000;

/// Longest single token the parser will track without truncation warnings.
pub const MAX_TOKEN_LEN: usize = 30;

/// Largest number of tokens a single command line may tokenize into.
pub const MAX_TOKENS: usize = 1000;

/// Largest number of servant connections the acceptor will admit at once.
pub const MAX_CONCURRENT_CLIENTS: usize = 50;

/// `listen()` backlog passed to the bound socket.
pub const MAX_CONNECT_QUEUE: i32 = 5;

/// Largest number of live jobs tracked per connection.
pub const MAX_CONCURRENT_JOBS: usize = 20;

/// Default TCP port `yashd` listens on.
pub const DEFAULT_PORT: u16 = 3826;

/// Inclusive range of ports accepted on the CLI.
pub const PORT_RANGE: std::ops::RangeInclusive<u16> = 1024..=65535;

/// Interval at which a servant or job task rechecks its cancellation flag
/// while otherwise blocked waiting on I/O.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// The literal prompt bytes sent after every command completes.
pub const PROMPT: &str = "\n# ";

/// Process exit code used by a job child when `execvp()` fails.
pub const EXIT_ERR_CMD: i32 = 6;
