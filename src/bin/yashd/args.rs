use clap::Parser;

use yashd_rs::limits;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = limits::DEFAULT_PORT, value_parser = parse_port)]
    pub port: u16,
    /// Enables verbose (trace-level, human-readable) logging.
    #[arg(short, long, default_value_t)]
    pub verbose: bool,
}

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("not a valid port: {s}"))?;
    if limits::PORT_RANGE.contains(&port) {
        Ok(port)
    } else {
        Err(format!(
            "port must be between {} and {}",
            limits::PORT_RANGE.start(),
            limits::PORT_RANGE.end()
        ))
    }
}
