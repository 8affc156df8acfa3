use clap::Parser;

use yashd_rs::limits;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Host running yashd.
    pub host: String,
    /// Port yashd is listening on.
    #[arg(default_value_t = limits::DEFAULT_PORT)]
    pub port: u16,
}
