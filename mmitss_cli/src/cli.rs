//! Common command line of the roadside processes.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// configuration file
    #[arg(short = 's', long = "config")]
    pub config: PathBuf,

    /// intersection name as listed in the nmap file
    #[arg(short = 'n', long = "name")]
    pub name: String,

    /// print progress to stdout
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}
