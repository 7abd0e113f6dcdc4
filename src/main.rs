//! scriptcache CLI — compile, check, and run scripts with embedded compiled data.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "scriptcache",
    version,
    about = "Self-validating compiled-artifact cache embedded in script source files"
)]
struct Cli {
    #[command(subcommand)]
    command: scriptcache::cli::Commands,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    if let Err(e) = scriptcache::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
