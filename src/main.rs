use clap::Parser;
use tracing_subscriber::EnvFilter;
use tradesim::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}
