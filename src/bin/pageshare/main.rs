use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};

mod cli;
mod util;
mod cmd_capture;
mod cmd_print;
mod cmd_analyze;
mod cmd_stats_header;

fn init_logger() {
    // RUST_LOG overrides; default is info.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Capture {
            requests,
            count,
            interval,
            save,
            dir,
            csv,
            producer,
        } => cmd_capture::exec(requests, count, interval, save, dir, csv, producer),

        cli::Cmd::Print { file, what } => cmd_print::exec(file, what),

        cli::Cmd::Analyze { op, mark, json } => cmd_analyze::exec(op, mark, json),

        cli::Cmd::StatsHeader => cmd_stats_header::exec(),
    }
}
