// src/main.rs
use bart_summarizer::runtime_interface;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    runtime_interface::run_cli()
}
