use std::process::ExitCode;

use clap::Parser;
use ffmpeg_pipe::{
    error::PipeError,
    session::{Session, SessionConfig, SessionSummary},
};

mod cli;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Runs the whole session on a blocking thread; FFmpeg contexts never cross
/// threads once opened.
async fn run_session(config: SessionConfig) -> anyhow::Result<SessionSummary> {
    let summary =
        tokio::task::spawn_blocking(move || Session::open(config).map(Session::run)).await??;
    Ok(summary)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let opt = cli::Opt::parse();
    if let Err(e) = ffmpeg_pipe::init() {
        log::error!("{:#}", e);
        return ExitCode::FAILURE;
    }

    let result = run_session(opt.into_config()).await;
    ffmpeg_pipe::deinit();

    match result {
        Ok(summary) => {
            println!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.downcast_ref::<PipeError>() {
                Some(reason) => log::error!("session setup failed ({}): {:#}", reason.reason(), e),
                None => log::error!("session setup failed: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}
