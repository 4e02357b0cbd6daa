use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use agent_transcript::app;
use agent_transcript::cli::{Cli, Commands};
use agent_transcript::config::{self, IngestConfig};
use agent_transcript::session::SessionCache;
use agent_transcript::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("agent-transcript error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<u8> {
    setup_tracing();
    let cli = Cli::parse();
    let config = IngestConfig::load_or_init()?;
    let cache = SessionCache::new();

    match cli.command {
        Commands::Parse { session, pretty } => {
            let session = app::resolve(&config, &session)?;
            app::parse(&cache, &session, pretty)?;
            Ok(0)
        }
        Commands::Poll { session, offset } => {
            let session = app::resolve(&config, &session)?;
            app::poll(&cache, &session, offset)?;
            Ok(0)
        }
        Commands::Tail {
            session,
            from_start,
        } => {
            let session = app::resolve(&config, &session)?;
            let runtime = config::runtime_settings();
            app::tail(&cache, &session, from_start, &runtime)?;
            Ok(0)
        }
        Commands::Doctor => app::doctor(&config),
    }
}
