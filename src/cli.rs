use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "agent-transcript",
    version,
    about = "Normalize Codex and Claude Code session transcripts into one event stream"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Session reference (`claude:<project>/<id>` or a Codex sessions-relative path),
    /// or a literal file path when `--source` is given.
    #[arg(value_name = "SESSION")]
    pub session: String,
    /// Treat SESSION as a file path of this format (`codex` or `claude-code`).
    #[arg(long, value_name = "SOURCE")]
    pub source: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse a whole session file and print `{events, lineCount}`.
    Parse {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long)]
        pretty: bool,
    },
    /// Print events appended after OFFSET lines as `{events, total}`.
    Poll {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Follow a session, printing each new event as one JSON line.
    Tail {
        #[command(flatten)]
        session: SessionArgs,
        /// Emit the existing events before following.
        #[arg(long)]
        from_start: bool,
    },
    /// Report resolved transcript roots and how many sessions they hold.
    Doctor,
}

impl SessionArgs {
    pub fn literal_path(&self) -> PathBuf {
        PathBuf::from(&self.session)
    }
}
