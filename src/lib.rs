pub mod app;
pub mod claude;
pub mod cli;
pub mod codex;
pub mod config;
pub mod decode;
pub mod dedup;
pub mod error;
pub mod event;
pub mod lines;
pub mod patch;
pub mod session;
pub mod tokens;
pub mod util;

pub use error::{IngestError, Result};
pub use event::{Event, EventBody, FileAction, FileRef, TokenUsage};
pub use session::{ParsedSession, PollResult, SessionCache, SessionSource};
