use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::cli::SessionArgs;
use crate::config::{self, IngestConfig, RuntimeSettings, SessionRef};
use crate::session::{SessionCache, SessionSource};

pub fn resolve(config: &IngestConfig, args: &SessionArgs) -> Result<SessionRef> {
    if let Some(source) = args.source.as_deref() {
        let source: SessionSource = source.parse()?;
        return Ok(SessionRef {
            path: args.literal_path(),
            source,
        });
    }
    let session = config
        .roots()
        .resolve(&args.session)
        .with_context(|| format!("failed to resolve session `{}`", args.session))?;
    Ok(session)
}

pub fn parse(cache: &SessionCache, session: &SessionRef, pretty: bool) -> Result<()> {
    let parsed = cache.parse_session_file(&session.path, session.source)?;
    let out = if pretty {
        serde_json::to_string_pretty(parsed.as_ref())?
    } else {
        serde_json::to_string(parsed.as_ref())?
    };
    println!("{out}");
    Ok(())
}

pub fn poll(cache: &SessionCache, session: &SessionRef, offset: usize) -> Result<()> {
    let result = cache.poll_from_offset(&session.path, session.source, offset)?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

pub fn tail(
    cache: &SessionCache,
    session: &SessionRef,
    from_start: bool,
    runtime: &RuntimeSettings,
) -> Result<()> {
    let stop = install_stop_signal()?;
    let mut offset = if from_start {
        0
    } else {
        cache
            .poll_from_offset(&session.path, session.source, usize::MAX)?
            .total
    };

    let stdout = io::stdout();
    while !stop.load(Ordering::Relaxed) {
        match cache.poll_from_offset(&session.path, session.source, offset) {
            Ok(result) => {
                if result.total < offset {
                    warn!(
                        path = %session.path.display(),
                        offset,
                        total = result.total,
                        "session shrank; resuming at its new end"
                    );
                }
                let mut out = stdout.lock();
                for event in &result.events {
                    serde_json::to_writer(&mut out, event)?;
                    out.write_all(b"\n")?;
                }
                out.flush()?;
                offset = result.total;
            }
            Err(err) => debug!(error = %err, "session poll failed"),
        }
        thread::sleep(runtime.poll_interval);
    }
    Ok(())
}

pub fn doctor(config: &IngestConfig) -> Result<u8> {
    let mut issues = 0u8;
    let roots = config.roots();

    println!("agent-transcript doctor");
    println!("config_path: {}", config::config_path().display());

    let mut accessible = 0;
    for (label, root) in [
        ("codex_sessions", roots.codex_sessions()),
        ("claude_projects", roots.claude_projects()),
    ] {
        println!("{label}: {}", root.display());
        if root.is_dir() {
            accessible += 1;
            println!("[OK] {} session file(s) found.", count_sessions(&root));
        } else {
            println!("[INFO] directory not found.");
        }
    }

    if accessible == 0 {
        issues += 1;
        println!("[WARN] Neither Codex nor Claude Code transcripts are accessible.");
    }

    if issues == 0 {
        println!("Doctor: healthy");
        Ok(0)
    } else {
        println!("Doctor: {issues} issue(s) found");
        Ok(1)
    }
}

fn count_sessions(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("jsonl"))
        .count()
}

fn install_stop_signal() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl+C handler")?;
    Ok(stop)
}
