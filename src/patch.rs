//! Patch text helpers shared by both parsers.
//!
//! Patches use the apply_patch envelope: `*** Begin Patch`, one
//! `*** {Add,Update,Delete} File: <path>` header per file, `+`/`-` body lines,
//! `*** End Patch`. Bodies are not validated as diffs.

use crate::event::{FileAction, FileRef};

const BEGIN: &str = "*** Begin Patch";
const END: &str = "*** End Patch";

pub fn files_from_patch(patch: &str) -> Vec<FileRef> {
    let mut files = Vec::new();
    for line in patch.lines() {
        let line = line.trim_end();
        let parsed = if let Some(path) = line.strip_prefix("*** Update File: ") {
            Some((FileAction::Update, path))
        } else if let Some(path) = line.strip_prefix("*** Add File: ") {
            Some((FileAction::Add, path))
        } else {
            line.strip_prefix("*** Delete File: ")
                .map(|path| (FileAction::Delete, path))
        };
        if let Some((action, path)) = parsed {
            let path = path.trim();
            if !path.is_empty() {
                files.push(FileRef {
                    action,
                    path: path.to_string(),
                });
            }
        }
    }
    files
}

pub fn add_file_patch(path: &str, content: &str) -> String {
    let mut patch = format!("{BEGIN}\n*** Add File: {path}\n");
    for line in content.lines() {
        patch.push('+');
        patch.push_str(line);
        patch.push('\n');
    }
    patch.push_str(END);
    patch
}

/// Builds an update patch with one `@@` hunk per `(old, new)` replacement.
pub fn update_file_patch<'a, I>(path: &str, edits: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut patch = format!("{BEGIN}\n*** Update File: {path}\n");
    for (old, new) in edits {
        patch.push_str("@@\n");
        for line in old.lines() {
            patch.push('-');
            patch.push_str(line);
            patch.push('\n');
        }
        for line in new.lines() {
            patch.push('+');
            patch.push_str(line);
            patch.push('\n');
        }
    }
    patch.push_str(END);
    patch
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeredocWrite {
    pub path: String,
    pub content: String,
}

/// Recognizes `cat > PATH <<'DELIM'` (and `cat <<DELIM > PATH`) commands whose
/// only effect is writing the heredoc body to a file.
///
/// Appends (`>>`), missing terminators, and anything chained after the
/// terminator disqualify the command.
pub fn heredoc_write(cmd: &str) -> Option<HeredocWrite> {
    let cmd = cmd.trim_start();
    let (header, rest) = cmd.split_once('\n')?;
    let header = header.trim();
    let after_cat = header.strip_prefix("cat")?;
    if !after_cat.starts_with([' ', '\t', '>', '<']) {
        return None;
    }

    let (before, heredoc) = after_cat.split_once("<<")?;
    let strip_tabs = heredoc.starts_with('-');
    let heredoc = heredoc.trim_start_matches('-').trim_start();
    let (delimiter, tail) = split_delimiter(heredoc)?;

    let path = match (redirect_target(before)?, redirect_target(tail)?) {
        (Some(path), None) | (None, Some(path)) => path,
        _ => return None,
    };

    let mut content_lines = Vec::new();
    let mut lines = rest.lines();
    let mut terminated = false;
    for line in lines.by_ref() {
        let candidate = if strip_tabs {
            line.trim_start_matches('\t')
        } else {
            line
        };
        if candidate.trim_end() == delimiter {
            terminated = true;
            break;
        }
        content_lines.push(candidate);
    }
    if !terminated || lines.any(|line| !line.trim().is_empty()) {
        return None;
    }

    let mut content = content_lines.join("\n");
    if !content_lines.is_empty() {
        content.push('\n');
    }
    Some(HeredocWrite { path, content })
}

fn split_delimiter(input: &str) -> Option<(&str, &str)> {
    let quote = input.chars().next()?;
    if quote == '\'' || quote == '"' {
        let inner = &input[1..];
        let end = inner.find(quote)?;
        let delimiter = &inner[..end];
        (!delimiter.is_empty()).then_some((delimiter, &inner[end + 1..]))
    } else {
        let end = input
            .find(|c: char| c.is_whitespace() || c == '>')
            .unwrap_or(input.len());
        let delimiter = &input[..end];
        (!delimiter.is_empty()).then_some((delimiter, &input[end..]))
    }
}

/// `Some(None)` for an empty fragment, `Some(Some(path))` for a lone `> path`,
/// `None` for anything else.
fn redirect_target(fragment: &str) -> Option<Option<String>> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return Some(None);
    }
    let target = fragment.strip_prefix('>')?;
    if target.starts_with('>') {
        return None;
    }
    let target = target.trim();
    if target.is_empty() || target.contains(char::is_whitespace) {
        return None;
    }
    let unquoted = target
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| target.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
        .unwrap_or(target);
    (!unquoted.is_empty()).then(|| Some(unquoted.to_string()))
}
