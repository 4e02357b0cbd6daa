//! Collapses the duplicate copies Codex writes for one logical message.
//!
//! Codex records every user and agent message twice, once as an `event_msg`
//! and once as a `response_item`, with slightly different payloads. Both
//! passes keep survivors in their original relative order.

use tracing::trace;

use crate::event::{Event, EventBody};
use crate::util::{char_prefix, timestamp_millis};

const USER_WINDOW_MS: i64 = 3_000;
const AGENT_SCAN_MS: i64 = 5_000;
const AGENT_MATCH_MS: i64 = 2_000;
const AGENT_HEAD_CHARS: usize = 200;
const AGENT_PREFIX_CHARS: usize = 80;

/// Route the viewer's file server resolves local image paths through.
pub const FILE_PROXY_PREFIX: &str = "/api/file?path=";

const PLACEHOLDER_OPEN: &str = "<image name=";
const PLACEHOLDER_CLOSE: &str = "</image>";

pub fn dedupe_codex(events: Vec<Event>) -> Vec<Event> {
    let before = events.len();
    let mut slots: Vec<Option<Event>> = events.into_iter().map(Some).collect();
    dedupe_user_messages(&mut slots);
    dedupe_agent_messages(&mut slots);

    let deduped: Vec<Event> = slots
        .into_iter()
        .flatten()
        .map(normalize_user_message)
        .collect();
    if deduped.len() != before {
        trace!(before, after = deduped.len(), "collapsed duplicate codex messages");
    }
    deduped
}

fn slot_millis(slot: &Option<Event>) -> Option<i64> {
    slot.as_ref().and_then(|event| timestamp_millis(&event.ts))
}

fn user_parts(slot: &Option<Event>) -> Option<(&str, &[String])> {
    match slot.as_ref().map(|event| &event.body) {
        Some(EventBody::UserMessage { text, images }) => Some((text.as_str(), images.as_slice())),
        _ => None,
    }
}

fn dedupe_user_messages(slots: &mut [Option<Event>]) {
    for i in 0..slots.len() {
        let Some(ts_i) = slot_millis(&slots[i]) else {
            continue;
        };
        let Some((text_i, _)) = user_parts(&slots[i]) else {
            continue;
        };
        let key_i = strip_image_placeholders(text_i);

        for j in i + 1..slots.len() {
            let Some(ts_j) = slot_millis(&slots[j]) else {
                continue;
            };
            if ts_j - ts_i > USER_WINDOW_MS {
                break;
            }
            let Some((text_j, _)) = user_parts(&slots[j]) else {
                continue;
            };
            if (ts_j - ts_i).abs() > USER_WINDOW_MS || strip_image_placeholders(text_j) != key_i {
                continue;
            }

            let (Some(first), Some(second)) = (slots[i].take(), slots[j].take()) else {
                break;
            };
            let keep_second =
                has_placeholder(user_text(&first)) && !has_placeholder(user_text(&second));
            if keep_second {
                slots[j] = Some(merge_user_images(second, &first));
                break;
            }
            slots[i] = Some(merge_user_images(first, &second));
        }
    }
}

fn user_text(event: &Event) -> &str {
    match &event.body {
        EventBody::UserMessage { text, .. } => text,
        _ => "",
    }
}

fn is_data_uri(image: &str) -> bool {
    image.starts_with("data:")
}

fn merge_user_images(mut kept: Event, discarded: &Event) -> Event {
    let EventBody::UserMessage {
        images: discarded_images,
        ..
    } = &discarded.body
    else {
        return kept;
    };
    if let EventBody::UserMessage { images, .. } = &mut kept.body {
        let kept_has_data = images.iter().any(|image| is_data_uri(image));
        let discarded_has_data = discarded_images.iter().any(|image| is_data_uri(image));
        if !kept_has_data && (discarded_has_data || discarded_images.len() > images.len()) {
            *images = discarded_images.clone();
        }
    }
    kept
}

fn has_placeholder(text: &str) -> bool {
    text.contains(PLACEHOLDER_OPEN)
}

/// Removes `<image name=...>` openers and `</image>` closers, then trims.
pub fn strip_image_placeholders(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(PLACEHOLDER_OPEN) {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find('>') {
            Some(end) => rest = &tail[end + 1..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.replace(PLACEHOLDER_CLOSE, "").trim().to_string()
}

/// Rewrites a local filesystem path into a file-proxy reference.
pub fn proxy_image_ref(image: &str) -> String {
    if image.starts_with('/') && !image.starts_with(FILE_PROXY_PREFIX) {
        format!("{FILE_PROXY_PREFIX}{}", urlencoding::encode(image))
    } else {
        image.to_string()
    }
}

fn normalize_user_message(mut event: Event) -> Event {
    if let EventBody::UserMessage { text, images } = &mut event.body {
        if has_placeholder(text) || text.contains(PLACEHOLDER_CLOSE) {
            *text = strip_image_placeholders(text);
        }
        for image in images.iter_mut() {
            *image = proxy_image_ref(image);
        }
    }
    event
}

fn agent_parts(slot: &Option<Event>) -> Option<(&str, Option<&str>)> {
    match slot.as_ref().map(|event| &event.body) {
        Some(EventBody::AgentMessage { text, phase }) => Some((text.as_str(), phase.as_deref())),
        _ => None,
    }
}

fn agent_texts_match(a: &str, b: &str) -> bool {
    char_prefix(a, AGENT_HEAD_CHARS) == char_prefix(b, AGENT_HEAD_CHARS)
        || a.starts_with(char_prefix(b, AGENT_PREFIX_CHARS))
        || b.starts_with(char_prefix(a, AGENT_PREFIX_CHARS))
}

fn is_streaming_phase(phase: Option<&str>) -> bool {
    phase.is_some_and(|phase| phase != "final")
}

fn dedupe_agent_messages(slots: &mut [Option<Event>]) {
    for i in 0..slots.len() {
        let Some(ts_i) = slot_millis(&slots[i]) else {
            continue;
        };
        let Some((text_i, phase_i)) = agent_parts(&slots[i]) else {
            continue;
        };
        if text_i.trim().is_empty() {
            continue;
        }
        let (text_i, phase_i) = (text_i.to_string(), phase_i.map(ToString::to_string));

        for j in i + 1..slots.len() {
            let Some(ts_j) = slot_millis(&slots[j]) else {
                continue;
            };
            let delta = ts_j - ts_i;
            if delta > AGENT_SCAN_MS {
                break;
            }
            if delta.abs() > AGENT_MATCH_MS {
                continue;
            }
            let Some((text_j, phase_j)) = agent_parts(&slots[j]) else {
                continue;
            };
            if text_j.trim().is_empty() || !agent_texts_match(&text_i, text_j) {
                continue;
            }

            let streaming_i = is_streaming_phase(phase_i.as_deref());
            let streaming_j = is_streaming_phase(phase_j);
            let keep_second = if streaming_i != streaming_j {
                streaming_j
            } else {
                text_j.chars().count() > text_i.chars().count()
            };
            if keep_second {
                slots[i] = None;
                break;
            }
            slots[j] = None;
        }
    }
}
