// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-output post-processing.
//!
//! Oversized outputs are middle-truncated before being fed back to the
//! model, except when the tool opts out via `allow_summary = false`; then
//! the output passes through byte-for-byte.  The threshold counts
//! characters, so multibyte text is not penalized; the truncation markers
//! report dropped bytes.  Embedded base64 data URLs are kept intact where
//! possible, because a truncated data URL is useless to every consumer.

/// Outputs longer than this many characters are truncated (when the tool
/// allows it).
pub const MAX_RESULT_CHARS: usize = 50_000;

/// Post-process one tool output.
///
/// With `allow_summary == false` the input is returned exactly as given, at
/// any size.  Otherwise outputs over [`MAX_RESULT_CHARS`] characters are
/// middle-truncated with a byte-count marker; when the output embeds a
/// base64 data URL that fits the budget, the URL survives whole and only the
/// text around it is cut.
pub fn process_tool_result(output: String, allow_summary: bool) -> String {
    // Byte length bounds character count from above, so anything within the
    // budget in bytes is within it in characters too.
    if !allow_summary || output.len() <= MAX_RESULT_CHARS {
        return output;
    }
    let total_chars = output.chars().count();
    if total_chars <= MAX_RESULT_CHARS {
        return output;
    }

    if let Some((start, end)) = first_data_url(&output) {
        // Data URLs are ASCII, so the span's byte length is its char count.
        let url_chars = end - start;
        // Leave room for surrounding context and the markers themselves.
        if url_chars <= MAX_RESULT_CHARS.saturating_sub(2_000) {
            return truncate_around(&output, start, end);
        }
    }
    middle_truncate(&output, total_chars)
}

fn marker(dropped_bytes: usize) -> String {
    format!("\n[... {dropped_bytes} bytes truncated ...]\n")
}

/// Byte index of the character at position `chars`, or the string's end.
fn char_to_byte_index(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

/// Keep the head and tail of `s`, dropping the middle down to
/// [`MAX_RESULT_CHARS`] kept characters.
fn middle_truncate(s: &str, total_chars: usize) -> String {
    let keep = MAX_RESULT_CHARS / 2;
    let head_end = char_to_byte_index(s, keep);
    let tail_start = char_to_byte_index(s, total_chars - keep);
    let dropped = tail_start - head_end;
    let mut out = String::with_capacity(head_end + (s.len() - tail_start) + 64);
    out.push_str(&s[..head_end]);
    out.push_str(&marker(dropped));
    out.push_str(&s[tail_start..]);
    out
}

/// Keep the data URL spanning `url_start..url_end` whole; truncate the text
/// before and after it to fit the overall character budget.
fn truncate_around(s: &str, url_start: usize, url_end: usize) -> String {
    let url_chars = url_end - url_start;
    let text_budget = MAX_RESULT_CHARS - url_chars;
    let side = text_budget / 2;

    let prefix = &s[..url_start];
    let suffix = &s[url_end..];
    let prefix_chars = prefix.chars().count();
    let suffix_chars = suffix.chars().count();

    let mut out = String::with_capacity(url_chars + text_budget * 4 + 128);
    if prefix_chars <= side {
        out.push_str(prefix);
    } else {
        let head_end = char_to_byte_index(prefix, side);
        out.push_str(&prefix[..head_end]);
        out.push_str(&marker(prefix.len() - head_end));
    }
    out.push_str(&s[url_start..url_end]);
    if suffix_chars <= side {
        out.push_str(suffix);
    } else {
        let tail_start = char_to_byte_index(suffix, suffix_chars - side);
        out.push_str(&marker(tail_start));
        out.push_str(&suffix[tail_start..]);
    }
    out
}

/// Locate the first `data:<mime>;base64,<payload>` span in `s`.
fn first_data_url(s: &str) -> Option<(usize, usize)> {
    let start = s.find("data:")?;
    let after_scheme = &s[start..];
    let b64_offset = after_scheme.find(";base64,")?;
    let payload_start = start + b64_offset + ";base64,".len();
    let payload_len = s[payload_start..]
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .count();
    if payload_len == 0 {
        return None;
    }
    Some((start, payload_start + payload_len))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
