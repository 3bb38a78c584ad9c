// SPDX-FileCopyrightText: 2026 Mnemo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Privacy boundary enforced on everything entering the gateway before it
//! reaches `mnemo-session` (spec §4.5/§7 "Privacy strip").
//!
//! Two independent mechanisms:
//! - [`strip_private`] removes bracketed private regions (`[[private]]...
//!   [[/private]]`) from free text.
//! - [`touches_memory_dir`] keeps the service from observing its own
//!   reads/writes against the configured data directory.

/// Marks the start of a private region. An unterminated open marker is
/// treated as "the rest of the text is private" rather than left dangling.
const OPEN: &str = "[[private]]";
const CLOSE: &str = "[[/private]]";

/// Result of running [`strip_private`] over a piece of text.
pub struct Stripped {
    pub text: String,
    pub redacted: bool,
}

/// Removes every `[[private]]...[[/private]]` span from `input`.
pub fn strip_private(input: &str) -> Stripped {
    let mut out = String::with_capacity(input.len());
    let mut redacted = false;
    let mut rest = input;

    loop {
        match rest.find(OPEN) {
            Some(start) => {
                redacted = true;
                out.push_str(&rest[..start]);
                let after_open = &rest[start + OPEN.len()..];
                match after_open.find(CLOSE) {
                    Some(end) => rest = &after_open[end + CLOSE.len()..],
                    None => {
                        rest = "";
                        break;
                    }
                }
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }

    Stripped { text: out, redacted }
}

/// True when stripping removed everything from a non-empty original --
/// the whole prompt/observation was private, not just a fragment of it.
pub fn is_fully_private(original: &str, stripped: &str) -> bool {
    !original.trim().is_empty() && stripped.trim().is_empty()
}

/// True if `tool_input` or `cwd` reference the service's own data
/// directory, meaning this tool call is the worker observing itself
/// rather than the user's project (spec §4.5 item 4).
pub fn touches_memory_dir(tool_input: &str, cwd: Option<&str>, data_dir: &str) -> bool {
    if data_dir.is_empty() {
        return false;
    }
    tool_input.contains(data_dir) || cwd.map(|c| c.contains(data_dir)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_private_removes_single_region() {
        let result = strip_private("before [[private]]secret[[/private]] after");
        assert_eq!(result.text, "before  after");
        assert!(result.redacted);
    }

    #[test]
    fn strip_private_removes_multiple_regions() {
        let result = strip_private("a [[private]]one[[/private]] b [[private]]two[[/private]] c");
        assert_eq!(result.text, "a  b  c");
        assert!(result.redacted);
    }

    #[test]
    fn strip_private_is_noop_without_markers() {
        let result = strip_private("nothing private here");
        assert_eq!(result.text, "nothing private here");
        assert!(!result.redacted);
    }

    #[test]
    fn strip_private_treats_unterminated_marker_as_private_to_end() {
        let result = strip_private("keep this [[private]]but not this");
        assert_eq!(result.text, "keep this ");
        assert!(result.redacted);
    }

    #[test]
    fn is_fully_private_true_only_when_stripped_is_empty_and_original_was_not() {
        assert!(is_fully_private("[[private]]x[[/private]]", ""));
        assert!(is_fully_private("[[private]]x[[/private]]", "   "));
        assert!(!is_fully_private("", ""));
        assert!(!is_fully_private("hi [[private]]x[[/private]]", "hi "));
    }

    #[test]
    fn touches_memory_dir_matches_input_or_cwd() {
        assert!(touches_memory_dir("reading /home/u/.local/share/mnemo/db.sqlite3", None, "/home/u/.local/share/mnemo"));
        assert!(touches_memory_dir("irrelevant", Some("/home/u/.local/share/mnemo"), "/home/u/.local/share/mnemo"));
        assert!(!touches_memory_dir("reading /home/u/project/src/lib.rs", Some("/home/u/project"), "/home/u/.local/share/mnemo"));
    }

    #[test]
    fn touches_memory_dir_false_when_data_dir_unset() {
        assert!(!touches_memory_dir("anything", None, ""));
    }
}
