// ABOUTME: Removes ANSI escape sequences from captured process output.
// ABOUTME: Covers CSI (colors, cursor movement), OSC (titles, links), and two-byte escapes.

use regex::Regex;
use std::sync::LazyLock;

pub(super) static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-?]*[ -/]*[@-~]",
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        r"|\x1b[@-Z\\-_]",
    ))
    .expect("ANSI escape pattern is valid")
});

/// Strip ANSI escape sequences, leaving the visible text.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}
