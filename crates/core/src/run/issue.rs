//! Issue reference extraction

use std::sync::LazyLock;

use regex::Regex;

static HINT_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("static regex is valid"));

static TITLE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:#|\bissue[\s_\-]*)(\d+)").expect("static regex is valid")
});

/// Issue number from a branch hint (`issue-42`, `42`) or, failing that,
/// from a title reference (`#42`, `Issue 42`)
pub fn extract_issue_number(branch_hint: Option<&str>, title: &str) -> Option<u64> {
    branch_hint
        .and_then(|hint| first_capture(&HINT_NUMBER_RE, hint))
        .or_else(|| first_capture(&TITLE_NUMBER_RE, title))
}

fn first_capture(re: &Regex, text: &str) -> Option<u64> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
