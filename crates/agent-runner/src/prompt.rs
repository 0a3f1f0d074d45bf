//! Automatic answers to interactive agent prompts
//!
//! Rules are checked in order and the first match wins. File edits inside
//! the working copy are accepted, and are checked first so that a path like
//! `scripts/install.sh` in an edit prompt is not read as an install request.
//! Anything else that would let the agent mutate the environment outside the
//! working copy (installs, upgrades, shell commands, browsers) is declined.

use std::sync::LazyLock;

use regex::Regex;

/// Reply chosen for an interactive prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptReply {
    pub rule: &'static str,
    pub text: &'static str,
}

struct PromptRule {
    name: &'static str,
    pattern: Regex,
    reply: fn(&str) -> &'static str,
}

impl PromptRule {
    fn new(name: &'static str, pattern: &str, reply: fn(&str) -> &'static str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("static regex is valid"),
            reply,
        }
    }
}

fn yes(_: &str) -> &'static str {
    "y"
}

fn no(_: &str) -> &'static str {
    "n"
}

fn yes_if_editing(text: &str) -> &'static str {
    if EDIT_HINT.is_match(text) {
        "y"
    } else {
        "n"
    }
}

static EDIT_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(edit|sav|apply|applies|change|write|creat|modif)").expect("static regex is valid")
});

static UPGRADE_NOTICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(re-?run \S+ to use (the )?new version|restart(ing)? to (use|apply) (the )?(new|upgraded) version|upgrade (complete|installed|succeeded))")
        .expect("static regex is valid")
});

static STANDARD_RULES: LazyLock<Vec<PromptRule>> = LazyLock::new(|| {
    vec![
        PromptRule::new("apply_edits", r"(?i)\b(apply|allow)\b[^\n]*\bedits?\b[^\n]*\?", yes),
        PromptRule::new("file_write", r"(?i)\b(create|write|save|overwrite)\b[^\n]*\bfiles?\b[^\n]*\?", yes),
        PromptRule::new("add_to_chat", r"(?i)\badd\b[^\n]*\bto the chat\b[^\n]*\?", yes),
        PromptRule::new("install_or_upgrade", r"(?i)\b(install|upgrade|update)\b[^\n]*\?", no),
        PromptRule::new("run_command", r"(?i)\b(run|execute)\b[^\n]*(command|shell)[^\n]*\?", no),
        PromptRule::new("open_url", r"(?i)\b(open|browse)\b[^\n]*(url|link|browser|documentation)[^\n]*\?", no),
        PromptRule::new(
            "yes_no_fallback",
            r"(?i)(\(y\)es/\(n\)o|\[y/n\]|\(y/n\)|\[yes/no\]|\(yes/no\))",
            yes_if_editing,
        ),
    ]
});

/// Ordered prompt rules applied to agent output chunks
#[derive(Clone, Copy)]
pub struct PromptResponder {
    rules: &'static [PromptRule],
}

impl PromptResponder {
    /// The built-in rule set
    pub fn standard() -> Self {
        Self {
            rules: STANDARD_RULES.as_slice(),
        }
    }

    /// Pick a reply for `chunk`, if it contains a recognized prompt
    pub fn respond(&self, chunk: &str) -> Option<PromptReply> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(chunk))
            .map(|rule| PromptReply {
                rule: rule.name,
                text: (rule.reply)(chunk),
            })
    }

    /// Names of every rule that matches `chunk`, in evaluation order
    pub fn matching_rules(&self, chunk: &str) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(chunk))
            .map(|rule| rule.name)
            .collect()
    }
}

impl Default for PromptResponder {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for PromptResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptResponder")
            .field("rules", &self.rules.iter().map(|r| r.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Whether the agent announced it upgraded itself and wants a restart
pub fn is_upgrade_notice(text: &str) -> bool {
    UPGRADE_NOTICE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(chunk: &str) -> Option<&'static str> {
        PromptResponder::standard().respond(chunk).map(|r| r.text)
    }

    #[test]
    fn test_accepts_edit_prompts() {
        assert_eq!(reply("Apply edits to src/main.rs? (Y)es/(N)o [Yes]: "), Some("y"));
        assert_eq!(reply("Allow edits to file that has not been added to the chat? (Y)es/(N)o "), Some("y"));
        assert_eq!(reply("Create new file src/util.rs? (Y)es/(N)o [Yes]: "), Some("y"));
        assert_eq!(reply("Add README.md to the chat? (Y)es/(N)o [Yes]: "), Some("y"));
    }

    #[test]
    fn test_declines_environment_changes() {
        assert_eq!(reply("Newer version available. Upgrade now? (Y)es/(N)o [Yes]: "), Some("n"));
        assert_eq!(reply("Install playwright? (Y)es/(N)o [Yes]: "), Some("n"));
        assert_eq!(reply("Run shell command? (Y)es/(N)o [Yes]: "), Some("n"));
        assert_eq!(reply("Open documentation url for more info? (Y)es/(N)o [Yes]: "), Some("n"));
    }

    #[test]
    fn test_first_match_wins() {
        let chunk = "Run shell command to install deps and apply edits? (Y)es/(N)o";
        let responder = PromptResponder::standard();
        let matches = responder.matching_rules(chunk);
        assert!(matches.len() > 1);
        let reply = responder.respond(chunk).unwrap();
        assert_eq!(reply.rule, matches[0]);
        assert_eq!(reply.rule, "apply_edits");
        assert_eq!(reply.text, "y");
    }

    #[test]
    fn test_edit_confirmations_with_install_words_in_paths() {
        let responder = PromptResponder::standard();

        let create = responder
            .respond("Create new file scripts/install.sh? (Y)es/(N)o [Yes]: ")
            .unwrap();
        assert_eq!(create.rule, "file_write");
        assert_eq!(create.text, "y");

        let apply = responder
            .respond("Apply edits to update the parser? (Y)es/(N)o [Yes]: ")
            .unwrap();
        assert_eq!(apply.rule, "apply_edits");
        assert_eq!(apply.text, "y");

        let save = responder
            .respond("Save file docs/upgrade-guide.md? (Y)es/(N)o [Yes]: ")
            .unwrap();
        assert_eq!(save.rule, "file_write");
        assert_eq!(save.text, "y");
    }

    #[test]
    fn test_fallback_depends_on_wording() {
        let responder = PromptResponder::standard();
        let accept = responder.respond("Save changes before exit? [y/n] ").unwrap();
        assert_eq!(accept.rule, "yes_no_fallback");
        assert_eq!(accept.text, "y");

        let decline = responder.respond("Send anonymous analytics? [y/n] ").unwrap();
        assert_eq!(decline.rule, "yes_no_fallback");
        assert_eq!(decline.text, "n");
    }

    #[test]
    fn test_plain_output_is_ignored() {
        assert_eq!(reply("Updated src/lib.rs with 3 hunks\n"), None);
        assert_eq!(reply("Tokens: 2.1k sent, 300 received.\n"), None);
    }

    #[test]
    fn test_upgrade_notice() {
        assert!(is_upgrade_notice("Re-run aider to use new version.\n"));
        assert!(is_upgrade_notice("Upgrade complete\n"));
        assert!(!is_upgrade_notice("Applied edit to src/upgrade.rs\n"));
    }
}
