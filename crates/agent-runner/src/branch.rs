//! Branch naming for produced patch sets

use rand::Rng;

use fixer_core::mode::ModeTag;

const SUFFIX_LEN: usize = 6;

/// Random lowercase alphanumeric suffix so reruns never collide
pub fn disambiguator() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// `fix/<mode>-issue-<n>-<suffix>`, or `fix/<mode>-<suffix>` without an issue number
pub fn derive_branch_name(mode: &ModeTag, issue: Option<u64>) -> String {
    format_branch_name(&mode.slug(), issue, &disambiguator())
}

/// `fix/<first>-then-<second>-issue-<n>-<suffix>` for the second pass of a sequence
pub fn chained_branch_name(first: &ModeTag, second: &ModeTag, issue: Option<u64>) -> String {
    let stem = format!("{}-then-{}", first.slug(), second.slug());
    format_branch_name(&stem, issue, &disambiguator())
}

fn format_branch_name(stem: &str, issue: Option<u64>, suffix: &str) -> String {
    match issue {
        Some(n) => format!("fix/{}-issue-{}-{}", stem, n, suffix),
        None => format!("fix/{}-{}", stem, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disambiguator_shape() {
        let suffix = disambiguator();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_format_with_issue() {
        assert_eq!(
            format_branch_name("patcher", Some(42), "abc123"),
            "fix/patcher-issue-42-abc123"
        );
        assert_eq!(format_branch_name("patcher", None, "abc123"), "fix/patcher-abc123");
    }

    #[test]
    fn test_hybrid_mode_is_slugged() {
        let name = derive_branch_name(&ModeTag::new("hybrid:security"), Some(7));
        assert!(name.starts_with("fix/hybrid-security-issue-7-"));
        assert_eq!(name.len(), "fix/hybrid-security-issue-7-".len() + SUFFIX_LEN);
    }

    #[test]
    fn test_chained_name_embeds_both_modes() {
        let name = chained_branch_name(&ModeTag::new("architect"), &ModeTag::new("patcher"), Some(12));
        assert!(name.starts_with("fix/architect-then-patcher-issue-12-"));
    }

    #[test]
    fn test_names_differ_between_runs() {
        let mode = ModeTag::new("patcher");
        let names: std::collections::HashSet<_> =
            (0..20).map(|_| derive_branch_name(&mode, Some(1))).collect();
        assert!(names.len() > 1);
    }
}
