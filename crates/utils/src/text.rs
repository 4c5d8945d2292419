use std::sync::LazyLock;

use regex::Regex;

/// Longest slug produced by [`slugify`].
pub const MAX_SLUG_LEN: usize = 80;

const REF_PREFIXES: &[&str] = &["refs/heads/", "refs/remotes/", "heads/", "remotes/"];

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s/\\]+").expect("separator regex is valid"));
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("disallowed-char regex is valid"));
static HYPHEN_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{2,}").expect("hyphen regex is valid"));
static DOT_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{2,}").expect("dot regex is valid"));

/// Turn a user supplied name into something usable both as a directory name
/// and as the last component of a branch name.
///
/// The result always matches `^[A-Za-z0-9._-]{0,80}$`, never starts or ends
/// with a hyphen and never contains two hyphens in a row.
pub fn slugify(input: &str) -> String {
    let mut rest = input.trim();
    while let Some(stripped) = REF_PREFIXES.iter().find_map(|p| rest.strip_prefix(p)) {
        rest = stripped;
    }

    let slug = SEPARATORS.replace_all(rest, "-");
    let slug = DISALLOWED.replace_all(&slug, "");
    let slug = DOT_RUNS.replace_all(&slug, ".");
    let slug = HYPHEN_RUNS.replace_all(&slug, "-");
    let slug = slug.trim_matches(|c| c == '-' || c == '.');

    // Only ASCII survives the filters above, so byte slicing is safe.
    let cut = &slug[..slug.len().min(MAX_SLUG_LEN)];
    cut.trim_end_matches(|c| c == '-' || c == '.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_well_formed(slug: &str) {
        let shape = Regex::new(r"^[A-Za-z0-9._-]{0,80}$").unwrap();
        assert!(shape.is_match(slug), "bad shape: {slug:?}");
        assert!(!slug.contains("--"), "double hyphen: {slug:?}");
        assert!(!slug.starts_with('-') && !slug.ends_with('-'), "edge hyphen: {slug:?}");
    }

    #[test]
    fn strips_ref_prefixes_and_separators() {
        assert_eq!(slugify("refs/heads/feature/login"), "feature-login");
        assert_eq!(slugify("remotes/origin/main"), "origin-main");
        assert_eq!(slugify("  Fix the   bug  "), "Fix-the-bug");
        assert_eq!(slugify("demo"), "demo");
    }

    #[test]
    fn drops_disallowed_characters() {
        assert_eq!(slugify("what?!*is:this"), "whatisthis");
        assert_eq!(slugify("über café"), "ber-caf");
        assert_eq!(slugify("a..b"), "a.b");
        assert_eq!(slugify("---"), "");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn caps_length_without_trailing_hyphen() {
        let long = format!("{}-{}", "a".repeat(79), "b".repeat(10));
        let slug = slugify(&long);
        assert_eq!(slug, "a".repeat(79));
        assert_eq!(slugify(&"x".repeat(200)).len(), MAX_SLUG_LEN);
    }

    #[test]
    fn output_is_always_well_formed() {
        let inputs = [
            "hello world",
            "--leading and trailing--",
            "a - - b",
            "tabs\tand\nnewlines",
            "refs/heads/refs/heads/x",
            "semi;colon && pipes | `ticks`",
            "🔥 emoji 🔥 name",
            "under_score.dot-dash",
            "/////",
            "a/-/b",
            &"ab-".repeat(60),
        ];
        for input in inputs {
            assert_well_formed(&slugify(input));
        }
    }
}
