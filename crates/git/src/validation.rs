/// Full branch name check. Leading `-` and `HEAD` are rejected on top of
/// libgit2's ref-format rules so names are never read as options.
pub fn is_valid_branch_name(name: &str) -> bool {
    if name.is_empty() || name.starts_with('-') || name == "HEAD" {
        return false;
    }
    git2::Branch::name_is_valid(name).unwrap_or_default()
}

/// Prefix placed before `/` in generated worktree branches. Empty disables it.
pub fn is_valid_branch_prefix(prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }

    if prefix.contains('/') {
        return false;
    }

    is_valid_branch_name(&format!("{prefix}/x"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_names() {
        assert!(is_valid_branch_name("main"));
        assert!(is_valid_branch_name("openchamber/swift-fox"));
        assert!(is_valid_branch_name("feature/login-v2"));
        assert!(!is_valid_branch_name(""));
        assert!(!is_valid_branch_name("-rf"));
        assert!(!is_valid_branch_name("HEAD"));
        assert!(!is_valid_branch_name("a..b"));
        assert!(!is_valid_branch_name("with space"));
        assert!(!is_valid_branch_name("trailing/"));
        assert!(!is_valid_branch_name("x.lock"));
    }

    #[test]
    fn valid_prefixes() {
        assert!(is_valid_branch_prefix(""));
        assert!(is_valid_branch_prefix("openchamber"));
        assert!(is_valid_branch_prefix("hotfix-123"));
        assert!(is_valid_branch_prefix("foo.bar"));
        assert!(is_valid_branch_prefix("FOO_Bar"));
    }

    #[test]
    fn invalid_prefixes() {
        for bad in [
            "foo/bar", "foo..bar", "foo@{", "foo.lock", "foo bar", "foo?", "foo*", "foo~",
            "foo^", "foo:", "foo[", "/foo", "foo/", ".foo", "-foo",
        ] {
            assert!(!is_valid_branch_prefix(bad), "{bad}");
        }
    }
}
