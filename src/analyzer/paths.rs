//! Protected-path validation for destructive commands
//!
//! Tokenizes a command line, extracts absolute path arguments, and reports
//! whether any of them targets a configured protected directory. When more
//! than one protected prefix matches, the longest one wins, so a rejection
//! message names the most specific directory.

/// Commands that can destroy or displace files. Matched with a trailing
/// space so `rma` or `tarball` do not trigger.
const DESTRUCTIVE_OPS: &[&str] = &[
    "rm ", "mv ", "cp ", "chmod ", "chown ", "chgrp ", "find ", "tar ", "dd ",
];

/// A protected-directory hit: the offending argument and the matched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedPathHit {
    pub path: String,
    pub prefix: String,
}

/// Check a command against the protected-path list.
///
/// Returns `None` when the command carries no destructive operation or none
/// of its absolute path arguments falls under a protected prefix.
pub fn check_protected_paths(command: &str, protected_dirs: &[String]) -> Option<ProtectedPathHit> {
    if protected_dirs.is_empty() {
        return None;
    }

    let lower = command.to_lowercase();
    let has_destructive_op = DESTRUCTIVE_OPS.iter().any(|op| lower.contains(op));
    if !has_destructive_op {
        return None;
    }

    let mut best: Option<ProtectedPathHit> = None;

    for token in command.split_whitespace() {
        let stripped = strip_quotes(token);
        if !stripped.starts_with('/') {
            continue;
        }
        let path = normalize_path(stripped);

        for prefix in protected_dirs {
            let prefix = normalize_path(prefix);
            if !matches_prefix(&path, &prefix) {
                continue;
            }
            let better = best
                .as_ref()
                .map(|hit| prefix.len() > hit.prefix.len())
                .unwrap_or(true);
            if better {
                best = Some(ProtectedPathHit {
                    path: path.clone(),
                    prefix,
                });
            }
        }
    }

    best
}

/// Prefix-match semantics: `/` only guards itself (and the `/*` glob), while
/// any other prefix guards itself and everything below it.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path == "/" || path == "/*";
    }
    path == prefix
        || path.starts_with(&format!("{prefix}/"))
        || path.starts_with(&format!("{prefix}/*"))
}

fn strip_quotes(token: &str) -> &str {
    token
        .trim_matches('\'')
        .trim_matches('"')
}

/// Lexical path cleaning: collapse duplicate separators, drop `.`, resolve
/// `..` without touching the filesystem. Glob stars survive as components.
fn normalize_path(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }

    if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protected(dirs: &[&str]) -> Vec<String> {
        dirs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn longest_prefix_wins() {
        let hit = check_protected_paths(
            "rm -rf /etc/passwd",
            &protected(&["/", "/etc", "/usr", "/bin"]),
        )
        .unwrap();
        assert_eq!(hit.prefix, "/etc");
        assert_eq!(hit.path, "/etc/passwd");
    }

    #[test]
    fn root_prefix_only_matches_root_itself() {
        let dirs = protected(&["/"]);
        assert!(check_protected_paths("rm -rf /", &dirs).is_some());
        assert!(check_protected_paths("rm -rf /*", &dirs).is_some());
        assert!(check_protected_paths("rm -rf /tmp/scratch", &dirs).is_none());
    }

    #[test]
    fn non_destructive_command_passes() {
        let dirs = protected(&["/etc"]);
        assert!(check_protected_paths("ls -la /etc", &dirs).is_none());
        assert!(check_protected_paths("cat /etc/passwd", &dirs).is_none());
    }

    #[test]
    fn relative_paths_are_ignored() {
        let dirs = protected(&["/etc"]);
        assert!(check_protected_paths("rm -rf etc/passwd", &dirs).is_none());
    }

    #[test]
    fn quoted_paths_are_unwrapped() {
        let dirs = protected(&["/var"]);
        let hit = check_protected_paths("rm -rf \"/var/log\"", &dirs).unwrap();
        assert_eq!(hit.prefix, "/var");
        assert_eq!(hit.path, "/var/log");
    }

    #[test]
    fn dot_segments_are_resolved_lexically() {
        let dirs = protected(&["/etc"]);
        let hit = check_protected_paths("rm -rf /tmp/../etc/./passwd", &dirs).unwrap();
        assert_eq!(hit.path, "/etc/passwd");
    }

    #[test]
    fn glob_under_prefix_matches() {
        let dirs = protected(&["/etc"]);
        let hit = check_protected_paths("rm -rf /etc/*", &dirs).unwrap();
        assert_eq!(hit.prefix, "/etc");
    }

    #[test]
    fn destructive_op_requires_trailing_space() {
        let dirs = protected(&["/etc"]);
        // `format` contains no destructive-op token, and `rmdir` does not
        // produce the `rm ` substring either.
        assert!(check_protected_paths("format /etc", &dirs).is_none());
        assert!(check_protected_paths("rmdir /etc", &dirs).is_none());
    }

    #[test]
    fn empty_protected_list_never_blocks() {
        assert!(check_protected_paths("rm -rf /etc", &[]).is_none());
    }
}
