//! Substring-based classifier for shell commands that need operator approval.
//!
//! Matching is deliberately coarse: `"> "` also matches prose such as
//! `"a > b"` inside a quoted instruction. Over-flagging only costs the
//! operator an extra `y`, so false positives are accepted.

/// Patterns flagged when no override is configured.
pub const DEFAULT_DANGER_PATTERNS: &[&str] = &[
    "rm ", "remove", "delete", "del ", "unlink", "rmdir", "rm -rf", "rm -r ", "> ", ">> ",
    "chmod ", "chown ", "sudo ", "su ", "dd ", "mkfs", "fdisk",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DangerClassifier {
    patterns: Vec<String>,
}

impl DangerClassifier {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| pattern.as_ref().to_lowercase())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        Self { patterns }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns `true` when the lower-cased command contains any pattern.
    ///
    /// Callers must pass the fully constructed shell invocation, not the raw
    /// operator text, so injected flags are classified too.
    pub fn is_dangerous(&self, command: &str) -> bool {
        let command = command.to_lowercase();
        self.patterns
            .iter()
            .any(|pattern| command.contains(pattern.as_str()))
    }
}

impl Default for DangerClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_DANGER_PATTERNS)
    }
}

/// Classifies `command` against [`DEFAULT_DANGER_PATTERNS`].
pub fn is_dangerous(command: &str) -> bool {
    DangerClassifier::default().is_dangerous(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_every_default_pattern_case_insensitively() {
        for pattern in DEFAULT_DANGER_PATTERNS {
            let upper = format!("echo hi && {}target", pattern.to_uppercase());
            assert!(is_dangerous(&upper), "expected {upper:?} to be flagged");
        }
    }

    #[test]
    fn leaves_harmless_commands_alone() {
        let commands = [
            "opencode run --continue 'list files'",
            "ls -la",
            "git status",
            "cargo build --release",
        ];
        for command in commands {
            assert!(!is_dangerous(command), "{command:?} should not be flagged");
        }
    }

    #[test]
    fn model_flag_trips_the_del_pattern() {
        let command = "opencode run --continue --model opencode/kimi-k2.5-free 'list files'";
        assert!(is_dangerous(command));
        let without_del = DangerClassifier::new(
            DEFAULT_DANGER_PATTERNS
                .iter()
                .filter(|pattern| **pattern != "del "),
        );
        assert!(!without_del.is_dangerous(command));
    }

    #[test]
    fn redirection_inside_prose_is_flagged() {
        assert!(is_dangerous("opencode run --continue 'explain why a > b'"));
    }

    #[test]
    fn custom_patterns_replace_defaults() {
        let classifier = DangerClassifier::new(["Git Push", ""]);
        assert_eq!(classifier.patterns(), ["git push".to_string()]);
        assert!(classifier.is_dangerous("GIT PUSH origin main"));
        assert!(!classifier.is_dangerous("rm -rf /"));
    }
}
