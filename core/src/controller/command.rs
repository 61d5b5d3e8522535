//! Classification of inbound operator text.

use super::state::SafetyMode;

pub const DEFAULT_AFFIRMATIVE_TOKENS: &[&str] =
    &["yes", "y", "ye", "ok", "sure", "yeah", "да", "/yes", "/y"];
pub const DEFAULT_NEGATIVE_TOKENS: &[&str] = &[
    "no", "n", "нет", "nah", "cancel", "abort", "stop", "/no", "/n",
];
pub const STOP_TOKENS: &[&str] = &["stop", "/stop"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    NewSession,
    /// Empty when the operator sent a bare `/model` or `/m`.
    SetModel(String),
    ListModels,
    ListSessions,
    /// Raw argument of `/s <n>`; validated against the registry later.
    SwitchSession(String),
    ShowSafety,
    SetSafety(SafetyMode),
    SafetyUsage,
    Status,
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approve,
    Reject,
}

/// The words accepted as yes/no while a command waits for approval.
/// Matching is exact after trimming and lower-casing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalTokens {
    affirmative: Vec<String>,
    negative: Vec<String>,
}

impl ApprovalTokens {
    pub fn new<A, N, S>(affirmative: A, negative: N) -> Self
    where
        A: IntoIterator<Item = S>,
        N: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            affirmative: normalize_tokens(affirmative),
            negative: normalize_tokens(negative),
        }
    }

    pub fn classify(&self, text: &str) -> Option<Approval> {
        let text = text.trim().to_lowercase();
        if self.affirmative.contains(&text) {
            Some(Approval::Approve)
        } else if self.negative.contains(&text) {
            Some(Approval::Reject)
        } else {
            None
        }
    }

    fn contains(&self, lowered: &str) -> bool {
        self.affirmative
            .iter()
            .chain(self.negative.iter())
            .any(|token| token == lowered)
    }
}

impl Default for ApprovalTokens {
    fn default() -> Self {
        Self::new(DEFAULT_AFFIRMATIVE_TOKENS, DEFAULT_NEGATIVE_TOKENS)
    }
}

fn normalize_tokens<I, S>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .map(|token| token.as_ref().trim().to_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

pub fn is_stop(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    STOP_TOKENS.contains(&lowered.as_str())
}

/// Recognizes control commands. Slash-prefixed approval replies and `/stop`
/// are left for the later branches; any other slash text is `Unknown`.
pub fn parse_meta(text: &str, approval: &ApprovalTokens) -> Option<MetaCommand> {
    let text = text.trim();
    let lowered = text.to_lowercase();

    let command = match lowered.as_str() {
        "/new" => MetaCommand::NewSession,
        "/models" => MetaCommand::ListModels,
        "/model" | "/m" => MetaCommand::SetModel(String::new()),
        "/sessions" | "/s" => MetaCommand::ListSessions,
        "/safety" => MetaCommand::ShowSafety,
        "/safety_ask" => MetaCommand::SetSafety(SafetyMode::Ask),
        "/safety_auto" => MetaCommand::SetSafety(SafetyMode::Auto),
        "/info" | "/status" => MetaCommand::Status,
        _ => {
            if let Some(name) = strip_prefix_ignore_case(text, "/model ")
                .or_else(|| strip_prefix_ignore_case(text, "/m "))
            {
                MetaCommand::SetModel(name.trim().to_string())
            } else if let Some(arg) = strip_prefix_ignore_case(text, "/s ") {
                MetaCommand::SwitchSession(arg.trim().to_string())
            } else if lowered.starts_with("/safety") {
                MetaCommand::SafetyUsage
            } else if lowered.starts_with('/')
                && !approval.contains(&lowered)
                && !STOP_TOKENS.contains(&lowered.as_str())
            {
                MetaCommand::Unknown(text.to_string())
            } else {
                return None;
            }
        }
    };
    Some(command)
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}
