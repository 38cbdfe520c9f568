//! Validity classification of finished tool runs.

use crate::command::ToolRun;
use crate::ffprobe::{parse_validity, ValidityReport};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest stderr excerpt kept as a diagnostic.
const MAX_REASON_LEN: usize = 200;

/// Why a probe found an address invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionFailed,
    /// TCP preflight could not reach the host.
    TcpUnreachable,
    NotFound,
    PermissionDenied,
    /// The tool exited cleanly but found nothing playable.
    NoStreams,
    Cancelled,
    /// Any other tool failure.
    Tool,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed => "connection_failed",
            Self::TcpUnreachable => "tcp_unreachable",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::NoStreams => "no_streams",
            Self::Cancelled => "cancelled",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an error-text substring (case-insensitive) to an [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub pattern: String,
    pub kind: ErrorKind,
}

impl PolicyRule {
    pub fn new(pattern: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            pattern: pattern.into(),
            kind,
        }
    }
}

/// Outcome of classifying one tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid { kind: ErrorKind, reason: String },
}

/// Table-driven classification of tool runs.
///
/// A clean exit is valid when the output shows a format or a video stream.
/// A failed exit is invalid unless its error text contains one of the
/// `acceptable_errors` substrings. Invalid runs get the kind of the first
/// matching rule, or [`ErrorKind::Tool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationPolicy {
    /// Error-text substrings that still count as a live stream.
    pub acceptable_errors: Vec<String>,
    /// Ordered rules; the first match wins.
    pub rules: Vec<PolicyRule>,
    /// Kinds worth probing again in a retry pass.
    pub retryable: Vec<ErrorKind>,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            acceptable_errors: Vec::new(),
            rules: vec![
                PolicyRule::new("timed out", ErrorKind::Timeout),
                PolicyRule::new("timeout", ErrorKind::Timeout),
                PolicyRule::new("connection", ErrorKind::ConnectionFailed),
                PolicyRule::new("not found", ErrorKind::NotFound),
                PolicyRule::new("404", ErrorKind::NotFound),
                PolicyRule::new("permission", ErrorKind::PermissionDenied),
                PolicyRule::new("403", ErrorKind::PermissionDenied),
            ],
            retryable: vec![ErrorKind::Timeout, ErrorKind::ConnectionFailed, ErrorKind::Tool],
        }
    }
}

impl ClassificationPolicy {
    /// Classify a finished run of the validity probe.
    pub fn classify(&self, run: &ToolRun) -> Verdict {
        match run {
            ToolRun::TimedOut { after } => Verdict::Invalid {
                kind: ErrorKind::Timeout,
                reason: format!("probe timed out after {:.1}s", after.as_secs_f64()),
            },
            ToolRun::Cancelled => Verdict::Invalid {
                kind: ErrorKind::Cancelled,
                reason: "probe cancelled".to_string(),
            },
            ToolRun::Exited(output) if output.success() => match parse_validity(&output.stdout) {
                ValidityReport::Playable => Verdict::Valid,
                ValidityReport::Empty => Verdict::Invalid {
                    kind: ErrorKind::NoStreams,
                    reason: "probe returned empty output".to_string(),
                },
                ValidityReport::NoVideo => Verdict::Invalid {
                    kind: ErrorKind::NoStreams,
                    reason: "no video stream detected".to_string(),
                },
                ValidityReport::Error(text) => self.classify_error_text(&text, None),
            },
            ToolRun::Exited(output) => {
                let text = if output.stderr.trim().is_empty() {
                    output.stdout.as_str()
                } else {
                    output.stderr.as_str()
                };
                self.classify_error_text(text, output.exit_code)
            }
        }
    }

    /// Kind for a piece of error text according to the rule table.
    pub fn kind_for(&self, text: &str) -> ErrorKind {
        let lower = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| !rule.pattern.is_empty() && lower.contains(&rule.pattern.to_lowercase()))
            .map(|rule| rule.kind)
            .unwrap_or(ErrorKind::Tool)
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    fn is_acceptable(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.acceptable_errors
            .iter()
            .any(|p| !p.is_empty() && lower.contains(&p.to_lowercase()))
    }

    fn classify_error_text(&self, text: &str, exit_code: Option<i32>) -> Verdict {
        let text = text.trim();
        if self.is_acceptable(text) {
            return Verdict::Valid;
        }

        let reason = if text.is_empty() {
            match exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }
        } else {
            truncate(text, MAX_REASON_LEN)
        };

        Verdict::Invalid {
            kind: self.kind_for(text),
            reason,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
