use serde::{Deserialize, Serialize};

pub const HINT_TAIL_CHARS: usize = 300;

/// Closed taxonomy of execution failures. Unmatched nonzero exits
/// degrade to `Unknown`; classification itself never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[default]
    None,
    UncUnreachable,
    TokenMissing,
    Mojibake,
    DocLocked,
    WorkerExhausted,
    Timeout,
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::UncUnreachable => "unc_unreachable",
            Self::TokenMissing => "token_missing",
            Self::Mojibake => "mojibake",
            Self::DocLocked => "doc_locked",
            Self::WorkerExhausted => "worker_exhausted",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "none" => Ok(Self::None),
            "unc_unreachable" => Ok(Self::UncUnreachable),
            "token_missing" => Ok(Self::TokenMissing),
            "mojibake" => Ok(Self::Mojibake),
            "doc_locked" => Ok(Self::DocLocked),
            "worker_exhausted" => Ok(Self::WorkerExhausted),
            "timeout" => Ok(Self::Timeout),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("unknown failure kind `{raw}`")),
        }
    }

    pub fn hint(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::UncUnreachable => {
                Some("Check NAS / VPN access; the network volume is unreachable.")
            }
            Self::TokenMissing => {
                Some("Export the diarization API token before launching this stage.")
            }
            Self::Mojibake => Some("Inspect the source encoding; the output contains mojibake."),
            Self::DocLocked => Some("Another operation holds this document; retry once it ends."),
            Self::WorkerExhausted => {
                Some("Pipeline worker pool is exhausted; lower concurrency or retry later.")
            }
            Self::Timeout => Some("The stage exceeded its time budget; re-run or split the input."),
            Self::Unknown => Some("Consult the full job log for diagnosis."),
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: FailureKind,
    pub hint: Option<String>,
}

impl Classification {
    pub fn none() -> Self {
        Self {
            kind: FailureKind::None,
            hint: None,
        }
    }
}

// Needles are matched against the lowercased log tail, first hit wins.
const MATCHERS: &[(&str, FailureKind)] = &[
    ("token missing", FailureKind::TokenMissing),
    ("diarization token", FailureKind::TokenMissing),
    ("hf token", FailureKind::TokenMissing),
    ("network path was not found", FailureKind::UncUnreachable),
    ("system cannot find the path", FailureKind::UncUnreachable),
    ("no route to host", FailureKind::UncUnreachable),
    ("host is unreachable", FailureKind::UncUnreachable),
    ("stale file handle", FailureKind::UncUnreachable),
    ("mojibake", FailureKind::Mojibake),
    ("\u{fffd}", FailureKind::Mojibake),
    ("ã©", FailureKind::Mojibake),
    ("locked by another job", FailureKind::DocLocked),
    ("document is locked", FailureKind::DocLocked),
    ("worker pool exhausted", FailureKind::WorkerExhausted),
    ("no free worker", FailureKind::WorkerExhausted),
    ("resource temporarily unavailable", FailureKind::WorkerExhausted),
    ("cuda out of memory", FailureKind::WorkerExhausted),
    ("timed out", FailureKind::Timeout),
    ("timeout exceeded", FailureKind::Timeout),
    ("deadline exceeded", FailureKind::Timeout),
];

// Conventional timeout exit code (GNU timeout and friends).
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Map an exit outcome plus the captured log tail to a failure kind and a
/// human hint. Exit 0 is `None`; anything else falls through the needle
/// table and bottoms out at `Unknown` with the raw tail as hint.
pub fn classify(exit_code: Option<i32>, log_tail: &str) -> Classification {
    if exit_code == Some(0) {
        return Classification::none();
    }
    let lowered = log_tail.to_lowercase();
    for (needle, kind) in MATCHERS {
        if lowered.contains(needle) {
            return Classification {
                kind: *kind,
                hint: kind.hint().map(str::to_string),
            };
        }
    }
    if exit_code == Some(TIMEOUT_EXIT_CODE) {
        return Classification {
            kind: FailureKind::Timeout,
            hint: FailureKind::Timeout.hint().map(str::to_string),
        };
    }
    let tail: String = log_tail
        .chars()
        .rev()
        .take(HINT_TAIL_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let tail = tail.trim();
    Classification {
        kind: FailureKind::Unknown,
        hint: if tail.is_empty() {
            FailureKind::Unknown.hint().map(str::to_string)
        } else {
            Some(tail.to_string())
        },
    }
}
