//! Outcome model: the result of running one job's command.
//!
//! The core never looks inside a command; it only needs to know whether the
//! run succeeded and what text to keep for the operator.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// Something captured while a command ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Stdout(String),
    Stderr(String),
}

/// Result of one execution.
///
/// - `Success`: the command exited with status 0 inside the timeout.
/// - `Failure`: non-zero exit, spawn error or timeout; `reason` holds the text
///   that ends up in the job's `error_message`.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub artifacts: Vec<Artifact>,
    pub reason: Option<String>,
    pub exit_code: Option<i32>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            artifacts: Vec::new(),
            reason: None,
            exit_code: Some(0),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            artifacts: Vec::new(),
            reason: Some(reason.into()),
            exit_code: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    /// Error text recorded on the job for a failed run.
    pub fn error_text(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| "command failed".to_string())
    }

    pub fn stdout(&self) -> Option<&str> {
        self.artifacts.iter().find_map(|a| match a {
            Artifact::Stdout(s) => Some(s.as_str()),
            Artifact::Stderr(_) => None,
        })
    }
}
