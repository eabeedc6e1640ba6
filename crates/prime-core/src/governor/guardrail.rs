use serde::{Deserialize, Serialize};

use super::clg::TurnSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A fence the parser rejected.
    MalformedFence,
    /// An action beyond the Mode's plan size.
    PlanLimit,
    /// A verb/qualifier pair with no handler.
    UnknownHandler,
    /// A command matching a destructive pattern.
    DestructiveCommand,
    /// A mutating request without `mutate="true"` and a rationale.
    UnjustifiedMutation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub action: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Severe,
}

/// Decides which violations are severe breaches. Severe breaches block the
/// action and demote the Mode at once.
pub trait GuardrailPolicy: Send + Sync {
    fn classify(&self, violation: &Violation) -> Severity;
}

/// Destructive commands are severe; everything else is minor.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl GuardrailPolicy for DefaultPolicy {
    fn classify(&self, violation: &Violation) -> Severity {
        match violation.kind {
            ViolationKind::DestructiveCommand => Severity::Severe,
            _ => Severity::Minor,
        }
    }
}

/// Summarize a turn's violations for the governor.
pub fn turn_signal(violations: &[Violation], policy: &dyn GuardrailPolicy) -> TurnSignal {
    TurnSignal {
        violations: u32::try_from(violations.len()).unwrap_or(u32::MAX),
        severe: violations
            .iter()
            .any(|v| policy.classify(v) == Severity::Severe),
    }
}
