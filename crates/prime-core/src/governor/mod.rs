//! Capability profiling and the load governor.

pub mod clg;
pub mod guardrail;
pub mod profiler;

pub use clg::{GovernorState, Transition, TurnRecord, TurnSignal};
pub use guardrail::{turn_signal, DefaultPolicy, GuardrailPolicy, Severity, Violation, ViolationKind};
pub use profiler::{brilliance, CapabilityRecord, Probe, MIDLINE};
