pub mod action;
pub mod env;
pub mod mode;
pub mod result;
pub mod step;

pub use action::{
    Action, ActionId, ActionSpec, Attrs, FenceHeader, GetSpec, LineRange, Locator, ResultSpec,
    RunSpec, SetSpec, Verb, WriteMode, DEFAULT_QUALIFIER, QUALIFIER_ATTR,
};
pub use env::EnvSnapshot;
pub use mode::{Mode, ModeConstraints, VerificationCadence, Verbosity};
pub use result::{ActionResult, ErrorCode, ErrorInfo, Status};
pub use step::{StepKind, MAX_STEPS};
