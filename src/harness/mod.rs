pub mod interaction;
pub mod registry;
pub mod sequence;
pub mod step;
pub mod types;

pub use interaction::{InteractionResolver, Resolution};
pub use registry::{OperationRegistry, OperationSummary};
pub use sequence::{RunState, SequenceRunner};
pub use step::StepExecutor;
pub use types::{
    Check, ConfigError, ConfigResult, Control, FaultClass, HarnessConfig, HarnessError,
    HarnessResult, InteractionRule, Operation, SpVariant, Step, UrlPattern,
};
