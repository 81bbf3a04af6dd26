pub mod condition;
pub mod matched_condition;
pub mod shared_script;
pub mod trigger;

pub use condition::{Condition, ConditionKind, ConditionKindError, CreateCondition};
pub use matched_condition::MatchedCondition;
pub use shared_script::{CreateSharedScript, SharedScript};
pub use trigger::{CreateTrigger, Trigger};
