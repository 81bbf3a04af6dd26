pub mod models;

pub use models::{
    Condition, ConditionKind, ConditionKindError, CreateCondition, CreateSharedScript,
    CreateTrigger, MatchedCondition, SharedScript, Trigger,
};
