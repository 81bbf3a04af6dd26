pub mod models;

pub use models::{
    CreateProcessRequest, Process, ProcessEnd, ProcessLog, ProcessRequest, RequestOutcome,
};
