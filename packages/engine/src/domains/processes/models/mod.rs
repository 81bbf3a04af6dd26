pub mod process;
pub mod process_log;
pub mod process_request;

pub use process::{Process, ProcessEnd};
pub use process_log::ProcessLog;
pub use process_request::{CreateProcessRequest, ProcessRequest, RequestOutcome};
