pub mod entity_ids;
pub mod id;
pub mod paths;
pub mod subjects;

pub use entity_ids::*;
pub use id::{Id, V4, V7};
