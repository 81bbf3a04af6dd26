pub mod models;

pub use models::{CreateEvent, Event, EventStatus};
