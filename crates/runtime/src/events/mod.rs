//! Topic-based event bus for runtime events.
//!
//! The clock and the program runner publish here; consumers subscribe only to
//! the topics they need.

mod bus;
mod types;

pub use bus::{Event, EventBus, Topic};
pub use types::{ClockEvent, ProgramEvent};
