//! Domain notices and the pub/sub mechanics used to fan them out.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
