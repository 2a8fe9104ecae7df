//! State management module - runtime state of the layout
//!
//! The [`StateStore`] is the single source of truth for system run mode,
//! loco speed/direction/functions and switch positions. Both the command path
//! and the inbound listener write through it, and every write is published on
//! the [`EventBus`](crate::bus::EventBus).

mod store;
mod types;

pub use store::{CatalogMerge, StateStore};
pub use types::{
    Event, LocoState, StateSnapshot, SystemState, MAX_FUNCTION, MAX_SPEED, SWITCH_COUNT,
};
