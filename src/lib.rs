//! CS2 GW - protocol bridge and state synchronization for a Märklin CS2
//!
//! Intents from a web control surface become CAN-over-UDP frames for the
//! command station; the station's status frames are decoded back into a
//! shared [`StateStore`](state::StateStore) and fanned out to any number of
//! subscribers through the [`EventBus`](bus::EventBus).
//!
//! ```text
//! intent   -> CommandDispatcher -> StateStore -> EventBus -> subscribers
//! datagram -> InboundListener   -> StateStore -> EventBus -> subscribers
//! ```

pub mod bus;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod protocol;
pub mod shutdown;
pub mod sniffer;
pub mod state;

pub use bus::{EventBus, Subscription};
pub use config::GatewayConfig;
pub use dispatch::{Ack, CommandDispatcher, Intent};
pub use error::{CatalogError, DispatchError, FrameError};
pub use gateway::{Gateway, Health};
pub use state::{Event, StateStore};
