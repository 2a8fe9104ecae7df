//! CommandDispatcher - turns caller intents into state writes and device frames
//!
//! An intent is a loosely typed JSON record. It is normalized into an
//! [`Action`] first, so every input error is reported before anything is
//! touched. The action is then applied to the [`StateStore`], encoded and
//! handed to the [`FrameSink`]. State is updated before the send and is not
//! rolled back if the send fails.

pub mod coerce;
pub mod transport;

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub use coerce::{coerce_bool, coerce_direction, coerce_int};
pub use transport::{FrameSink, UdpSender};

use crate::error::DispatchError;
use crate::protocol::{Direction, Frame, Request};
use crate::state::{StateStore, SystemState, MAX_FUNCTION, MAX_SPEED};

/// Caller request, as received from the outer layer
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Track power: `{"state": <bool-like>}`
    System(Value),
    /// Loco control: `{"loco_id", "speed" | "direction" | "function"/"fn" + "value"/"val"/"on"}`
    Control(Value),
    /// Switch: `{"idx", "value"}`
    Switch(Value),
}

/// Normalized, validated command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    System { running: bool },
    Speed { loc_id: u32, speed: u16 },
    Direction { loc_id: u32, direction: Direction },
    Function { loc_id: u32, index: u8, active: bool },
    Switch { idx: u32, value: i64 },
}

/// Successful dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Frame that was sent
    pub frame: Frame,
}

fn invalid(field: &'static str, value: &Value) -> DispatchError {
    DispatchError::InvalidField {
        field,
        value: value.to_string(),
    }
}

/// First non-null value among `keys`
fn first<'a>(fields: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| fields.get(*k))
        .filter(|v| !v.is_null())
}

fn required<'a>(fields: &'a Value, key: &'static str) -> Result<&'a Value, DispatchError> {
    fields
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or(DispatchError::MissingField(key))
}

fn required_u32(fields: &Value, key: &'static str) -> Result<u32, DispatchError> {
    let raw = required(fields, key)?;
    coerce_int(raw)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| invalid(key, raw))
}

/// Validate and normalize an intent
pub fn normalize(intent: &Intent) -> Result<Action, DispatchError> {
    match intent {
        Intent::System(fields) => Ok(Action::System {
            running: fields.get("state").is_some_and(coerce_bool),
        }),

        Intent::Control(fields) => {
            let loc_id = required_u32(fields, "loco_id")?;

            if let Some(raw) = fields.get("speed") {
                let speed = coerce_int(raw).ok_or_else(|| invalid("speed", raw))?;
                let speed = speed.clamp(0, MAX_SPEED as i64) as u16;
                return Ok(Action::Speed { loc_id, speed });
            }

            if let Some(raw) = fields.get("direction") {
                return Ok(Action::Direction {
                    loc_id,
                    direction: coerce_direction(raw),
                });
            }

            if let Some(raw) = first(fields, &["function", "fn"]) {
                let index = coerce_int(raw)
                    .and_then(|i| u8::try_from(i).ok())
                    .filter(|i| *i <= MAX_FUNCTION)
                    .ok_or_else(|| invalid("function", raw))?;
                let active = first(fields, &["value", "val", "on"]).is_some_and(coerce_bool);
                return Ok(Action::Function {
                    loc_id,
                    index,
                    active,
                });
            }

            Err(DispatchError::NoControlField)
        }

        Intent::Switch(fields) => {
            let idx = required_u32(fields, "idx")?;
            let raw = required(fields, "value")?;
            let value = coerce_int(raw).ok_or_else(|| invalid("value", raw))?;
            Ok(Action::Switch { idx, value })
        }
    }
}

/// Applies intents to the store and sends the matching frame
pub struct CommandDispatcher {
    store: Arc<StateStore>,
    sink: Arc<dyn FrameSink>,
    device_uid: u32,
}

impl CommandDispatcher {
    pub fn new(store: Arc<StateStore>, sink: Arc<dyn FrameSink>, device_uid: u32) -> Self {
        Self {
            store,
            sink,
            device_uid,
        }
    }

    /// Normalize, apply and send an intent
    pub fn dispatch(&self, intent: &Intent) -> Result<Ack, DispatchError> {
        let action = normalize(intent).inspect_err(|e| debug!("Rejected intent: {}", e))?;
        self.execute(action)
    }

    /// Apply an already normalized action and send its frame
    pub fn execute(&self, action: Action) -> Result<Ack, DispatchError> {
        let request = match action {
            Action::System { running } => {
                let state = if running {
                    SystemState::Running
                } else {
                    SystemState::Stopped
                };
                self.store.set_system_state(state);
                Request::System {
                    device_uid: self.device_uid,
                    running,
                }
            }
            Action::Speed { loc_id, speed } => Request::Speed {
                loc_id,
                speed: self.store.set_loco_speed(loc_id, speed),
            },
            Action::Direction { loc_id, direction } => {
                self.store.set_loco_direction(loc_id, direction);
                Request::Direction { loc_id, direction }
            }
            Action::Function {
                loc_id,
                index,
                active,
            } => {
                self.store.set_loco_function(loc_id, index, active);
                Request::Function {
                    loc_id,
                    index,
                    active,
                }
            }
            Action::Switch { idx, value } => {
                self.store.set_switch(idx as i64, value);
                let article_uid = self
                    .store
                    .switch_article_uid(idx as usize)
                    .unwrap_or(idx);
                Request::Switch {
                    article_uid,
                    value: (value & 0xFF) as u8,
                }
            }
        };

        let frame = Frame::request(self.device_uid, &request);
        debug!(command = %request.command(), "Dispatch {:?}", request);
        self.sink.send_frame(&frame.encode()).map_err(|e| {
            warn!("Failed to send {} frame: {}", request.command(), e);
            DispatchError::from(e)
        })?;
        Ok(Ack { frame })
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }
}
