//! Script events
//!
//! Event names form a closed table. Hosts post by name; the name is parsed into
//! an `EventCode` at post time and unknown names are rejected.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::errors::EngineError;
use crate::vm::Val;

macro_rules! event_codes {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum EventCode {
            $($variant),+
        }

        impl EventCode {
            pub const ALL: &'static [EventCode] = &[$(EventCode::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $(EventCode::$variant => $name),+
                }
            }
        }
    };
}

event_codes! {
    StateEntry => "state_entry",
    StateExit => "state_exit",
    TouchStart => "touch_start",
    Touch => "touch",
    TouchEnd => "touch_end",
    CollisionStart => "collision_start",
    Collision => "collision",
    CollisionEnd => "collision_end",
    LandCollisionStart => "land_collision_start",
    LandCollision => "land_collision",
    LandCollisionEnd => "land_collision_end",
    Timer => "timer",
    Listen => "listen",
    Sensor => "sensor",
    NoSensor => "no_sensor",
    Control => "control",
    AtTarget => "at_target",
    NotAtTarget => "not_at_target",
    AtRotTarget => "at_rot_target",
    NotAtRotTarget => "not_at_rot_target",
    Money => "money",
    Email => "email",
    RunTimePermissions => "run_time_permissions",
    Changed => "changed",
    Attach => "attach",
    Dataserver => "dataserver",
    LinkMessage => "link_message",
    MovingStart => "moving_start",
    MovingEnd => "moving_end",
    ObjectRez => "object_rez",
    RemoteData => "remote_data",
    HttpRequest => "http_request",
    HttpResponse => "http_response",
    OnRez => "on_rez",
    PathUpdate => "path_update",
    TransactionResult => "transaction_result",
}

impl EventCode {
    pub fn index(self) -> usize {
        self as usize
    }

    /// Events that at most one copy of may sit in a queue
    pub fn is_coalesced(self) -> bool {
        matches!(self, EventCode::Timer)
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventCode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCode::ALL
            .iter()
            .copied()
            .find(|code| code.name() == s)
            .ok_or_else(|| EngineError::UnknownEvent(s.to_string()))
    }
}

/// Engine startup self-check of the event table. A failure here is fatal.
pub fn validate_event_table() -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for (i, code) in EventCode::ALL.iter().enumerate() {
        if code.index() != i {
            return Err(EngineError::EventTable(format!(
                "{} has index {} but sits at position {}",
                code,
                code.index(),
                i
            )));
        }
        if !seen.insert(code.name()) {
            return Err(EngineError::EventTable(format!(
                "duplicate event name {}",
                code
            )));
        }
        if code.name().parse::<EventCode>().ok() != Some(*code) {
            return Err(EngineError::EventTable(format!(
                "event name {} does not parse back",
                code
            )));
        }
    }
    for required in [EventCode::StateEntry, EventCode::StateExit, EventCode::Attach] {
        if !seen.contains(required.name()) {
            return Err(EngineError::EventTable(format!(
                "missing reserved event {}",
                required
            )));
        }
    }
    Ok(())
}

/// Detection context attached to touch/collision/sensor style events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    pub key: String,
    pub name: String,
    pub owner: String,
    pub link_num: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventParams {
    pub event: EventCode,
    #[serde(default)]
    pub args: Vec<Val>,
    #[serde(default)]
    pub detect: Vec<DetectParams>,
}

impl EventParams {
    pub fn new(event: EventCode, args: Vec<Val>) -> Self {
        Self {
            event,
            args,
            detect: Vec::new(),
        }
    }

    pub fn named(name: &str, args: Vec<Val>) -> Result<Self, EngineError> {
        Ok(Self::new(name.parse()?, args))
    }

    pub fn with_detect(mut self, detect: Vec<DetectParams>) -> Self {
        self.detect = detect;
        self
    }
}

/// Per-instance FIFO of pending events with per-event caps
#[derive(Debug, Clone)]
pub struct EventQueue {
    events: VecDeque<EventParams>,
    counts: Vec<usize>,
    max_per_event: usize,
    lost: u64,
}

impl EventQueue {
    pub fn new(max_per_event: usize) -> Self {
        Self {
            events: VecDeque::new(),
            counts: vec![0; EventCode::ALL.len()],
            max_per_event,
            lost: 0,
        }
    }

    /// Append an event. Returns false if the per-event cap dropped it.
    pub fn push(&mut self, evt: EventParams) -> bool {
        let idx = evt.event.index();
        let cap = if evt.event.is_coalesced() {
            1
        } else {
            self.max_per_event
        };
        if self.counts[idx] >= cap {
            self.lost += 1;
            return false;
        }
        self.counts[idx] += 1;
        self.events.push_back(evt);
        true
    }

    /// Put an engine-generated event at the head, bypassing the caps
    pub fn push_front(&mut self, evt: EventParams) {
        self.counts[evt.event.index()] += 1;
        self.events.push_front(evt);
    }

    pub fn pop(&mut self) -> Option<EventParams> {
        let evt = self.events.pop_front()?;
        let idx = evt.event.index();
        self.counts[idx] = self.counts[idx].saturating_sub(1);
        Some(evt)
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventParams> {
        self.events.iter()
    }
}
