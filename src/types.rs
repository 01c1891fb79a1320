use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instance::InstanceState;

pub type InstanceId = Uuid;
pub type ObjectId = Uuid;

/// Parameters for creating a script instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceParams {
    pub id: Option<InstanceId>,
    pub object_id: ObjectId,
    /// Root object of the link set the instance belongs to
    pub root_id: Option<ObjectId>,
    pub item_name: String,
    /// Start with event processing disabled
    #[serde(default)]
    pub start_disabled: bool,
}

impl CreateInstanceParams {
    pub fn new(object_id: ObjectId, item_name: impl Into<String>) -> Self {
        Self {
            id: None,
            object_id,
            root_id: None,
            item_name: item_name.into(),
            start_disabled: false,
        }
    }
}

/// Administrative view of one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: InstanceId,
    pub object_id: ObjectId,
    pub item_name: String,
    pub asset_id: String,
    pub state: InstanceState,
    pub script_state: String,
    pub running: bool,
    pub queued_events: usize,
    pub lost_events: u64,
    pub heap_used: usize,
    pub heap_limit: usize,
    pub created_at: DateTime<Utc>,
}
