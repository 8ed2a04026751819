use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the persisted block list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedApp {
    pub id: Option<i64>,
    pub package_id: String,
    pub app_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Immutable snapshot entry consumed by the enforcement engine. The list is
/// fixed for the life of one session; edits to the store apply from the next
/// session onward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRule {
    pub package_id: String,
    pub app_name: String,
    pub active: bool,
}

impl From<&BlockedApp> for BlockRule {
    fn from(app: &BlockedApp) -> Self {
        Self {
            package_id: app.package_id.clone(),
            app_name: app.app_name.clone(),
            active: app.is_active,
        }
    }
}
