use serde::{Deserialize, Serialize};

/// Target as seen through the currently active item set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    #[serde(alias = "server_id")]
    pub target_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, alias = "ip_address")]
    pub address: String,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub vulnerable_items: Vec<String>,
    #[serde(default)]
    pub vulnerable_count: u32,
}

impl TargetInfo {
    pub fn matches(&self, query: &str) -> bool {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return true;
        }
        self.target_id.to_lowercase().contains(&q)
            || self.hostname.to_lowercase().contains(&q)
            || self.address.contains(&q)
            || self.os_type.to_lowercase().contains(&q)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedTargets {
    #[serde(default)]
    pub item_codes: Vec<String>,
    #[serde(alias = "servers")]
    pub targets: Vec<TargetInfo>,
    #[serde(default, alias = "total_servers")]
    pub total_targets: u32,
    #[serde(default)]
    pub total_fixable: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Os,
    Db,
}

/// A check item proposed for a batch, tagged with the category it was
/// listed under when the user picked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedItem {
    pub item_code: String,
    pub title: String,
    pub category: String,
    pub class: DeviceClass,
}

impl ProposedItem {
    pub fn new(item_code: &str, title: &str, category: &str, class: DeviceClass) -> Self {
        Self {
            item_code: item_code.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            class,
        }
    }
}
