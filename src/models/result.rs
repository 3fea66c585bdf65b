use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_code: String,
    #[serde(default)]
    pub title: String,
    pub is_success: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default, alias = "raw_evidence")]
    pub evidence: String,
    #[serde(default, alias = "action_date")]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResult {
    #[serde(alias = "server_id")]
    pub target_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub total_items: u32,
    pub success_count: u32,
    pub fail_count: u32,
    #[serde(default)]
    pub items: Vec<ItemOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Improvement {
    pub before_vuln: u32,
    pub after_vuln: u32,
    pub improved: u32,
}

/// Remediation result. Either `items` (single target) or `targets`
/// (one block per target) is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    #[serde(default)]
    pub total_items: u32,
    pub success_count: u32,
    pub fail_count: u32,
    #[serde(default)]
    pub items: Vec<ItemOutcome>,
    #[serde(default, alias = "servers")]
    pub targets: Vec<TargetResult>,
    #[serde(default)]
    pub improvement: Option<Improvement>,
}

impl JobResult {
    /// Success/fail totals summed over per-target blocks, if any.
    pub fn per_target_totals(&self) -> Option<(u32, u32)> {
        if self.targets.is_empty() {
            return None;
        }
        Some(self.targets.iter().fold((0, 0), |(ok, fail), t| {
            (ok + t.success_count, fail + t.fail_count)
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopVulnerableTarget {
    #[serde(alias = "server_id")]
    pub target_id: String,
    #[serde(default)]
    pub hostname: String,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RiskDistribution {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub job_id: String,
    #[serde(default)]
    pub company: String,
    #[serde(alias = "total_servers")]
    pub total_targets: u32,
    #[serde(default)]
    pub scan_duration: String,
    pub vulnerable_count: u32,
    pub secure_count: u32,
    pub risk_percentage: u32,
    #[serde(default, alias = "top_vulnerable_server")]
    pub top_vulnerable_target: Option<TopVulnerableTarget>,
    #[serde(default)]
    pub risk_distribution: RiskDistribution,
    #[serde(default)]
    pub scan_completed_at: String,
}

/// Result fetched for a completed job, tagged by job kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    Remediation(JobResult),
    Scan(ScanReport),
}
