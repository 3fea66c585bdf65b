use crate::error::{JobError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanScope {
    #[serde(rename = "scan-all")]
    All,
    #[serde(rename = "scan")]
    Os,
    #[serde(rename = "scan-db")]
    Db,
}

impl ScanScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanScope::All => "scan-all",
            ScanScope::Os => "scan",
            ScanScope::Db => "scan-db",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Scan(ScanScope),
    Remediation,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Scan(scope) => write!(f, "scan ({})", scope.as_str()),
            JobKind::Remediation => write!(f, "remediation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Validated submission: what the caller wants run, before the backend
/// assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub targets: Vec<String>,
    pub items: Vec<String>,
}

impl JobRequest {
    pub fn new(kind: JobKind, targets: Vec<String>, items: Vec<String>) -> Result<Self> {
        let targets = dedup_ordered(targets);
        let items = dedup_ordered(items);

        if targets.is_empty() {
            return Err(JobError::Validation("no targets selected".to_string()));
        }
        if items.is_empty() && kind != JobKind::Scan(ScanScope::All) {
            return Err(JobError::Validation(format!("no items selected for {}", kind)));
        }

        Ok(Self { kind, targets, items })
    }

    pub fn is_single_target(&self) -> bool {
        self.targets.len() == 1
    }

    /// Request body for the submit endpoint. Remediation against exactly one
    /// target uses the single-target shape; the backend routes the two
    /// shapes differently.
    pub fn body(&self) -> SubmitBody {
        match self.kind {
            JobKind::Scan(scope) => SubmitBody::Scan {
                target_ids: self.targets.clone(),
                scan_type: scope,
                item_codes: self.items.clone(),
            },
            JobKind::Remediation if self.is_single_target() => SubmitBody::SingleTarget {
                target_id: self.targets[0].clone(),
                item_codes: self.items.clone(),
            },
            JobKind::Remediation => SubmitBody::MultiTarget {
                target_ids: self.targets.clone(),
                item_codes: self.items.clone(),
            },
        }
    }
}

fn dedup_ordered(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubmitBody {
    SingleTarget {
        #[serde(rename = "server_id")]
        target_id: String,
        item_codes: Vec<String>,
    },
    MultiTarget {
        #[serde(rename = "server_ids")]
        target_ids: Vec<String>,
        item_codes: Vec<String>,
    },
    Scan {
        #[serde(rename = "server_ids")]
        target_ids: Vec<String>,
        scan_type: ScanScope,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        item_codes: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    #[serde(default, alias = "total_servers")]
    pub total_targets: u32,
    #[serde(default)]
    pub total_items: Option<u32>,
    pub status: JobStatus,
    #[serde(default)]
    pub message: String,
}

/// A job as accepted by the backend. Never mutated; a resubmission
/// produces a new `Job`.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub targets: Vec<String>,
    pub items: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn accepted(request: JobRequest, handle: &JobHandle) -> Self {
        Self {
            id: handle.job_id.clone(),
            kind: request.kind,
            targets: request.targets,
            items: request.items,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, alias = "percent")]
    pub progress: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "total_servers")]
    pub total_targets: u32,
    #[serde(default, alias = "current_server")]
    pub current_target: Option<String>,
    #[serde(default, alias = "completed_servers")]
    pub completed_targets: Option<u32>,
    #[serde(default)]
    pub current_step: Option<u8>,
    #[serde(default)]
    pub total_items: Option<u32>,
}

impl JobProgress {
    pub fn percent(&self) -> u8 {
        self.progress.clamp(0, 100) as u8
    }

    /// Step indicator (1..=4). Scans report it; remediation derives it
    /// from percent.
    pub fn step(&self) -> u8 {
        match self.current_step {
            Some(step) => step.clamp(1, 4),
            None => (u32::from(self.percent()).div_ceil(25) as u8).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codes(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_targets_rejected() {
        let err = JobRequest::new(JobKind::Remediation, vec![], codes(&["U-01"])).unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
    }

    #[test]
    fn empty_items_only_allowed_for_scan_all() {
        assert!(JobRequest::new(JobKind::Scan(ScanScope::All), codes(&["srv-01"]), vec![]).is_ok());
        assert!(JobRequest::new(JobKind::Scan(ScanScope::Db), codes(&["srv-01"]), vec![]).is_err());
        assert!(JobRequest::new(JobKind::Remediation, codes(&["srv-01"]), vec![]).is_err());
    }

    #[test]
    fn single_target_remediation_uses_single_shape() {
        let req = JobRequest::new(JobKind::Remediation, codes(&["srv-01"]), codes(&["U-01", "U-02"])).unwrap();
        assert_eq!(
            serde_json::to_value(req.body()).unwrap(),
            json!({"server_id": "srv-01", "item_codes": ["U-01", "U-02"]})
        );
    }

    #[test]
    fn multi_target_remediation_uses_batch_shape() {
        let req = JobRequest::new(
            JobKind::Remediation,
            codes(&["srv-01", "srv-02", "srv-01"]),
            codes(&["U-01"]),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(req.body()).unwrap(),
            json!({"server_ids": ["srv-01", "srv-02"], "item_codes": ["U-01"]})
        );
    }

    #[test]
    fn scan_body_omits_empty_item_filter() {
        let req = JobRequest::new(JobKind::Scan(ScanScope::All), codes(&["srv-01"]), vec![]).unwrap();
        assert_eq!(
            serde_json::to_value(req.body()).unwrap(),
            json!({"server_ids": ["srv-01"], "scan_type": "scan-all"})
        );
    }

    #[test]
    fn progress_accepts_backend_field_names() {
        let p: JobProgress = serde_json::from_value(json!({
            "job_id": "j1",
            "status": "running",
            "progress": 140,
            "message": "working",
            "total_servers": 3,
            "current_server": "srv-02",
            "completed_servers": 1
        }))
        .unwrap();
        assert_eq!(p.total_targets, 3);
        assert_eq!(p.current_target.as_deref(), Some("srv-02"));
        assert_eq!(p.completed_targets, Some(1));
        assert_eq!(p.percent(), 100);
        assert_eq!(p.step(), 4);
    }

    #[test]
    fn remediation_step_derives_from_percent() {
        let mut p: JobProgress = serde_json::from_value(json!({
            "job_id": "j1", "status": "queued", "progress": 0, "message": ""
        }))
        .unwrap();
        assert_eq!(p.step(), 1);
        p.progress = 26;
        assert_eq!(p.step(), 2);
    }
}
