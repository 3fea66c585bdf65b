use crate::error::{JobError, Result};
use crate::models::job::{JobKind, JobRequest};
use crate::models::target::{AffectedTargets, ProposedItem, TargetInfo};
use crate::services::client::JobService;
use log::{debug, warn};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionSummary {
    pub target_count: usize,
    pub item_count: usize,
    /// Sum of each selected target's affected-item count.
    pub total_units: u32,
}

/// Item exclusions and target selection for one remediation batch.
///
/// A flow opened against a single-server universe never consults the
/// affected-target list; its only target is the origin.
pub struct SelectionAggregator {
    origin: String,
    multi_target: bool,
    proposed: Vec<ProposedItem>,
    excluded: HashSet<String>,
    selected: Vec<String>,
    affected: Option<Vec<TargetInfo>>,
    affected_for: Vec<String>,
    filter: String,
}

impl SelectionAggregator {
    pub fn new(origin: &str, universe_size: usize, proposed: Vec<ProposedItem>) -> Self {
        Self {
            origin: origin.to_string(),
            multi_target: universe_size > 1,
            proposed,
            excluded: HashSet::new(),
            selected: vec![origin.to_string()],
            affected: None,
            affected_for: Vec::new(),
            filter: String::new(),
        }
    }

    pub fn is_multi_target(&self) -> bool {
        self.multi_target
    }

    pub fn proposed(&self) -> &[ProposedItem] {
        &self.proposed
    }

    pub fn active_items(&self) -> Vec<&ProposedItem> {
        self.proposed
            .iter()
            .filter(|item| !self.excluded.contains(&item.item_code))
            .collect()
    }

    pub fn active_codes(&self) -> Vec<String> {
        self.active_items()
            .into_iter()
            .map(|item| item.item_code.clone())
            .collect()
    }

    /// Returns whether the active set changed.
    pub fn exclude(&mut self, item_code: &str) -> bool {
        let known = self.proposed.iter().any(|item| item.item_code == item_code);
        known && self.excluded.insert(item_code.to_string())
    }

    pub fn affected_targets(&self) -> Option<&[TargetInfo]> {
        self.affected.as_deref()
    }

    /// The affected list is derived from the active items and goes stale
    /// whenever an item is excluded.
    pub fn needs_refresh(&self) -> bool {
        self.multi_target && !self.active_items().is_empty() && (self.affected.is_none() || self.affected_for != self.active_codes())
    }

    pub fn apply_affected(&mut self, affected: AffectedTargets) {
        debug!(
            "Affected targets for {} item(s): {} target(s), {} fixable",
            affected.item_codes.len(),
            affected.targets.len(),
            affected.total_fixable
        );

        if affected.targets.iter().any(|t| t.target_id == self.origin) {
            self.selected = vec![self.origin.clone()];
        }
        self.affected = Some(affected.targets);
        self.affected_for = self.active_codes();
    }

    pub async fn refresh_targets<S: JobService>(&mut self, service: &S) -> Result<()> {
        let codes = self.active_codes();
        if codes.is_empty() {
            return Ok(());
        }

        match service.affected_targets(&codes).await {
            Ok(affected) => {
                self.apply_affected(affected);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load affected targets: {}", e);
                self.affected = Some(Vec::new());
                self.affected_for = codes;
                Err(e)
            }
        }
    }

    pub fn set_filter(&mut self, query: &str) {
        self.filter = query.to_string();
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn filtered_targets(&self) -> Vec<&TargetInfo> {
        match &self.affected {
            Some(targets) => targets.iter().filter(|t| t.matches(&self.filter)).collect(),
            None => Vec::new(),
        }
    }

    pub fn is_selected(&self, target_id: &str) -> bool {
        self.selected.iter().any(|id| id == target_id)
    }

    pub fn toggle_target(&mut self, target_id: &str) {
        if let Some(pos) = self.selected.iter().position(|id| id == target_id) {
            self.selected.remove(pos);
        } else {
            self.selected.push(target_id.to_string());
        }
    }

    pub fn all_filtered_selected(&self) -> bool {
        let filtered = self.filtered_targets();
        !filtered.is_empty() && filtered.iter().all(|t| self.is_selected(&t.target_id))
    }

    /// Selects every target in the current filter; selections outside the
    /// filter are kept.
    pub fn select_all(&mut self) {
        let ids: Vec<String> = self
            .filtered_targets()
            .into_iter()
            .map(|t| t.target_id.clone())
            .collect();
        for id in ids {
            if !self.is_selected(&id) {
                self.selected.push(id);
            }
        }
    }

    /// Deselects every target in the current filter only.
    pub fn deselect_all(&mut self) {
        let ids: HashSet<String> = self
            .filtered_targets()
            .into_iter()
            .map(|t| t.target_id.clone())
            .collect();
        self.selected.retain(|id| !ids.contains(id));
    }

    pub fn toggle_select_all(&mut self) {
        if self.all_filtered_selected() {
            self.deselect_all();
        } else {
            self.select_all();
        }
    }

    fn selected_affected(&self) -> Vec<&TargetInfo> {
        let Some(affected) = &self.affected else {
            return Vec::new();
        };
        self.selected
            .iter()
            .filter_map(|id| affected.iter().find(|t| &t.target_id == id))
            .collect()
    }

    pub fn submitted_targets(&self) -> Vec<String> {
        if !self.multi_target {
            return vec![self.origin.clone()];
        }
        self.selected_affected()
            .into_iter()
            .map(|t| t.target_id.clone())
            .collect()
    }

    pub fn summary(&self) -> SelectionSummary {
        let item_count = self.active_items().len();
        if !self.multi_target {
            return SelectionSummary {
                target_count: 1,
                item_count,
                total_units: item_count as u32,
            };
        }

        let selected = self.selected_affected();
        SelectionSummary {
            target_count: selected.len(),
            item_count,
            total_units: selected.iter().map(|t| t.vulnerable_count).sum(),
        }
    }

    pub fn can_submit(&self) -> bool {
        !self.active_items().is_empty() && !self.submitted_targets().is_empty()
    }

    pub fn request(&self) -> Result<JobRequest> {
        let items = self.active_codes();
        if items.is_empty() {
            return Err(JobError::Validation("no items left to remediate".to_string()));
        }
        let targets = self.submitted_targets();
        if targets.is_empty() {
            return Err(JobError::Validation("select at least one target".to_string()));
        }
        JobRequest::new(JobKind::Remediation, targets, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::SubmitBody;
    use crate::models::target::DeviceClass;

    fn items() -> Vec<ProposedItem> {
        vec![
            ProposedItem::new("U-01", "Restrict remote root login", "account", DeviceClass::Os),
            ProposedItem::new("U-02", "Password complexity", "account", DeviceClass::Os),
            ProposedItem::new("U-05", "PATH hygiene", "directory", DeviceClass::Os),
        ]
    }

    fn target(id: &str, host: &str, count: u32) -> TargetInfo {
        TargetInfo {
            target_id: id.to_string(),
            hostname: host.to_string(),
            address: "10.0.0.1".to_string(),
            os_type: "Rocky".to_string(),
            vulnerable_items: vec!["U-01".to_string(); count as usize],
            vulnerable_count: count,
        }
    }

    fn affected() -> AffectedTargets {
        AffectedTargets {
            item_codes: vec!["U-01".to_string()],
            targets: vec![
                target("srv-01", "web-a", 3),
                target("srv-02", "web-b", 1),
                target("srv-03", "db-a", 2),
                target("srv-04", "db-b", 5),
            ],
            total_targets: 4,
            total_fixable: 11,
        }
    }

    fn multi() -> SelectionAggregator {
        let mut s = SelectionAggregator::new("srv-01", 4, items());
        s.apply_affected(affected());
        s
    }

    #[test]
    fn exclude_is_idempotent() {
        let mut s = SelectionAggregator::new("srv-01", 1, items());
        assert!(s.exclude("U-02"));
        let once = s.active_codes();
        assert!(!s.exclude("U-02"));
        assert_eq!(s.active_codes(), once);
        assert_eq!(once, vec!["U-01", "U-05"]);
    }

    #[test]
    fn excluding_unknown_code_changes_nothing() {
        let mut s = SelectionAggregator::new("srv-01", 1, items());
        assert!(!s.exclude("D-99"));
        assert_eq!(s.active_items().len(), 3);
    }

    #[test]
    fn single_universe_summary_counts_items() {
        let mut s = SelectionAggregator::new("srv-01", 1, items());
        s.exclude("U-05");
        assert_eq!(
            s.summary(),
            SelectionSummary { target_count: 1, item_count: 2, total_units: 2 }
        );
        assert!(!s.needs_refresh());
        assert_eq!(s.submitted_targets(), vec!["srv-01"]);
    }

    #[test]
    fn origin_stays_selected_after_affected_load() {
        let s = multi();
        assert!(s.is_selected("srv-01"));
        assert_eq!(s.summary().total_units, 3);
    }

    #[test]
    fn total_units_sums_vulnerable_counts() {
        let mut s = multi();
        s.toggle_target("srv-03");
        s.toggle_target("srv-04");
        assert_eq!(
            s.summary(),
            SelectionSummary { target_count: 3, item_count: 3, total_units: 10 }
        );
    }

    #[test]
    fn total_units_is_additive_over_disjoint_selections() {
        let units = |ids: &[&str]| {
            let mut s = multi();
            s.toggle_target("srv-01");
            for id in ids {
                s.toggle_target(id);
            }
            s.summary().total_units
        };
        let s1 = ["srv-01", "srv-03"];
        let s2 = ["srv-02", "srv-04"];
        let union = ["srv-01", "srv-03", "srv-02", "srv-04"];
        assert_eq!(units(&union), units(&s1) + units(&s2));
        assert_eq!(units(&[]), 0);
    }

    #[test]
    fn toggle_is_symmetric() {
        let mut s = multi();
        s.toggle_target("srv-02");
        assert!(s.is_selected("srv-02"));
        s.toggle_target("srv-02");
        assert!(!s.is_selected("srv-02"));
    }

    #[test]
    fn select_all_only_touches_filtered_subset() {
        let mut s = multi();
        s.set_filter("db");
        assert!(!s.all_filtered_selected());
        s.toggle_select_all();
        assert!(s.is_selected("srv-03") && s.is_selected("srv-04"));
        assert!(!s.is_selected("srv-02"));
        assert!(s.is_selected("srv-01"));

        s.toggle_select_all();
        assert!(!s.is_selected("srv-03") && !s.is_selected("srv-04"));
        assert!(s.is_selected("srv-01"));
    }

    #[test]
    fn selection_made_before_filtering_survives_repeat_select_all() {
        let mut s = multi();
        s.toggle_target("srv-02");

        s.set_filter("db");
        s.select_all();
        s.set_filter("");
        s.set_filter("db");
        s.select_all();
        s.set_filter("");

        for id in ["srv-01", "srv-02", "srv-03", "srv-04"] {
            assert!(s.is_selected(id), "{} dropped", id);
        }
        assert!(s.all_filtered_selected());
    }

    #[test]
    fn empty_filter_result_is_never_all_selected() {
        let mut s = multi();
        s.set_filter("no-such-host");
        assert!(s.filtered_targets().is_empty());
        assert!(!s.all_filtered_selected());
    }

    #[test]
    fn submission_intersects_selection_with_affected() {
        let mut s = multi();
        s.toggle_target("srv-99");
        s.toggle_target("srv-02");
        assert_eq!(s.submitted_targets(), vec!["srv-01", "srv-02"]);
    }

    #[test]
    fn one_implicated_target_uses_single_shape() {
        let s = multi();
        let body = s.request().unwrap().body();
        assert!(matches!(body, SubmitBody::SingleTarget { ref target_id, .. } if target_id == "srv-01"));
    }

    #[test]
    fn several_targets_use_batch_shape() {
        let mut s = multi();
        s.toggle_target("srv-02");
        assert!(matches!(s.request().unwrap().body(), SubmitBody::MultiTarget { .. }));
    }

    #[test]
    fn empty_sets_block_submission() {
        let mut s = multi();
        s.toggle_target("srv-01");
        assert!(!s.can_submit());
        assert!(matches!(s.request(), Err(JobError::Validation(_))));

        let mut s = SelectionAggregator::new("srv-01", 1, items());
        for code in ["U-01", "U-02", "U-05"] {
            s.exclude(code);
        }
        assert!(!s.can_submit());
        assert!(matches!(s.request(), Err(JobError::Validation(_))));
    }

    #[test]
    fn exclusion_marks_affected_list_stale() {
        let mut s = multi();
        assert!(!s.needs_refresh());
        s.exclude("U-05");
        assert!(s.needs_refresh());
    }

    #[test]
    fn unloaded_multi_selection_submits_nothing() {
        let s = SelectionAggregator::new("srv-01", 3, items());
        assert!(s.needs_refresh());
        assert_eq!(s.summary(), SelectionSummary { target_count: 0, item_count: 3, total_units: 0 });
        assert!(s.submitted_targets().is_empty());
    }
}
