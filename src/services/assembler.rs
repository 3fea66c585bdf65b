use crate::models::result::{Improvement, ItemOutcome, JobResult, RiskDistribution, ScanReport, TargetResult};
use crate::models::target::{DeviceClass, ProposedItem};
use crate::services::phases::ScanPage;
use crate::utils::evidence::reason_line;
use log::warn;

const OS_CATEGORIES: &[(&str, &str)] = &[
    ("account", "Account management"),
    ("directory", "File and directory management"),
    ("service", "Service management"),
    ("patch", "Patch management"),
    ("log", "Log management"),
];

const DB_CATEGORIES: &[(&str, &str)] = &[
    ("account", "Account management"),
    ("access", "Access management"),
    ("option", "Option management"),
    ("patch", "Patch management"),
];

pub fn category_order(class: DeviceClass) -> &'static [(&'static str, &'static str)] {
    match class {
        DeviceClass::Os => OS_CATEGORIES,
        DeviceClass::Db => DB_CATEGORIES,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemView {
    pub item_code: String,
    pub title: String,
    pub is_success: bool,
    pub failure_reason: Option<String>,
    /// First line of the evidence detail.
    pub reason: String,
}

impl From<&ItemOutcome> for ItemView {
    fn from(item: &ItemOutcome) -> Self {
        Self {
            item_code: item.item_code.clone(),
            title: item.title.clone(),
            is_success: item.is_success,
            failure_reason: item.failure_reason.clone(),
            reason: reason_line(&item.evidence),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetView {
    pub target_id: String,
    pub hostname: String,
    pub items: Vec<ItemView>,
    pub success_count: u32,
    pub fail_count: u32,
}

impl From<&TargetResult> for TargetView {
    fn from(block: &TargetResult) -> Self {
        Self {
            target_id: block.target_id.clone(),
            hostname: block.hostname.clone(),
            items: block.items.iter().map(ItemView::from).collect(),
            success_count: block.success_count,
            fail_count: block.fail_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleTargetResult {
    pub success_count: u32,
    pub fail_count: u32,
    pub items: Vec<ItemView>,
    pub improvement: Option<Improvement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiTargetResult {
    pub success_count: u32,
    pub fail_count: u32,
    pub targets: Vec<TargetView>,
    pub improvement: Option<Improvement>,
}

/// Display-ready remediation result. The single/multi decision is made
/// once here; downstream code matches on the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum AssembledResult {
    Single(SingleTargetResult),
    Multi(MultiTargetResult),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedView {
    pub success_count: u32,
    pub fail_count: u32,
    pub per_target: Option<Vec<TargetView>>,
}

impl AssembledResult {
    pub fn success_count(&self) -> u32 {
        match self {
            AssembledResult::Single(r) => r.success_count,
            AssembledResult::Multi(r) => r.success_count,
        }
    }

    pub fn fail_count(&self) -> u32 {
        match self {
            AssembledResult::Single(r) => r.fail_count,
            AssembledResult::Multi(r) => r.fail_count,
        }
    }

    pub fn is_multi_target(&self) -> bool {
        matches!(self, AssembledResult::Multi(_))
    }

    pub fn view(&self) -> NormalizedView {
        NormalizedView {
            success_count: self.success_count(),
            fail_count: self.fail_count(),
            per_target: match self {
                AssembledResult::Single(_) => None,
                AssembledResult::Multi(r) => Some(r.targets.clone()),
            },
        }
    }
}

/// Multi-target display is used only for more than one per-target block;
/// a lone block renders flat. Counts are unaffected by that choice.
pub fn assemble(result: &JobResult) -> AssembledResult {
    let (success_count, fail_count) = match result.per_target_totals() {
        Some(totals) => {
            if totals != (result.success_count, result.fail_count) {
                warn!(
                    "Job {} aggregate counts {}/{} disagree with per-target sums {}/{}; using per-target sums",
                    result.job_id, result.success_count, result.fail_count, totals.0, totals.1
                );
            }
            totals
        }
        None => (result.success_count, result.fail_count),
    };

    if result.targets.len() > 1 {
        return AssembledResult::Multi(MultiTargetResult {
            success_count,
            fail_count,
            targets: result.targets.iter().map(TargetView::from).collect(),
            improvement: result.improvement,
        });
    }

    let outcomes = match (result.items.is_empty(), result.targets.first()) {
        (true, Some(block)) => &block.items,
        _ => &result.items,
    };

    AssembledResult::Single(SingleTargetResult {
        success_count,
        fail_count,
        items: outcomes.iter().map(ItemView::from).collect(),
        improvement: result.improvement,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryGroup {
    pub category: String,
    pub label: &'static str,
    pub items: Vec<ItemView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassSection {
    pub class: DeviceClass,
    pub groups: Vec<CategoryGroup>,
}

/// Groups single-target items by the category tag each carried when it was
/// proposed, in the fixed order of its device class.
///
/// Items whose tag is missing or whose category is not in that order are
/// left out of the grouping (logged, not bucketed).
pub fn group_by_category(items: &[ItemView], tags: &[ProposedItem]) -> Vec<ClassSection> {
    let tag_of = |code: &str| tags.iter().find(|t| t.item_code == code);

    let dropped: Vec<&str> = items
        .iter()
        .filter(|item| match tag_of(&item.item_code) {
            Some(tag) => !category_order(tag.class).iter().any(|(c, _)| *c == tag.category),
            None => true,
        })
        .map(|item| item.item_code.as_str())
        .collect();
    if !dropped.is_empty() {
        warn!("Items without a known category left out of grouping: {}", dropped.join(", "));
    }

    [DeviceClass::Os, DeviceClass::Db]
        .into_iter()
        .filter_map(|class| {
            let groups: Vec<CategoryGroup> = category_order(class)
                .iter()
                .filter_map(|(category, label)| {
                    let members: Vec<ItemView> = items
                        .iter()
                        .filter(|item| {
                            tag_of(&item.item_code)
                                .is_some_and(|t| t.class == class && t.category == *category)
                        })
                        .cloned()
                        .collect();
                    (!members.is_empty()).then(|| CategoryGroup {
                        category: category.to_string(),
                        label: *label,
                        items: members,
                    })
                })
                .collect();
            (!groups.is_empty()).then_some(ClassSection { class, groups })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    High,
    Elevated,
    Low,
}

impl RiskLevel {
    pub fn from_high_share(high: u32) -> Self {
        if high >= 50 {
            RiskLevel::High
        } else if high >= 30 {
            RiskLevel::Elevated
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanPageView {
    Overview {
        company: String,
        total_targets: u32,
        duration: String,
    },
    Hotspot {
        top_target: Option<String>,
        top_count: u32,
        vulnerable_count: u32,
        secure_count: u32,
    },
    Risk {
        level: RiskLevel,
        distribution: RiskDistribution,
        risk_percentage: u32,
        all_clear: bool,
    },
}

/// Content of a scan result page. The progress page has none.
pub fn scan_page(report: &ScanReport, page: ScanPage) -> Option<ScanPageView> {
    match page {
        ScanPage::Progress => None,
        ScanPage::Overview => Some(ScanPageView::Overview {
            company: report.company.clone(),
            total_targets: report.total_targets,
            duration: report.scan_duration.clone(),
        }),
        ScanPage::Hotspot => Some(ScanPageView::Hotspot {
            top_target: report.top_vulnerable_target.as_ref().map(|t| t.target_id.clone()),
            top_count: report.top_vulnerable_target.as_ref().map_or(0, |t| t.count),
            vulnerable_count: report.vulnerable_count,
            secure_count: report.secure_count,
        }),
        ScanPage::Risk => Some(ScanPageView::Risk {
            level: RiskLevel::from_high_share(report.risk_distribution.high),
            distribution: report.risk_distribution,
            risk_percentage: report.risk_percentage,
            all_clear: report.risk_percentage == 0,
        }),
    }
}
