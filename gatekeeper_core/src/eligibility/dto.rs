use serde::Serialize;
use utoipa::ToSchema;

use crate::rules::dto::{EligibilityRule, RuleKind, RuleType};

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct EligibilitySummaryItem {
    id: u64,
    rule_type: RuleType,
    title: String,
    address: Option<String>,
    category: Option<String>,
    actual: f64,
    expected: f64,
    is_enabled: bool,
    is_eligible: bool,
}

impl EligibilitySummaryItem {
    /// Numeric rule: eligible when `actual >= expected`.
    pub fn threshold(rule: &EligibilityRule, title: String, actual: f64, expected: f64) -> Self {
        Self::build(rule, title, actual, expected, actual >= expected)
    }

    /// Set based rule: eligible when the user is a member.
    pub fn membership(rule: &EligibilityRule, title: String, is_member: bool) -> Self {
        let actual = if is_member { 1.0 } else { 0.0 };
        Self::build(rule, title, actual, 1.0, is_member)
    }

    /// Rule whose evaluation failed. Never eligible.
    pub fn degraded(rule: &EligibilityRule) -> Self {
        let expected = rule.kind.threshold().unwrap_or(1.0);
        Self::build(rule, rule.kind.rule_type().to_string(), 0.0, expected, false)
    }

    fn build(rule: &EligibilityRule, title: String, actual: f64, expected: f64, is_eligible: bool) -> Self {
        let (address, category) = match &rule.kind {
            RuleKind::Jetton { address, .. } => (Some(address.clone()), None),
            RuleKind::NftCollection {
                address, category, ..
            } => (address.clone(), category.clone()),
            RuleKind::StickerCollection { category, .. } => (None, category.clone()),
            RuleKind::GiftCollection {
                collection_slug, ..
            } => (Some(collection_slug.clone()), None),
            RuleKind::ExternalSource { url, .. } => (Some(url.clone()), None),
            _ => (None, None),
        };

        Self {
            id: rule.id,
            rule_type: rule.kind.rule_type(),
            title,
            address,
            category,
            actual,
            expected,
            is_enabled: rule.is_enabled,
            is_eligible,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn actual(&self) -> f64 {
        self.actual
    }

    pub fn expected(&self) -> f64 {
        self.expected
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn is_eligible(&self) -> bool {
        self.is_eligible
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct RuleGroupSummary {
    pub group_id: u64,
    pub order: u32,
    pub items: Vec<EligibilitySummaryItem>,
}

impl RuleGroupSummary {
    /// All rules of the group pass. An empty group passes nothing.
    pub fn is_eligible(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(EligibilitySummaryItem::is_eligible)
    }
}

/// How per-group results combine into one admission decision. Chosen by the
/// caller, there is no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    AnyGroup,
    AllGroups,
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct ChatEligibilitySummary {
    pub ungrouped: Vec<EligibilitySummaryItem>,
    pub groups: Vec<RuleGroupSummary>,
    pub wallet: Option<String>,
    pub is_admin: bool,
}

impl ChatEligibilitySummary {
    /// Rule outcome only; the admin flag is left for the caller to weigh.
    pub fn is_admitted(&self, policy: AdmissionPolicy) -> bool {
        if !self.ungrouped.iter().all(EligibilitySummaryItem::is_eligible) {
            return false;
        }

        let groups: Vec<&RuleGroupSummary> =
            self.groups.iter().filter(|group| !group.items.is_empty()).collect();

        if groups.is_empty() {
            return true;
        }

        match policy {
            AdmissionPolicy::AnyGroup => groups.iter().any(|group| group.is_eligible()),
            AdmissionPolicy::AllGroups => groups.iter().all(|group| group.is_eligible()),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = &EligibilitySummaryItem> {
        self.ungrouped
            .iter()
            .chain(self.groups.iter().flat_map(|group| group.items.iter()))
    }
}
