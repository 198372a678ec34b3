use sled::{Batch, Db, Tree};
use teloxide::types::ChatId;

use crate::error::{GateError, GateResult};
use crate::rules::dto::{EligibilityRule, NewRule, RuleGroup, RuleKind};

/// Persisted rules and rule groups, keyed `<chat_id>:<id>`.
#[derive(Clone)]
pub struct RuleStorage {
    db: Db,
    rules: Tree,
    groups: Tree,
}

fn chat_key(chat_id: ChatId, id: u64) -> String {
    format!("{}:{}", chat_id.0, id)
}

fn chat_prefix(chat_id: ChatId) -> String {
    format!("{}:", chat_id.0)
}

fn validate_kind(kind: &RuleKind) -> GateResult<()> {
    if let Some(threshold) = kind.threshold() {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(GateError::Validation(format!(
                "{} rule threshold must be greater than zero, got {}",
                kind.rule_type(),
                threshold
            )));
        }
    }

    match kind {
        RuleKind::ExternalSource { url, .. } if url.trim().is_empty() => Err(
            GateError::Validation("external source rule requires a url".to_string()),
        ),
        RuleKind::GiftCollection {
            collection_slug, ..
        } if collection_slug.trim().is_empty() => Err(GateError::Validation(
            "gift collection rule requires a collection slug".to_string(),
        )),
        _ => Ok(()),
    }
}

impl RuleStorage {
    pub fn new(db: Db) -> GateResult<Self> {
        let rules = db.open_tree("eligibility_rules")?;
        let groups = db.open_tree("rule_groups")?;

        Ok(Self { db, rules, groups })
    }

    pub fn create_rule(&self, new_rule: NewRule) -> GateResult<EligibilityRule> {
        validate_kind(&new_rule.kind)?;

        if let Some(group_id) = new_rule.group_id {
            if self.get_group(new_rule.chat_id, group_id)?.is_none() {
                return Err(GateError::NotFound(format!(
                    "rule group {} in chat {}",
                    group_id, new_rule.chat_id.0
                )));
            }
        }

        let rule = EligibilityRule {
            id: self.db.generate_id()?,
            chat_id: new_rule.chat_id,
            group_id: new_rule.group_id,
            is_enabled: new_rule.is_enabled,
            kind: new_rule.kind,
        };

        self.rules
            .insert(chat_key(rule.chat_id, rule.id), serde_json::to_vec(&rule)?)?;

        Ok(rule)
    }

    /// Replaces the rule's fields. The variant chosen at creation is permanent.
    pub fn update_rule(&self, rule: &EligibilityRule) -> GateResult<()> {
        let existing = self.get_rule(rule.chat_id, rule.id)?.ok_or_else(|| {
            GateError::NotFound(format!("rule {} in chat {}", rule.id, rule.chat_id.0))
        })?;

        if existing.kind.rule_type() != rule.kind.rule_type() {
            return Err(GateError::Validation(format!(
                "rule {} is a {} rule and cannot become {}",
                rule.id,
                existing.kind.rule_type(),
                rule.kind.rule_type()
            )));
        }

        validate_kind(&rule.kind)?;

        self.rules
            .insert(chat_key(rule.chat_id, rule.id), serde_json::to_vec(rule)?)?;

        Ok(())
    }

    pub fn set_rule_enabled(&self, chat_id: ChatId, rule_id: u64, is_enabled: bool) -> GateResult<()> {
        let mut rule = self
            .get_rule(chat_id, rule_id)?
            .ok_or_else(|| GateError::NotFound(format!("rule {} in chat {}", rule_id, chat_id.0)))?;

        rule.is_enabled = is_enabled;
        self.rules
            .insert(chat_key(chat_id, rule_id), serde_json::to_vec(&rule)?)?;

        Ok(())
    }

    pub fn get_rule(&self, chat_id: ChatId, rule_id: u64) -> GateResult<Option<EligibilityRule>> {
        match self.rules.get(chat_key(chat_id, rule_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete_rule(&self, chat_id: ChatId, rule_id: u64) -> GateResult<bool> {
        Ok(self.rules.remove(chat_key(chat_id, rule_id))?.is_some())
    }

    pub fn rules_for_chat(&self, chat_id: ChatId) -> GateResult<Vec<EligibilityRule>> {
        let mut rules = Vec::new();

        for entry in self.rules.scan_prefix(chat_prefix(chat_id)) {
            let (_, value) = entry?;
            rules.push(serde_json::from_slice::<EligibilityRule>(&value)?);
        }

        rules.sort_by_key(|rule| rule.id);
        Ok(rules)
    }

    /// Enabled external source rules across every chat.
    pub fn external_source_rules(&self) -> GateResult<Vec<EligibilityRule>> {
        let mut rules = Vec::new();

        for entry in self.rules.iter() {
            let (_, value) = entry?;
            let rule: EligibilityRule = serde_json::from_slice(&value)?;
            if rule.is_enabled && matches!(rule.kind, RuleKind::ExternalSource { .. }) {
                rules.push(rule);
            }
        }

        Ok(rules)
    }

    pub fn create_group(&self, chat_id: ChatId) -> GateResult<RuleGroup> {
        let next_order = self
            .groups_for_chat(chat_id)?
            .last()
            .map(|group| group.order + 1)
            .unwrap_or(1);

        let group = RuleGroup {
            id: self.db.generate_id()?,
            chat_id,
            order: next_order,
        };

        self.groups
            .insert(chat_key(chat_id, group.id), serde_json::to_vec(&group)?)?;

        Ok(group)
    }

    /// Returns the chat's first group, creating it when the chat has none.
    pub fn ensure_default_group(&self, chat_id: ChatId) -> GateResult<RuleGroup> {
        match self.groups_for_chat(chat_id)?.into_iter().next() {
            Some(group) => Ok(group),
            None => self.create_group(chat_id),
        }
    }

    pub fn get_group(&self, chat_id: ChatId, group_id: u64) -> GateResult<Option<RuleGroup>> {
        match self.groups.get(chat_key(chat_id, group_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Groups of a chat sorted by `order`.
    pub fn groups_for_chat(&self, chat_id: ChatId) -> GateResult<Vec<RuleGroup>> {
        let mut groups = Vec::new();

        for entry in self.groups.scan_prefix(chat_prefix(chat_id)) {
            let (_, value) = entry?;
            groups.push(serde_json::from_slice::<RuleGroup>(&value)?);
        }

        groups.sort_by_key(|group| group.order);
        Ok(groups)
    }

    /// Deletes a group and detaches its rules. The last group of a chat cannot be deleted.
    pub fn delete_group(&self, chat_id: ChatId, group_id: u64) -> GateResult<()> {
        let groups = self.groups_for_chat(chat_id)?;

        if !groups.iter().any(|group| group.id == group_id) {
            return Err(GateError::NotFound(format!(
                "rule group {} in chat {}",
                group_id, chat_id.0
            )));
        }

        if groups.len() == 1 {
            return Err(GateError::Validation(format!(
                "chat {} must keep at least one rule group",
                chat_id.0
            )));
        }

        let mut detach = Batch::default();
        for mut rule in self.rules_for_chat(chat_id)? {
            if rule.group_id == Some(group_id) {
                rule.group_id = None;
                detach.insert(
                    chat_key(chat_id, rule.id).as_bytes(),
                    serde_json::to_vec(&rule)?,
                );
            }
        }

        self.rules.apply_batch(detach)?;
        self.groups.remove(chat_key(chat_id, group_id))?;

        Ok(())
    }
}
