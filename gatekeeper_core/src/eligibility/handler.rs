use std::collections::BTreeMap;
use std::sync::Arc;

use teloxide::types::{ChatId, UserId};

use crate::custom_filters::dto::CategoryAddresses;
use crate::custom_filters::handler::apply_category;
use crate::eligibility::dto::{ChatEligibilitySummary, EligibilitySummaryItem, RuleGroupSummary};
use crate::error::{GateError, GateResult};
use crate::holdings::dto::{TelegramProfile, WalletSnapshot};
use crate::holdings::storage::HoldingsStorage;
use crate::rules::dto::{EligibilityRule, RuleKind};
use crate::rules::storage::RuleStorage;

/// Per-request view of the user being evaluated.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub user_id: UserId,
    pub wallet: Option<WalletSnapshot>,
    pub profile: Option<TelegramProfile>,
}

#[derive(Clone)]
pub struct RuleEvaluator {
    holdings: HoldingsStorage,
    categories: Arc<CategoryAddresses>,
}

impl RuleEvaluator {
    pub fn new(holdings: HoldingsStorage, categories: Arc<CategoryAddresses>) -> Self {
        Self {
            holdings,
            categories,
        }
    }

    pub fn load_context(&self, user_id: UserId) -> GateResult<EvaluationContext> {
        let wallet = match self.holdings.wallet_for_user(user_id)? {
            Some(address) => Some(self.holdings.get_wallet(&address)?.unwrap_or(WalletSnapshot {
                address,
                ton_balance: 0,
                jettons: BTreeMap::new(),
                nft_items: vec![],
                observed_at: 0,
            })),
            None => None,
        };

        Ok(EvaluationContext {
            user_id,
            wallet,
            profile: self.holdings.get_profile(user_id)?,
        })
    }

    /// Computes one rule's actual value and eligibility. Reads holdings only.
    pub fn evaluate(
        &self,
        rule: &EligibilityRule,
        context: &EvaluationContext,
    ) -> GateResult<EligibilitySummaryItem> {
        let wallet = context.wallet.as_ref();

        match &rule.kind {
            RuleKind::Toncoin { threshold } => {
                let actual = wallet.map(WalletSnapshot::ton).unwrap_or(0.0);
                Ok(EligibilitySummaryItem::threshold(
                    rule,
                    "TON".to_string(),
                    actual,
                    *threshold,
                ))
            }
            RuleKind::Jetton { address, threshold } => {
                let jetton = self
                    .holdings
                    .get_jetton(address)?
                    .ok_or_else(|| GateError::NotFound(format!("jetton {}", address)))?;
                let actual = wallet
                    .map(|wallet| jetton.to_amount(wallet.jetton_raw_balance(address)))
                    .unwrap_or(0.0);

                Ok(EligibilitySummaryItem::threshold(
                    rule,
                    jetton.symbol.clone(),
                    actual,
                    *threshold,
                ))
            }
            RuleKind::NftCollection {
                address,
                category,
                threshold,
            } => {
                let items = wallet.map(|wallet| wallet.nft_items.as_slice()).unwrap_or(&[]);

                // A category narrows by its own configured collection and wins over the address.
                let (title, actual) = match (category, address) {
                    (Some(category), _) => {
                        let matched = apply_category(category, items, &self.categories);
                        (category.clone(), matched.len())
                    }
                    (None, Some(address)) => {
                        let collection = self.holdings.get_nft_collection(address)?.ok_or_else(
                            || GateError::NotFound(format!("nft collection {}", address)),
                        )?;
                        let count = items
                            .iter()
                            .filter(|item| item.collection_address.as_deref() == Some(address.as_str()))
                            .count();
                        (collection.name, count)
                    }
                    (None, None) => {
                        return Err(GateError::Validation(format!(
                            "nft rule {} has neither address nor category",
                            rule.id
                        )));
                    }
                };

                Ok(EligibilitySummaryItem::threshold(
                    rule,
                    title,
                    actual as f64,
                    *threshold as f64,
                ))
            }
            RuleKind::StickerCollection {
                collection_id,
                character_id,
                category,
                threshold,
            } => {
                let collection = self
                    .holdings
                    .get_sticker_collection(*collection_id)?
                    .ok_or_else(|| GateError::NotFound(format!("sticker collection {}", collection_id)))?;

                let actual = self
                    .holdings
                    .sticker_items(context.user_id)?
                    .iter()
                    .filter(|item| item.collection_id == *collection_id)
                    .filter(|item| character_id.map_or(true, |id| item.character_id == id))
                    .filter(|item| category.is_none() || item.category == *category)
                    .count();

                Ok(EligibilitySummaryItem::threshold(
                    rule,
                    collection.title,
                    actual as f64,
                    *threshold as f64,
                ))
            }
            RuleKind::GiftCollection {
                collection_slug,
                model,
                backdrop,
                pattern,
                threshold,
            } => {
                let collection = self
                    .holdings
                    .get_gift_collection(collection_slug)?
                    .ok_or_else(|| GateError::NotFound(format!("gift collection {}", collection_slug)))?;

                let attribute_matches = |wanted: &Option<String>, actual: &Option<String>| {
                    wanted.is_none() || wanted == actual
                };

                let actual = self
                    .holdings
                    .gift_items_of(collection_slug, context.user_id)?
                    .iter()
                    .filter(|gift| attribute_matches(model, &gift.model))
                    .filter(|gift| attribute_matches(backdrop, &gift.backdrop))
                    .filter(|gift| attribute_matches(pattern, &gift.pattern))
                    .count();

                Ok(EligibilitySummaryItem::threshold(
                    rule,
                    collection.title,
                    actual as f64,
                    *threshold as f64,
                ))
            }
            RuleKind::Premium => {
                let is_premium = context.profile.as_ref().is_some_and(|p| p.is_premium);
                Ok(EligibilitySummaryItem::membership(
                    rule,
                    "Telegram Premium".to_string(),
                    is_premium,
                ))
            }
            RuleKind::Emoji { emoji_id } => {
                let has_emoji = context
                    .profile
                    .as_ref()
                    .and_then(|p| p.emoji_status_id.as_ref())
                    .is_some_and(|status| status == emoji_id);
                Ok(EligibilitySummaryItem::membership(
                    rule,
                    "Emoji status".to_string(),
                    has_emoji,
                ))
            }
            RuleKind::Whitelist { user_ids } => Ok(EligibilitySummaryItem::membership(
                rule,
                "Whitelist".to_string(),
                user_ids.contains(&context.user_id.0),
            )),
            RuleKind::ExternalSource { url, .. } => {
                let members = self.holdings.external_members(rule.id)?.ok_or_else(|| {
                    GateError::NotFound(format!("no member snapshot for external source {}", url))
                })?;
                Ok(EligibilitySummaryItem::membership(
                    rule,
                    "External source".to_string(),
                    members.contains(&context.user_id.0),
                ))
            }
        }
    }

    /// Like `evaluate`, but local faults become an ineligible item.
    /// Infrastructure errors still propagate.
    pub fn evaluate_or_degrade(
        &self,
        rule: &EligibilityRule,
        context: &EvaluationContext,
    ) -> GateResult<EligibilitySummaryItem> {
        match self.evaluate(rule, context) {
            Ok(item) => Ok(item),
            Err(e) if e.is_degradable() => {
                log::warn!(
                    "Rule {} ({}) in chat {} degraded to ineligible: {}",
                    rule.id,
                    rule.kind.rule_type(),
                    rule.chat_id.0,
                    e
                );
                Ok(EligibilitySummaryItem::degraded(rule))
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Clone)]
pub struct EligibilityAggregator {
    rules: RuleStorage,
    holdings: HoldingsStorage,
    evaluator: RuleEvaluator,
}

impl EligibilityAggregator {
    pub fn new(rules: RuleStorage, holdings: HoldingsStorage, evaluator: RuleEvaluator) -> Self {
        Self {
            rules,
            holdings,
            evaluator,
        }
    }

    /// Evaluates every enabled rule of the chat for `user_id`, grouped by rule group.
    pub fn aggregate(&self, chat_id: ChatId, user_id: UserId) -> GateResult<ChatEligibilitySummary> {
        let context = self.evaluator.load_context(user_id)?;
        let groups = self.rules.groups_for_chat(chat_id)?;

        let mut ungrouped = Vec::new();
        let mut grouped: BTreeMap<u64, Vec<EligibilitySummaryItem>> = BTreeMap::new();

        for rule in self.rules.rules_for_chat(chat_id)? {
            if !rule.is_enabled {
                continue;
            }

            let item = self.evaluator.evaluate_or_degrade(&rule, &context)?;

            match rule.group_id {
                Some(group_id) if groups.iter().any(|group| group.id == group_id) => {
                    grouped.entry(group_id).or_default().push(item);
                }
                Some(group_id) => {
                    log::warn!(
                        "Rule {} points at missing group {} in chat {}, evaluating standalone",
                        rule.id,
                        group_id,
                        chat_id.0
                    );
                    ungrouped.push(item);
                }
                None => ungrouped.push(item),
            }
        }

        let groups = groups
            .into_iter()
            .map(|group| RuleGroupSummary {
                group_id: group.id,
                order: group.order,
                items: grouped.remove(&group.id).unwrap_or_default(),
            })
            .collect();

        Ok(ChatEligibilitySummary {
            ungrouped,
            groups,
            wallet: context.wallet.map(|wallet| wallet.address),
            is_admin: self.holdings.is_chat_admin(chat_id, user_id)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::dto::AdmissionPolicy;
    use crate::holdings::dto::{
        GiftCollectionMetadata, GiftItem, JettonMetadata, NftItem, StickerCollectionMetadata,
        StickerItem,
    };
    use crate::rules::dto::NewRule;
    use std::collections::{BTreeSet, HashMap};
    use tempfile::TempDir;

    const CHAT: ChatId = ChatId(-100200);
    const USER: UserId = UserId(777);
    const WALLET: &str = "EQUserWallet";
    const JETTON: &str = "EQJetton";

    struct Fixture {
        rules: RuleStorage,
        holdings: HoldingsStorage,
        aggregator: EligibilityAggregator,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let db = sled::open(temp.path()).unwrap();
        let rules = RuleStorage::new(db.clone()).unwrap();
        let holdings = HoldingsStorage::new(&db).unwrap();
        let categories = CategoryAddresses {
            usernames: "EQUsernames".to_string(),
            anonymous_numbers: "EQNumbers".to_string(),
            ton_dns: "EQDns".to_string(),
            fixed: HashMap::new(),
        };
        let evaluator = RuleEvaluator::new(holdings.clone(), Arc::new(categories));
        let aggregator = EligibilityAggregator::new(rules.clone(), holdings.clone(), evaluator);

        holdings
            .upsert_jetton(&JettonMetadata {
                address: JETTON.to_string(),
                symbol: "JET".to_string(),
                decimals: 9,
            })
            .unwrap();
        holdings.link_wallet(USER, WALLET).unwrap();
        holdings
            .apply_wallet_snapshots(&[WalletSnapshot {
                address: WALLET.to_string(),
                ton_balance: 3_000_000_000,
                jettons: BTreeMap::from([(JETTON.to_string(), 1_500_000_000_000u128)]),
                nft_items: vec![NftItem {
                    address: "EQNft1".to_string(),
                    collection_address: Some("EQUsernames".to_string()),
                    name: Some("@abc".to_string()),
                }],
                observed_at: 1,
            }])
            .unwrap();

        Fixture {
            rules,
            holdings,
            aggregator,
            _temp: temp,
        }
    }

    fn add_rule(fixture: &Fixture, group_id: Option<u64>, kind: RuleKind) -> EligibilityRule {
        fixture
            .rules
            .create_rule(NewRule {
                chat_id: CHAT,
                group_id,
                is_enabled: true,
                kind,
            })
            .unwrap()
    }

    #[test]
    fn test_jetton_threshold_end_to_end() {
        let fixture = fixture();
        add_rule(
            &fixture,
            None,
            RuleKind::Jetton {
                address: JETTON.to_string(),
                threshold: 1000.0,
            },
        );

        let summary = fixture.aggregator.aggregate(CHAT, USER).unwrap();
        let item = &summary.ungrouped[0];

        assert_eq!(item.address(), Some(JETTON));
        assert_eq!(item.actual(), 1500.0);
        assert_eq!(item.expected(), 1000.0);
        assert!(item.is_eligible());
        assert_eq!(summary.wallet.as_deref(), Some(WALLET));
    }

    #[test]
    fn test_threshold_eligibility_matches_comparison() {
        let fixture = fixture();
        for threshold in [1.0, 2.999, 3.0, 3.001, 50.0] {
            add_rule(&fixture, None, RuleKind::Toncoin { threshold });
        }

        let summary = fixture.aggregator.aggregate(CHAT, USER).unwrap();
        assert_eq!(summary.ungrouped.len(), 5);
        for item in summary.items() {
            assert_eq!(item.actual(), 3.0);
            assert_eq!(item.is_eligible(), item.actual() >= item.expected());
        }
    }

    #[test]
    fn test_unknown_jetton_degrades_without_aborting() {
        let fixture = fixture();
        add_rule(
            &fixture,
            None,
            RuleKind::Jetton {
                address: "EQMissing".to_string(),
                threshold: 1.0,
            },
        );
        add_rule(&fixture, None, RuleKind::Toncoin { threshold: 1.0 });

        let summary = fixture.aggregator.aggregate(CHAT, USER).unwrap();
        assert_eq!(summary.ungrouped.len(), 2);
        assert!(!summary.ungrouped[0].is_eligible());
        assert_eq!(summary.ungrouped[0].actual(), 0.0);
        assert!(summary.ungrouped[1].is_eligible());
    }

    #[test]
    fn test_disabled_rules_are_excluded() {
        let fixture = fixture();
        let rule = add_rule(&fixture, None, RuleKind::Premium);
        fixture.rules.set_rule_enabled(CHAT, rule.id, false).unwrap();

        let summary = fixture.aggregator.aggregate(CHAT, USER).unwrap();
        assert_eq!(summary.items().count(), 0);
    }

    #[test]
    fn test_unknown_nft_category_counts_zero() {
        let fixture = fixture();
        add_rule(
            &fixture,
            None,
            RuleKind::NftCollection {
                address: None,
                category: Some("golden-frogs".to_string()),
                threshold: 1,
            },
        );
        add_rule(
            &fixture,
            None,
            RuleKind::NftCollection {
                address: Some("EQIgnored".to_string()),
                category: Some("usernames-4".to_string()),
                threshold: 1,
            },
        );

        let summary = fixture.aggregator.aggregate(CHAT, USER).unwrap();
        assert_eq!(summary.ungrouped[0].actual(), 0.0);
        assert!(!summary.ungrouped[0].is_eligible());
        assert_eq!(summary.ungrouped[1].actual(), 1.0);
        assert!(summary.ungrouped[1].is_eligible());
    }

    #[test]
    fn test_groups_reported_in_order_and_admin_flag_kept_separate() {
        let fixture = fixture();
        let first = fixture.rules.create_group(CHAT).unwrap();
        let second = fixture.rules.create_group(CHAT).unwrap();
        add_rule(&fixture, Some(second.id), RuleKind::Premium);
        add_rule(&fixture, Some(first.id), RuleKind::Toncoin { threshold: 1.0 });
        add_rule(
            &fixture,
            Some(first.id),
            RuleKind::Whitelist {
                user_ids: vec![USER.0],
            },
        );
        fixture.holdings.set_chat_admin(CHAT, USER, true).unwrap();

        let summary = fixture.aggregator.aggregate(CHAT, USER).unwrap();

        assert!(summary.is_admin);
        assert_eq!(summary.groups[0].group_id, first.id);
        assert_eq!(summary.groups[0].items.len(), 2);
        assert!(summary.groups[0].is_eligible());
        assert_eq!(summary.groups[1].group_id, second.id);
        assert!(!summary.groups[1].is_eligible());
        assert!(summary.is_admitted(AdmissionPolicy::AnyGroup));
        assert!(!summary.is_admitted(AdmissionPolicy::AllGroups));
    }

    #[test]
    fn test_external_source_membership() {
        let fixture = fixture();
        let rule = add_rule(
            &fixture,
            None,
            RuleKind::ExternalSource {
                url: "https://lists.example.com/users".to_string(),
                auth_key: None,
                auth_value: None,
            },
        );

        let summary = fixture.aggregator.aggregate(CHAT, USER).unwrap();
        assert!(!summary.ungrouped[0].is_eligible());

        fixture
            .holdings
            .replace_external_members(rule.id, &BTreeSet::from([USER.0, 1]))
            .unwrap();
        let summary = fixture.aggregator.aggregate(CHAT, USER).unwrap();
        assert!(summary.ungrouped[0].is_eligible());
    }

    #[test]
    fn test_gift_and_sticker_attribute_filters() {
        let fixture = fixture();
        fixture
            .holdings
            .upsert_gift_collection(&GiftCollectionMetadata {
                collection_slug: "plushpepe".to_string(),
                title: "Plush Pepe".to_string(),
            })
            .unwrap();
        fixture
            .holdings
            .replace_gift_items(
                "plushpepe",
                &[GiftItem {
                    collection_slug: "plushpepe".to_string(),
                    number: 12,
                    owner_user_id: Some(USER),
                    model: Some("Gold".to_string()),
                    backdrop: None,
                    pattern: None,
                }],
            )
            .unwrap();
        fixture
            .holdings
            .upsert_sticker_collection(&StickerCollectionMetadata {
                collection_id: 3,
                title: "Pudgy".to_string(),
            })
            .unwrap();
        fixture
            .holdings
            .replace_sticker_items(
                USER,
                &[StickerItem {
                    collection_id: 3,
                    character_id: 8,
                    category: None,
                    owner_user_id: USER,
                }],
            )
            .unwrap();

        let gift = |model: &str| RuleKind::GiftCollection {
            collection_slug: "plushpepe".to_string(),
            model: Some(model.to_string()),
            backdrop: None,
            pattern: None,
            threshold: 1,
        };
        add_rule(&fixture, None, gift("Gold"));
        add_rule(&fixture, None, gift("Silver"));
        add_rule(
            &fixture,
            None,
            RuleKind::StickerCollection {
                collection_id: 3,
                character_id: Some(8),
                category: None,
                threshold: 1,
            },
        );

        let summary = fixture.aggregator.aggregate(CHAT, USER).unwrap();
        let eligible: Vec<bool> = summary.ungrouped.iter().map(|i| i.is_eligible()).collect();
        assert_eq!(eligible, vec![true, false, true]);
        assert_eq!(summary.ungrouped[0].title(), "Plush Pepe");
    }

    #[test]
    fn test_user_without_wallet_gets_zero_balances() {
        let fixture = fixture();
        add_rule(&fixture, None, RuleKind::Toncoin { threshold: 1.0 });

        let summary = fixture.aggregator.aggregate(CHAT, UserId(1)).unwrap();
        assert_eq!(summary.wallet, None);
        assert_eq!(summary.ungrouped[0].actual(), 0.0);
        assert!(!summary.is_admin);
    }
}
