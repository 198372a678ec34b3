use std::collections::BTreeSet;

use reqwest::{redirect::Policy, Client};
use teloxide::types::UserId;

use crate::coordination::handler::{CoordinationStore, Mailbox};
use crate::error::{GateError, GateResult};
use crate::external_source::dto::{
    ExternalSourcePayload, FetcherConfig, MembershipRevocation, WhitelistDiff,
};
use crate::holdings::storage::HoldingsStorage;
use crate::rate_limit::TokenBucket;
use crate::rules::dto::{EligibilityRule, RuleKind};

/// Downloads allow-lists from third party URLs.
#[derive(Clone)]
pub struct ExternalSourceFetcher {
    client: Client,
    limiter: TokenBucket,
}

impl ExternalSourceFetcher {
    pub fn new(config: &FetcherConfig, limiter: TokenBucket) -> GateResult<Self> {
        // Certificate and hostname checks stay at reqwest's defaults.
        let client = Client::builder()
            .user_agent("gatekeeper-external-source/1.0")
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .timeout(config.total_timeout)
            .redirect(Policy::limited(config.max_redirects))
            .https_only(config.https_only)
            .build()
            .map_err(|e| GateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, limiter })
    }

    pub async fn fetch(
        &self,
        url: &str,
        auth_key: Option<&str>,
        auth_value: Option<&str>,
    ) -> GateResult<BTreeSet<u64>> {
        self.limiter.acquire().await;

        let mut request = self.client.get(url).header("Accept", "application/json");
        if let (Some(key), Some(value)) = (auth_key, auth_value) {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GateError::Transport(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::Transport(format!(
                "External source {} answered {}",
                url, status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GateError::Transport(format!("Failed to read body from {}: {}", url, e)))?;

        let payload: ExternalSourcePayload = serde_json::from_str(&body).map_err(|e| {
            GateError::Validation(format!("External source {} returned invalid payload: {}", url, e))
        })?;

        log::info!("External source {} returned {} users", url, payload.users.len());

        Ok(payload.users.into_iter().collect())
    }

    /// Fetches the rule's source, posts every dropped member as
    /// `chat_id:user_id` to the revocation mailbox, then stores the new snapshot.
    pub async fn refresh(
        &self,
        rule: &EligibilityRule,
        holdings: &HoldingsStorage,
        store: &dyn CoordinationStore,
    ) -> GateResult<WhitelistDiff> {
        let RuleKind::ExternalSource {
            url,
            auth_key,
            auth_value,
        } = &rule.kind
        else {
            return Err(GateError::Validation(format!(
                "rule {} is a {} rule, not an external source",
                rule.id,
                rule.kind.rule_type()
            )));
        };

        let current = self
            .fetch(url, auth_key.as_deref(), auth_value.as_deref())
            .await?;

        let previous: Option<Vec<u64>> = holdings
            .external_members(rule.id)?
            .map(|members| members.into_iter().collect());
        let current_list: Vec<u64> = current.iter().copied().collect();
        let diff = WhitelistDiff::compute(previous.as_deref(), &current_list);

        if !diff.removed.is_empty() {
            let revoked: Vec<String> = diff
                .removed
                .iter()
                .map(|user_id| {
                    MembershipRevocation {
                        chat_id: rule.chat_id,
                        user_id: UserId(*user_id),
                    }
                    .to_member()
                })
                .collect();
            store.push_to_mailbox(Mailbox::MembershipRevoked, &revoked).await?;
        }

        holdings.replace_external_members(rule.id, &current)?;

        log::info!(
            "External source rule {} in chat {}: {} added, {} removed",
            rule.id,
            rule.chat_id.0,
            diff.added.len(),
            diff.removed.len()
        );

        Ok(diff)
    }
}
