use std::collections::{BTreeSet, HashMap};

use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Tree};
use teloxide::types::{ChatId, UserId};

use crate::error::{GateError, GateResult};
use crate::holdings::dto::{
    GiftCollectionMetadata, GiftItem, JettonMetadata, NftCollectionMetadata,
    StickerCollectionMetadata, StickerItem, TelegramProfile, WalletSnapshot,
};

/// Persisted holdings snapshots and the asset metadata rules refer to.
#[derive(Clone)]
pub struct HoldingsStorage {
    wallets: Tree,
    user_wallets: Tree,
    profiles: Tree,
    sticker_items: Tree,
    gift_items: Tree,
    jettons: Tree,
    nft_collections: Tree,
    sticker_collections: Tree,
    gift_collections: Tree,
    external_members: Tree,
    chat_admins: Tree,
}

fn get_json<T: DeserializeOwned>(tree: &Tree, key: impl AsRef<[u8]>) -> GateResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn put_json<T: Serialize>(tree: &Tree, key: impl AsRef<[u8]>, value: &T) -> GateResult<()> {
    tree.insert(key, serde_json::to_vec(value)?)?;
    Ok(())
}

impl HoldingsStorage {
    pub fn new(db: &Db) -> GateResult<Self> {
        Ok(Self {
            wallets: db.open_tree("wallets")?,
            user_wallets: db.open_tree("user_wallets")?,
            profiles: db.open_tree("telegram_profiles")?,
            sticker_items: db.open_tree("sticker_items")?,
            gift_items: db.open_tree("gift_items")?,
            jettons: db.open_tree("jettons")?,
            nft_collections: db.open_tree("nft_collections")?,
            sticker_collections: db.open_tree("sticker_collections")?,
            gift_collections: db.open_tree("gift_collections")?,
            external_members: db.open_tree("external_source_members")?,
            chat_admins: db.open_tree("chat_admins")?,
        })
    }

    pub fn get_wallet(&self, address: &str) -> GateResult<Option<WalletSnapshot>> {
        get_json(&self.wallets, address)
    }

    /// Writes snapshots in one transaction. Per wallet the snapshot with the
    /// newest `observed_at` wins, so replaying a batch leaves the store unchanged.
    /// Returns how many wallets were written.
    pub fn apply_wallet_snapshots(&self, snapshots: &[WalletSnapshot]) -> GateResult<usize> {
        let mut latest: HashMap<&str, &WalletSnapshot> = HashMap::new();
        for snapshot in snapshots {
            match latest.get(snapshot.address.as_str()) {
                Some(current) if current.observed_at >= snapshot.observed_at => {}
                _ => {
                    latest.insert(snapshot.address.as_str(), snapshot);
                }
            }
        }

        let result = self.wallets.transaction(|tx| {
            let mut written = 0usize;

            for (address, snapshot) in latest.iter() {
                if let Some(existing) = tx.get(address.as_bytes())? {
                    let existing: WalletSnapshot = serde_json::from_slice(&existing)
                        .map_err(ConflictableTransactionError::Abort)?;
                    if existing.observed_at >= snapshot.observed_at {
                        continue;
                    }
                }

                let bytes =
                    serde_json::to_vec(*snapshot).map_err(ConflictableTransactionError::Abort)?;
                tx.insert(address.as_bytes(), bytes)?;
                written += 1;
            }

            Ok(written)
        });

        match result {
            Ok(written) => Ok(written),
            Err(TransactionError::Abort(e)) => Err(GateError::Serialization(e)),
            Err(TransactionError::Storage(e)) => Err(GateError::Storage(e)),
        }
    }

    pub fn link_wallet(&self, user_id: UserId, address: &str) -> GateResult<()> {
        self.user_wallets.insert(user_id.0.to_string(), address.as_bytes())?;
        Ok(())
    }

    pub fn wallet_for_user(&self, user_id: UserId) -> GateResult<Option<String>> {
        Ok(self
            .user_wallets
            .get(user_id.0.to_string())?
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()))
    }

    /// Removes every user link to `address`. Returns the affected users.
    pub fn unlink_wallet(&self, address: &str) -> GateResult<Vec<UserId>> {
        let mut unlinked = Vec::new();
        let mut batch = Batch::default();

        for entry in self.user_wallets.iter() {
            let (key, value) = entry?;
            if value.as_ref() == address.as_bytes() {
                if let Ok(user_id) = String::from_utf8_lossy(&key).parse::<u64>() {
                    unlinked.push(UserId(user_id));
                }
                batch.remove(key);
            }
        }

        self.user_wallets.apply_batch(batch)?;
        Ok(unlinked)
    }

    /// Distinct addresses currently linked to at least one user.
    pub fn tracked_wallets(&self) -> GateResult<Vec<String>> {
        let mut addresses = BTreeSet::new();

        for entry in self.user_wallets.iter() {
            let (_, value) = entry?;
            addresses.insert(String::from_utf8_lossy(&value).to_string());
        }

        Ok(addresses.into_iter().collect())
    }

    /// Users the pipeline knows about: anyone with a linked wallet or a stored profile.
    pub fn known_users(&self) -> GateResult<Vec<UserId>> {
        let mut users = BTreeSet::new();

        for tree in [&self.user_wallets, &self.profiles] {
            for key in tree.iter().keys() {
                if let Ok(user_id) = String::from_utf8_lossy(&key?).parse::<u64>() {
                    users.insert(user_id);
                }
            }
        }

        Ok(users.into_iter().map(UserId).collect())
    }

    pub fn set_profile(&self, profile: &TelegramProfile) -> GateResult<()> {
        put_json(&self.profiles, profile.user_id.0.to_string(), profile)
    }

    pub fn get_profile(&self, user_id: UserId) -> GateResult<Option<TelegramProfile>> {
        get_json(&self.profiles, user_id.0.to_string())
    }

    pub fn replace_sticker_items(&self, user_id: UserId, items: &[StickerItem]) -> GateResult<()> {
        put_json(&self.sticker_items, user_id.0.to_string(), &items)
    }

    pub fn sticker_items(&self, user_id: UserId) -> GateResult<Vec<StickerItem>> {
        Ok(get_json(&self.sticker_items, user_id.0.to_string())?.unwrap_or_default())
    }

    /// Replaces the whole ownership list of one gift collection.
    pub fn replace_gift_items(&self, collection_slug: &str, items: &[GiftItem]) -> GateResult<()> {
        put_json(&self.gift_items, collection_slug, &items)
    }

    pub fn gift_items_of(&self, collection_slug: &str, user_id: UserId) -> GateResult<Vec<GiftItem>> {
        let items: Vec<GiftItem> = get_json(&self.gift_items, collection_slug)?.unwrap_or_default();

        Ok(items
            .into_iter()
            .filter(|item| item.owner_user_id == Some(user_id))
            .collect())
    }

    /// Stores asset metadata seen by the wallet indexer, one batch per tree.
    pub fn record_wallet_metadata(
        &self,
        jettons: &[JettonMetadata],
        collections: &[NftCollectionMetadata],
    ) -> GateResult<()> {
        let mut jetton_batch = Batch::default();
        for jetton in jettons {
            jetton_batch.insert(jetton.address.as_bytes(), serde_json::to_vec(jetton)?);
        }

        let mut collection_batch = Batch::default();
        for collection in collections {
            collection_batch.insert(collection.address.as_bytes(), serde_json::to_vec(collection)?);
        }

        self.jettons.apply_batch(jetton_batch)?;
        self.nft_collections.apply_batch(collection_batch)?;
        Ok(())
    }

    pub fn upsert_jetton(&self, jetton: &JettonMetadata) -> GateResult<()> {
        put_json(&self.jettons, &jetton.address, jetton)
    }

    pub fn get_jetton(&self, address: &str) -> GateResult<Option<JettonMetadata>> {
        get_json(&self.jettons, address)
    }

    pub fn upsert_nft_collection(&self, collection: &NftCollectionMetadata) -> GateResult<()> {
        put_json(&self.nft_collections, &collection.address, collection)
    }

    pub fn get_nft_collection(&self, address: &str) -> GateResult<Option<NftCollectionMetadata>> {
        get_json(&self.nft_collections, address)
    }

    pub fn upsert_sticker_collection(&self, collection: &StickerCollectionMetadata) -> GateResult<()> {
        put_json(
            &self.sticker_collections,
            collection.collection_id.to_string(),
            collection,
        )
    }

    pub fn get_sticker_collection(
        &self,
        collection_id: u64,
    ) -> GateResult<Option<StickerCollectionMetadata>> {
        get_json(&self.sticker_collections, collection_id.to_string())
    }

    pub fn upsert_gift_collection(&self, collection: &GiftCollectionMetadata) -> GateResult<()> {
        put_json(&self.gift_collections, &collection.collection_slug, collection)
    }

    pub fn get_gift_collection(&self, slug: &str) -> GateResult<Option<GiftCollectionMetadata>> {
        get_json(&self.gift_collections, slug)
    }

    pub fn gift_collections(&self) -> GateResult<Vec<GiftCollectionMetadata>> {
        let mut collections = Vec::new();
        for entry in self.gift_collections.iter() {
            let (_, value) = entry?;
            collections.push(serde_json::from_slice(&value)?);
        }
        Ok(collections)
    }

    /// Stores the latest member list of an external source rule and returns
    /// the previous one, if any.
    pub fn replace_external_members(
        &self,
        rule_id: u64,
        members: &BTreeSet<u64>,
    ) -> GateResult<Option<Vec<u64>>> {
        let previous = self
            .external_members
            .insert(rule_id.to_be_bytes(), serde_json::to_vec(members)?)?;

        match previous {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn external_members(&self, rule_id: u64) -> GateResult<Option<BTreeSet<u64>>> {
        get_json(&self.external_members, rule_id.to_be_bytes())
    }

    pub fn set_chat_admin(&self, chat_id: ChatId, user_id: UserId, is_admin: bool) -> GateResult<()> {
        let key = format!("{}:{}", chat_id.0, user_id.0);
        if is_admin {
            self.chat_admins.insert(key, vec![1u8])?;
        } else {
            self.chat_admins.remove(key)?;
        }
        Ok(())
    }

    pub fn is_chat_admin(&self, chat_id: ChatId, user_id: UserId) -> GateResult<bool> {
        Ok(self
            .chat_admins
            .contains_key(format!("{}:{}", chat_id.0, user_id.0))?)
    }
}
