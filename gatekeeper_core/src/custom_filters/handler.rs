use regex::Regex;
use std::sync::LazyLock;

use crate::custom_filters::dto::{CategoryAddresses, NftCategory};
use crate::holdings::dto::NftItem;

pub type CategoryFilterFn = fn(&[NftItem], &CategoryAddresses) -> Vec<NftItem>;

/// Category to filter dispatch table.
pub static CATEGORY_FILTERS: &[(NftCategory, CategoryFilterFn)] = &[
    (NftCategory::Usernames4, usernames_4),
    (NftCategory::Usernames5, usernames_5),
    (NftCategory::AnonymousNumbers7, anonymous_numbers_7),
    (NftCategory::TonDns4, ton_dns_4),
    (NftCategory::TonDns5, ton_dns_5),
    (NftCategory::PlushPepes, plush_pepes),
];

static DIGIT_GROUPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));

fn usernames_4(items: &[NftItem], addresses: &CategoryAddresses) -> Vec<NftItem> {
    filter_by_username_length(items, &addresses.usernames, 4)
}

fn usernames_5(items: &[NftItem], addresses: &CategoryAddresses) -> Vec<NftItem> {
    filter_by_username_length(items, &addresses.usernames, 5)
}

fn anonymous_numbers_7(items: &[NftItem], addresses: &CategoryAddresses) -> Vec<NftItem> {
    filter_by_number_length(items, &addresses.anonymous_numbers, 7)
}

fn ton_dns_4(items: &[NftItem], addresses: &CategoryAddresses) -> Vec<NftItem> {
    filter_by_dns_length(items, &addresses.ton_dns, 4)
}

fn ton_dns_5(items: &[NftItem], addresses: &CategoryAddresses) -> Vec<NftItem> {
    filter_by_dns_length(items, &addresses.ton_dns, 5)
}

fn plush_pepes(items: &[NftItem], addresses: &CategoryAddresses) -> Vec<NftItem> {
    match addresses.fixed_collection(NftCategory::PlushPepes) {
        Some(collection) => filter_by_collection(items, collection),
        None => {
            log::warn!("No collection address configured for {}", NftCategory::PlushPepes);
            vec![]
        }
    }
}

fn in_collection(item: &NftItem, collection_address: &str) -> bool {
    item.collection_address.as_deref() == Some(collection_address)
}

/// Keeps usernames (leading `@` dropped) not longer than `max_length`.
pub fn filter_by_username_length(
    items: &[NftItem],
    collection_address: &str,
    max_length: usize,
) -> Vec<NftItem> {
    items
        .iter()
        .filter(|item| in_collection(item, collection_address))
        .filter(|item| match item.name.as_deref() {
            Some(name) if !name.is_empty() => name.chars().skip(1).count() <= max_length,
            _ => false,
        })
        .cloned()
        .collect()
}

/// Keeps anonymous numbers whose digits, without the leading country code
/// token, are not longer than `max_length`. `"+888 0123 4567"` has 8 digits.
pub fn filter_by_number_length(
    items: &[NftItem],
    collection_address: &str,
    max_length: usize,
) -> Vec<NftItem> {
    items
        .iter()
        .filter(|item| in_collection(item, collection_address))
        .filter(|item| match item.name.as_deref() {
            Some(name) => {
                let digits: String = name
                    .split(' ')
                    .filter(|token| !token.is_empty())
                    .skip(1)
                    .flat_map(|token| DIGIT_GROUPS.find_iter(token).map(|m| m.as_str()))
                    .collect();
                !digits.is_empty() && digits.len() <= max_length
            }
            None => false,
        })
        .cloned()
        .collect()
}

pub fn filter_by_dns_length(
    items: &[NftItem],
    collection_address: &str,
    max_length: usize,
) -> Vec<NftItem> {
    items
        .iter()
        .filter(|item| in_collection(item, collection_address))
        .filter(|item| match item.name.as_deref() {
            Some(name) => !name.is_empty() && name.chars().count() <= max_length,
            None => false,
        })
        .cloned()
        .collect()
}

pub fn filter_by_collection(items: &[NftItem], collection_address: &str) -> Vec<NftItem> {
    items
        .iter()
        .filter(|item| in_collection(item, collection_address))
        .cloned()
        .collect()
}

pub fn filter_for(category: NftCategory) -> Option<CategoryFilterFn> {
    CATEGORY_FILTERS
        .iter()
        .find(|(registered, _)| *registered == category)
        .map(|(_, filter)| *filter)
}

/// Narrows `items` to the named category. Unknown categories match nothing.
pub fn apply_category(category: &str, items: &[NftItem], addresses: &CategoryAddresses) -> Vec<NftItem> {
    let parsed = match category.parse::<NftCategory>() {
        Ok(parsed) => parsed,
        Err(_) => {
            log::warn!("Unknown NFT category {}, no items match", category);
            return vec![];
        }
    };

    match filter_for(parsed) {
        Some(filter) => filter(items, addresses),
        None => {
            log::warn!("No filter registered for NFT category {}", parsed);
            vec![]
        }
    }
}
