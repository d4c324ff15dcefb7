// src/ingest/mapper.rs
//! Raw listing items → canonical [`AssetRecord`]s, with rule-based exclusion.
//! Pure and deterministic; no I/O.

use metrics::counter;
use std::collections::BTreeMap;

use crate::ingest::filters::FilterSet;
use crate::ingest::types::{AssetRecord, RawItem};

#[derive(Debug, Clone)]
pub struct AssetMapper {
    icon_base_url: String,
    filters: FilterSet,
}

/// Records that survived filtering plus a per-rule tally of the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedPage {
    pub kept: Vec<AssetRecord>,
    pub filtered: BTreeMap<String, usize>,
}

impl MappedPage {
    pub fn filtered_count(&self) -> usize {
        self.filtered.values().sum()
    }
}

impl AssetMapper {
    pub fn new(icon_base_url: impl Into<String>, filters: FilterSet) -> Self {
        Self {
            icon_base_url: icon_base_url.into(),
            filters,
        }
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn map_and_filter(&self, items: &[RawItem]) -> Vec<AssetRecord> {
        self.map_and_filter_counted(items).kept
    }

    pub fn map_and_filter_counted(&self, items: &[RawItem]) -> MappedPage {
        let mapped = self.map_items(items);
        let before = mapped.len();
        let page = self.filter_records(mapped);

        let removed = page.filtered_count();
        if removed > 0 {
            tracing::debug!(
                target: "ingest",
                filtered = removed,
                total = before,
                "filtered {:.1}% of page",
                removed as f64 * 100.0 / before as f64
            );
        }
        page
    }

    pub fn map_items(&self, items: &[RawItem]) -> Vec<AssetRecord> {
        items.iter().map(|it| self.map_item(it)).collect()
    }

    pub fn map_item(&self, item: &RawItem) -> AssetRecord {
        let desc = item.asset_description.as_ref();
        let name = desc
            .and_then(|d| non_empty(d.market_hash_name.as_deref()))
            .or_else(|| desc.and_then(|d| non_empty(d.name.as_deref())))
            .unwrap_or(item.name.as_str())
            .to_string();

        let icon_url = desc
            .and_then(|d| non_empty(d.icon_url.as_deref()))
            .map(|path| format!("{}{}", self.icon_base_url, path));

        AssetRecord {
            name,
            icon_url,
            current_price: parse_price(item.sell_price_text.as_deref()),
        }
    }

    pub fn filter_records(&self, records: Vec<AssetRecord>) -> MappedPage {
        let mut page = MappedPage {
            kept: Vec::with_capacity(records.len()),
            filtered: BTreeMap::new(),
        };
        for rec in records {
            match self.filters.matching_rule(&rec.name) {
                Some(rule) => {
                    tracing::trace!(target: "ingest", name = %rec.name, rule = %rule.id, "filtered");
                    counter!("ingest_filtered_total", "rule" => rule.id.clone()).increment(1);
                    *page.filtered.entry(rule.id.clone()).or_insert(0) += 1;
                }
                None => page.kept.push(rec),
            }
        }
        page
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.is_empty())
}

/// Parse a human-readable price ("$1,234.56 USD", "0,03€") into a number.
///
/// Keeps only digits, `.` and `,`, turns the first `,` into `.`, then reads
/// the longest leading decimal. Missing or unparsable text yields `None`.
pub fn parse_price(text: Option<&str>) -> Option<f64> {
    let text = text.filter(|t| !t.is_empty())?;
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    leading_decimal(&cleaned.replacen(',', ".", 1))
}

fn leading_decimal(s: &str) -> Option<f64> {
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;
    for (i, c) in s.char_indices() {
        match c {
            '0'..='9' => {
                seen_digit = true;
                end = i + 1;
            }
            '.' if !seen_dot => {
                seen_dot = true;
                end = i + 1;
            }
            _ => break,
        }
    }
    if !seen_digit {
        return None;
    }
    s[..end].parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::config::default_filters;
    use crate::ingest::types::RawAssetDescription;

    fn mapper() -> AssetMapper {
        AssetMapper::new(
            "https://cdn.test/img/",
            FilterSet::compile(&default_filters()).unwrap(),
        )
    }

    #[test]
    fn price_parsing_variants() {
        assert_eq!(parse_price(Some("$0.03")), Some(0.03));
        assert_eq!(parse_price(Some("0,03€")), Some(0.03));
        assert_eq!(parse_price(Some("$1,234.56 USD")), Some(1.234));
        assert_eq!(parse_price(Some("$0.00")), Some(0.0));
        assert_eq!(parse_price(Some("free")), None);
        assert_eq!(parse_price(Some("")), None);
        assert_eq!(parse_price(None), None);
    }

    #[test]
    fn name_prefers_market_hash_name_then_description_then_item() {
        let m = mapper();
        let mut it = RawItem::named("Plain");
        assert_eq!(m.map_item(&it).name, "Plain");

        it.asset_description = Some(RawAssetDescription {
            market_hash_name: Some(String::new()),
            icon_url: None,
            name: Some("Described".into()),
        });
        assert_eq!(m.map_item(&it).name, "Described");

        it.asset_description.as_mut().unwrap().market_hash_name = Some("Hashed".into());
        assert_eq!(m.map_item(&it).name, "Hashed");
    }

    #[test]
    fn icon_url_is_joined_with_base() {
        let it = RawItem {
            name: "Case".into(),
            asset_description: Some(RawAssetDescription {
                market_hash_name: None,
                icon_url: Some("abc123".into()),
                name: None,
            }),
            ..Default::default()
        };
        assert_eq!(
            mapper().map_item(&it).icon_url.as_deref(),
            Some("https://cdn.test/img/abc123")
        );
        assert_eq!(mapper().map_item(&RawItem::named("x")).icon_url, None);
    }

    #[test]
    fn counted_mapping_tallies_rules() {
        let items = vec![
            RawItem::named("Sticker Slab | Foo (Holo)"),
            RawItem::named("Sticker | Foo (Holo)").with_price_text("$1.00"),
        ];
        let page = mapper().map_and_filter_counted(&items);
        assert_eq!(page.kept.len(), 1);
        assert_eq!(page.kept[0].current_price, Some(1.0));
        assert_eq!(page.filtered.get("sticker-slab-charms"), Some(&1));
    }
}
