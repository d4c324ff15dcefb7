// tests/ingest_mapper.rs
use market_asset_sync::ingest::config::{default_filters, SyncConfig};
use market_asset_sync::ingest::filters::{FilterRule, FilterSet};
use market_asset_sync::ingest::mapper::AssetMapper;
use market_asset_sync::ingest::types::{RawAssetDescription, RawItem};

fn mapper_with(rules: &[FilterRule]) -> AssetMapper {
    AssetMapper::new(
        SyncConfig::default().source.icon_base_url,
        FilterSet::compile(rules).expect("rules compile"),
    )
}

#[test]
fn missing_price_text_maps_to_none_not_zero() {
    let m = mapper_with(&default_filters());
    let out = m.map_and_filter(&[RawItem::named("Chroma 2 Case")]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].current_price, None);

    let out = m.map_and_filter(&[RawItem::named("Chroma 2 Case").with_price_text("$0.00")]);
    assert_eq!(out[0].current_price, Some(0.0));
}

#[test]
fn sticker_slab_is_filtered_and_attributed() {
    let m = mapper_with(&default_filters());
    let items = vec![
        RawItem::named("Sticker Slab | Foo (Holo)"),
        RawItem::named("Sticker | Foo (Holo)"),
    ];
    let page = m.map_and_filter_counted(&items);
    assert_eq!(page.kept.len(), 1);
    assert_eq!(page.kept[0].name, "Sticker | Foo (Holo)");
    assert_eq!(page.filtered.get("sticker-slab-charms"), Some(&1));

    let stats = m
        .filters()
        .statistics(items.iter().map(|i| i.name.as_str()));
    assert_eq!(stats.filter_breakdown.get("sticker-slab-charms"), Some(&1));
    assert_eq!(stats.passed, 1);
}

#[test]
fn filter_applies_to_resolved_name_only() {
    // Item name looks harmless; the structured name is what gets matched.
    let item = RawItem {
        name: "Foo".into(),
        asset_description: Some(RawAssetDescription {
            market_hash_name: Some("Sticker Slab | Foo".into()),
            icon_url: Some("sticker-slab-icon".into()),
            name: None,
        }),
        sell_price: Some(3),
        sell_price_text: Some("$0.03".into()),
    };
    let m = mapper_with(&default_filters());
    assert!(m.map_and_filter(&[item]).is_empty());
}

#[test]
fn unmatched_names_always_pass() {
    let rules = vec![
        FilterRule {
            id: "souvenir".into(),
            description: String::new(),
            pattern: "^souvenir ".into(),
            reason: String::new(),
        },
        FilterRule {
            id: "graffiti".into(),
            description: String::new(),
            pattern: r"^Sealed Graffiti \|".into(),
            reason: String::new(),
        },
    ];
    let m = mapper_with(&rules);
    let names = ["Souvenir AK-47", "Sealed Graffiti | X", "Dreams & Nightmares Case", "Patch | Y"];
    let items: Vec<_> = names.iter().map(|n| RawItem::named(*n)).collect();
    let page = m.map_and_filter_counted(&items);

    let kept: Vec<_> = page.kept.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(kept, ["Dreams & Nightmares Case", "Patch | Y"]);
    assert_eq!(page.filtered.get("souvenir"), Some(&1));
    assert_eq!(page.filtered.get("graffiti"), Some(&1));
}
