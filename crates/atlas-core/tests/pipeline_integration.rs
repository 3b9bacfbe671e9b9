//! A full chapter -> fact -> alias -> hierarchy run over fixture text,
//! using the mock gateway instead of a real provider.

use atlas_budget::{compute_budget, ProviderFamily};
use atlas_core::alias_resolver;
use atlas_core::config::GenreHint;
use atlas_core::extractor;
use atlas_core::hierarchy_consolidator;
use atlas_core::map_layout;
use atlas_core::model::{EntityDictionary, WorldStructure};
use atlas_core::validator;
use atlas_core::world_structure;
use atlas_testing::MockGateway;
use std::collections::HashMap;

const CHAPTER_ONE_RESPONSE: &str = r#"{
    "characters": [
        {"name": "孙悟空", "aliases": [], "new_aliases": ["美猴王"], "locations_in_chapter": ["花果山"], "abilities": [], "appearances": []}
    ],
    "locations": [
        {"name": "花果山", "loc_type": "mountain", "parent": "东胜神州", "role": "setting", "tier": null, "description": "猴王出生之地"}
    ],
    "spatial_relationships": [],
    "character_relations": [],
    "item_events": [],
    "org_events": [],
    "events": [],
    "new_concepts": []
}"#;

const CHAPTER_TWO_RESPONSE: &str = r#"{
    "characters": [
        {"name": "美猴王", "aliases": ["孙悟空"], "new_aliases": [], "locations_in_chapter": ["水帘洞"], "abilities": [], "appearances": []}
    ],
    "locations": [
        {"name": "水帘洞", "loc_type": "cave", "parent": "花果山", "role": "setting", "tier": null, "description": "猴群居所"}
    ],
    "spatial_relationships": [],
    "character_relations": [],
    "item_events": [],
    "org_events": [],
    "events": [],
    "new_concepts": []
}"#;

#[tokio::test]
async fn extraction_feeds_alias_resolution_and_hierarchy_consolidation() {
    let chapter_one_text = "花果山上，一只石猴破石而出，众猴尊其为美猴王。".to_string();
    let chapter_two_text = "美猴王在水帘洞中安顿猴群，自此以此洞为家。".to_string();

    let responses = HashMap::from([(1u32, CHAPTER_ONE_RESPONSE), (2u32, CHAPTER_TWO_RESPONSE)]);

    let dictionary = EntityDictionary::default();
    let budget = compute_budget(128_000, true, ProviderFamily::OpenAi);

    let mut facts = Vec::new();
    for (chapter_num, text) in [(1, &chapter_one_text), (2, &chapter_two_text)] {
        let responses = responses.clone();
        let gateway = MockGateway::new().with_handler(move |_messages: &[atlas_core::gateway::Message]| responses[&chapter_num].to_string());

        let mut fact = extractor::extract(&gateway, text, chapter_num, "", "extract entities", &[], &budget).await;
        assert!(fact.extraction_meta.error_type.is_none(), "chapter {chapter_num} failed to parse");

        validator::validate(&mut fact, &dictionary);
        facts.push(fact);
    }

    assert_eq!(facts.len(), 2);
    assert_eq!(facts[0].characters.len(), 1);
    assert_eq!(facts[1].locations[0].name, "水帘洞");

    let alias_map = alias_resolver::build(&dictionary, &facts);
    assert_eq!(alias_map.canonical_of("美猴王"), "孙悟空");
    assert_eq!(alias_map.canonical_of("孙悟空"), "孙悟空");

    let mut world = WorldStructure::new("天地");
    for fact in &facts {
        world_structure::accumulate_chapter_votes(&mut world.parent_votes, fact);
    }
    let resolved = world_structure::resolve_parents(&world.parent_votes);
    assert_eq!(resolved.get("花果山").map(String::as_str), Some("东胜神州"));
    assert_eq!(resolved.get("水帘洞").map(String::as_str), Some("花果山"));
    world_structure::apply_resolution(&mut world, resolved);

    hierarchy_consolidator::consolidate(&mut world, &[], &HashMap::new());

    assert!(world.location_parents.parent_of("花果山").is_some());
    assert!(world.location_parents.parent_of("水帘洞").is_some());

    let (layout, strategy) = map_layout::get_map_layout(&facts, 1, 2, None, &world, &HashMap::new(), 20.0, 1600, 900);
    assert_eq!(strategy, map_layout::MapLayoutStrategy::Hierarchy);
    assert!(layout.contains("花果山"));
    assert!(layout.contains("水帘洞"));

    let rebuild_gateway = MockGateway::new();
    let mut stages = Vec::new();
    let outcome = hierarchy_consolidator::rebuild_hierarchy(
        &rebuild_gateway,
        &mut world,
        &facts,
        "西游记",
        "神话",
        GenreHint::Fantasy,
        None,
        None,
        &HashMap::new(),
        |stage| stages.push(stage),
    )
    .await
    .unwrap();

    assert_eq!(stages.len(), 7, "rebuild_hierarchy must report every stage checkpoint");
    assert!(world.location_parents.parent_of("花果山").is_some());
    assert!(world.location_parents.parent_of("水帘洞").is_some());
    let _ = outcome.diff;
}
