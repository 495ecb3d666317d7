use std::fs;
use std::path::PathBuf;

use affix_core::core_api::{
    AcquireOutcome, ContainerChange, CoreErrorCode, Engine, LootConfig, RuntimeConfig, Session,
    SuppressReason, effective_weight,
};
use affix_core::host::{
    ArmorForm, HostObject, IdentityResolver, MemoryHost, MiscForm, PlayerHoldings, WORLD_CONTAINER,
    WeaponForm,
};
use affix_core::slot::ItemType;
use affix_core::slots::InstanceAffixSlots;
use affix_core::store::RECENT_KEEP;
use affix_core::token::{make_affix_token, make_instance_key, split_instance_key};

const PLAYER: u32 = 0x14;
const CHEST: u32 = 0x0002_4E11;
const MERCHANT: u32 = 0x0003_0001;
const SWORD: u32 = 0x0001_2EB7;
const TEMPLATED_SWORD: u32 = 0x0001_2EB8;
const CUIRASS: u32 = 0x0001_3952;
const GOLD: u32 = 0x0000_000F;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn runtime_config() -> RuntimeConfig {
    let path = workspace_root().join("tests/fixtures/runtime_config.json");
    let text = fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read {:?}: {}", path, e));
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("failed to parse {:?}: {}", path, e))
}

fn host() -> MemoryHost {
    let mut host = MemoryHost::new(PLAYER);
    host.register(HostObject::Weapon(WeaponForm {
        form_id: SWORD,
        name: "Iron Sword".to_string(),
        playable: true,
        template: None,
    }));
    host.register(HostObject::Weapon(WeaponForm {
        form_id: TEMPLATED_SWORD,
        name: "Enchanted Iron Sword".to_string(),
        playable: false,
        template: Some(SWORD),
    }));
    host.register(HostObject::Armor(ArmorForm {
        form_id: CUIRASS,
        name: "Steel Cuirass".to_string(),
        playable: true,
        slot_mask: 0x4,
    }));
    host.register(HostObject::Misc(MiscForm {
        form_id: GOLD,
        name: "Gold".to_string(),
    }));
    host
}

fn session() -> Session {
    Engine::from_runtime_config(runtime_config()).open_session(PLAYER)
}

fn acquire(session: &mut Session, host: &MemoryHost, key: u64) -> AcquireOutcome {
    let (base, unique_id) = split_instance_key(key);
    session.on_container_changed(
        &ContainerChange {
            from: MERCHANT,
            to: PLAYER,
            base,
            count: 1,
            unique_id,
            ref_handle: 0,
        },
        host,
        host,
    )
}

fn assigned(outcome: AcquireOutcome) -> InstanceAffixSlots {
    match outcome {
        AcquireOutcome::Assigned { slots, .. } => slots,
        other => panic!("expected an assignment, got {:?}", other),
    }
}

#[test]
fn effective_weight_falls_back_only_when_unset() {
    assert_eq!(effective_weight(25.0, -1.0), 25.0);
    assert_eq!(effective_weight(0.0, 15.0), 15.0);
    assert_eq!(effective_weight(100.0, 0.0), 0.0);
}

#[test]
fn runtime_config_builds_catalog_and_pools() {
    let engine = Engine::from_runtime_config(runtime_config());
    let catalog = engine.catalog().expect("catalog should be loaded");

    assert_eq!(catalog.len(), 9);
    assert_eq!(catalog.recipes().len(), 1, "recipe with unknown result is dropped");
    assert!(catalog.is_runeword_result(make_affix_token("rw_enigma")));
    let enigma = catalog
        .recipe_by_token(make_affix_token("enigma"))
        .expect("enigma recipe");
    assert_eq!(enigma.result_affix_token, make_affix_token("rw_enigma"));
    assert!(catalog.recipe_by_token(make_affix_token("broken")).is_none());

    let arc = catalog.by_token(make_affix_token("arc_lightning")).unwrap();
    assert_eq!(arc.effective_weight, 10.0);
    let cursed = catalog.by_token(make_affix_token("cursed_echo")).unwrap();
    assert_eq!(cursed.effective_weight, 0.0);

    assert_eq!(engine.config().chance_percent, 100.0);
    assert!(engine.config().deterministic_rolls);
}

#[test]
fn acquisition_assigns_once_per_instance() {
    let mut host = host();
    let mut session = session();
    let key = host.give(SWORD);

    let slots = assigned(acquire(&mut session, &host, key));
    assert!(!slots.is_empty());
    assert!(slots.len() <= 3);
    assert_eq!(session.query(key), Some(slots));
    assert!(session.store().is_evaluated(key));
    for token in slots.iter() {
        assert!(session.store().runtime_state(key, token).is_some());
    }

    let again = acquire(&mut session, &host, key);
    assert_eq!(again, AcquireOutcome::AlreadyEvaluated { key });
    assert_eq!(session.query(key), Some(slots));
}

#[test]
fn weapon_rolls_only_draw_weapon_eligible_affixes() {
    let mut host = host();
    let mut session = session();
    let excluded = [
        make_affix_token("stone_skin"),
        make_affix_token("of_warding"),
        make_affix_token("cursed_echo"),
        make_affix_token("rw_enigma"),
    ];

    for _ in 0..64 {
        let key = host.give(SWORD);
        let slots = assigned(acquire(&mut session, &host, key));
        for token in slots.iter() {
            assert!(!excluded.contains(&token), "unexpected affix on weapon");
        }
        let speed = slots
            .iter()
            .filter(|&t| t == make_affix_token("of_haste") || t == make_affix_token("of_swiftness"))
            .count();
        assert!(speed <= 1, "two suffixes of the same family");
    }
}

#[test]
fn ineligible_objects_are_not_rolled() {
    let mut host = host();
    let mut session = session();

    let gold = host.give(GOLD);
    assert_eq!(acquire(&mut session, &host, gold), AcquireOutcome::Ineligible);
    assert!(!session.store().is_evaluated(gold));

    let outcome = session.on_acquire(SWORD, 1, 0, &host, &host);
    assert_eq!(outcome, AcquireOutcome::Ineligible);

    let templated = host.give(TEMPLATED_SWORD);
    assert!(matches!(
        acquire(&mut session, &host, templated),
        AcquireOutcome::Assigned { .. }
    ));
}

#[test]
fn zero_chance_ignores_acquisitions_without_marking() {
    let mut config = runtime_config();
    config.loot.chance_percent = 0.0;
    let mut session = Engine::from_runtime_config(config).open_session(PLAYER);
    let mut host = host();

    let key = host.give(SWORD);
    assert_eq!(acquire(&mut session, &host, key), AcquireOutcome::Ignored);
    assert!(!session.store().is_evaluated(key));
}

#[test]
fn session_without_catalog_is_unavailable() {
    let mut session = Engine::new(LootConfig::default()).open_session(PLAYER);
    let mut host = host();
    let key = host.give(SWORD);

    assert_eq!(acquire(&mut session, &host, key), AcquireOutcome::Unavailable);
    let err = session
        .preview(key, ItemType::Weapon, None)
        .expect_err("preview needs a catalog");
    assert_eq!(err.code, CoreErrorCode::ConfigUnavailable);

    let mut holdings = host.clone();
    let outcome = session.reforge(key, &host, &mut holdings);
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Reforge unavailable: runtime config not loaded.");
}

#[test]
fn dropped_and_repicked_reference_is_not_rerolled() {
    let mut host = host();
    let mut session = session();
    let key = host.give(SWORD);
    let (base, unique_id) = split_instance_key(key);
    let slots = assigned(acquire(&mut session, &host, key));

    let handle = host.drop_to_world(key).expect("held item can be dropped");
    let drop = ContainerChange {
        from: PLAYER,
        to: WORLD_CONTAINER,
        base,
        count: 1,
        unique_id,
        ref_handle: handle,
    };
    assert_eq!(session.on_container_changed(&drop, &host, &host), AcquireOutcome::Ignored);
    assert_eq!(session.guard().tracked(), 1);

    host.pick_up(handle).expect("handle is live");
    let pickup = ContainerChange {
        from: WORLD_CONTAINER,
        to: PLAYER,
        ref_handle: handle,
        ..drop
    };
    assert_eq!(
        session.on_container_changed(&pickup, &host, &host),
        AcquireOutcome::Suppressed {
            reason: SuppressReason::Redropped
        }
    );
    assert_eq!(session.guard().tracked(), 0);
    assert_eq!(session.query(key), Some(slots));

    // A second pickup of the same handle is no longer guarded.
    assert!(!session.on_pickup(PLAYER, 1, handle));
}

#[test]
fn stashed_items_are_not_rerolled_on_retrieval() {
    let mut host = host();
    let mut session = session();
    let key = host.give(CUIRASS);
    let (base, unique_id) = split_instance_key(key);
    assigned(acquire(&mut session, &host, key));

    assert!(host.stash(CHEST, key));
    let stash = ContainerChange {
        from: PLAYER,
        to: CHEST,
        base,
        count: 1,
        unique_id,
        ref_handle: 0,
    };
    assert_eq!(session.on_container_changed(&stash, &host, &host), AcquireOutcome::Ignored);
    assert_eq!(session.stash().stashed(CHEST, base), 1);

    host.retrieve(CHEST, base).expect("item is in the chest");
    let retrieve = ContainerChange {
        from: CHEST,
        to: PLAYER,
        ..stash
    };
    assert_eq!(
        session.on_container_changed(&retrieve, &host, &host),
        AcquireOutcome::Suppressed {
            reason: SuppressReason::Stashed
        }
    );
    assert!(session.stash().is_empty());
}

#[test]
fn destroyed_world_reference_is_pruned_after_deferral() {
    let mut host = host();
    let mut session = session();
    let key = host.give(SWORD);
    assigned(acquire(&mut session, &host, key));

    let handle = host.drop_to_world(key).unwrap();
    assert!(session.on_drop(PLAYER, WORLD_CONTAINER, 1, handle, key));
    host.destroy(handle);
    session.on_delete(handle);
    assert_eq!(session.pending_deletions(), 1);
    assert!(session.query(key).is_some(), "deletion is deferred");

    let pruned = session.process_deferred(&host);
    assert_eq!(pruned, vec![key]);
    assert_eq!(session.query(key), None);
    assert!(!session.store().is_evaluated(key));
    assert_eq!(session.pending_deletions(), 0);
}

#[test]
fn deferred_deletion_skips_instances_held_again() {
    let mut host = host();
    let mut session = session();
    let key = host.give(SWORD);
    let slots = assigned(acquire(&mut session, &host, key));

    let handle = host.drop_to_world(key).unwrap();
    assert!(session.on_drop(PLAYER, WORLD_CONTAINER, 1, handle, key));
    session.on_delete(handle);
    // The reference went back into the inventory before the queue drained.
    host.pick_up(handle).unwrap();

    assert!(session.process_deferred(&host).is_empty());
    assert_eq!(session.query(key), Some(slots));
}

#[test]
fn unique_id_change_moves_instance_state() {
    let mut host = host();
    let mut session = session();
    let old = host.give(SWORD);
    let slots = assigned(acquire(&mut session, &host, old));
    let (base, old_unique) = split_instance_key(old);

    let new = make_instance_key(base, 900);
    host.remove_held(old);
    host.insert_held(new);

    assert!(session.on_unique_id_changed(base, old_unique, base, 900, &host));
    assert_eq!(session.query(new), Some(slots));
    assert_eq!(session.query(old), None);
    assert!(session.store().is_evaluated(new));
    assert!(!session.store().is_evaluated(old));

    // Unknown keys and identical keys are rejected.
    assert!(!session.on_unique_id_changed(base, old_unique, base, 901, &host));
    assert!(!session.on_unique_id_changed(base, 900, base, 900, &host));
}

#[test]
fn reforge_consumes_resource_and_rerolls() {
    let mut host = host();
    let forms = host.clone();
    let mut session = session();
    let key = host.give(SWORD);
    let before = assigned(acquire(&mut session, &host, key));

    let outcome = session.reforge(key, &forms, &mut host);
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Reforge failed: no Reforge Orb.");

    host.grant_reforge_resource(1);
    let outcome = session.reforge(key, &forms, &mut host);
    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.message.starts_with("Reforged: "));
    assert!(outcome.message.ends_with("(Reforge Orb: 0)"));
    assert_eq!(host.reforge_resource_count(), 0);

    let after = session.query(key).expect("reforged slots are stored");
    assert_eq!(after.len(), before.len());
    for token in after.iter() {
        assert!(session.store().runtime_state(key, token).is_some());
    }
}

#[test]
fn reforge_messages_name_the_configured_resource() {
    let mut config = runtime_config();
    config.loot.reforge_resource = "Ember Shard".to_string();
    let mut session = Engine::from_runtime_config(config).open_session(PLAYER);
    let mut host = host();
    let forms = host.clone();
    let key = host.give(SWORD);
    assigned(acquire(&mut session, &host, key));

    let outcome = session.reforge(key, &forms, &mut host);
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Reforge failed: no Ember Shard.");

    host.grant_reforge_resource(2);
    let outcome = session.reforge(key, &forms, &mut host);
    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.message.ends_with("(Ember Shard: 1)"));

    let mut blank = runtime_config();
    blank.loot.reforge_resource = "  ".to_string();
    let session = Engine::from_runtime_config(blank).open_session(PLAYER);
    assert_eq!(session.config().reforge_resource, "Reforge Orb");
}

#[test]
fn reforge_rejects_missing_and_runeword_bases() {
    let mut host = host();
    let forms = host.clone();
    let mut session = session();
    host.grant_reforge_resource(5);

    let absent = make_instance_key(SWORD, 77);
    let outcome = session.reforge(absent, &forms, &mut host);
    assert_eq!(outcome.message, "Reforge failed: selected base is no longer available.");

    let key = host.give(SWORD);
    session
        .store_mut()
        .assign(key, InstanceAffixSlots::from_tokens([make_affix_token("rw_enigma")]));
    let outcome = session.reforge(key, &forms, &mut host);
    assert_eq!(outcome.message, "Reforge failed: completed runeword base.");

    let gold = host.give(GOLD);
    let outcome = session.reforge(gold, &forms, &mut host);
    assert_eq!(outcome.message, "Reforge failed: this item type is not eligible.");
    assert_eq!(host.reforge_resource_count(), 5);
}

#[test]
fn deterministic_roll_matches_preview() {
    let mut host = host();
    let mut session = session();

    for base in [SWORD, CUIRASS, SWORD, CUIRASS] {
        let key = host.give(base);
        let item_type = if base == SWORD { ItemType::Weapon } else { ItemType::Armor };
        let previewed = session.preview(key, item_type, None).unwrap();
        let rolled = assigned(acquire(&mut session, &host, key));
        assert_eq!(previewed, rolled);
    }

    let key = make_instance_key(SWORD, 4242);
    let a = session.preview(key, ItemType::Weapon, Some(0x1234)).unwrap();
    let b = session.preview(key, ItemType::Weapon, Some(0x1234)).unwrap();
    assert_eq!(a, b);

    let err = session.preview(0, ItemType::Weapon, None).unwrap_err();
    assert_eq!(err.code, CoreErrorCode::IneligibleItem);
}

#[test]
fn runtime_counters_advance_and_cycle() {
    let mut session = session();
    let key = make_instance_key(SWORD, 3);
    let arc = make_affix_token("arc_lightning");
    session
        .store_mut()
        .assign(key, InstanceAffixSlots::from_tokens([arc]));

    let first = session.advance_runtime_state(key, arc, 5, 2, 3).unwrap();
    assert_eq!((first.evolution_xp, first.mode_cycle_counter, first.mode_index), (5, 1, 0));
    let second = session.advance_runtime_state(key, arc, 5, 2, 3).unwrap();
    assert_eq!((second.evolution_xp, second.mode_cycle_counter, second.mode_index), (10, 0, 1));

    assert_eq!(session.cycle_mode(key, arc, -1, 3), Some(0));
    assert_eq!(session.cycle_mode(key, arc, -1, 3), Some(2));
    assert_eq!(session.cycle_mode(key, make_affix_token("of_haste"), 1, 3), None);
    assert!(session.advance_runtime_state(key, 99, 1, 1, 1).is_none());
}

#[test]
fn strip_unknown_affixes_removes_retired_tokens() {
    let mut session = session();
    let key = make_instance_key(CUIRASS, 8);
    let arc = make_affix_token("arc_lightning");
    let retired = make_affix_token("retired_affix");
    session
        .store_mut()
        .assign(key, InstanceAffixSlots::from_tokens([arc, retired]));
    assert!(session.store().runtime_state(key, retired).is_some());

    assert_eq!(session.strip_unknown_affixes().unwrap(), 1);
    assert_eq!(session.query(key).unwrap().tokens(), &[arc]);
    assert!(session.store().runtime_state(key, retired).is_none());
    assert_eq!(session.strip_unknown_affixes().unwrap(), 0);
}

#[test]
fn load_is_rejected_until_revert() {
    let mut host = host();
    let mut session = session();
    let key = host.give(SWORD);
    let slots = assigned(acquire(&mut session, &host, key));
    let bytes = session.on_save(&host);

    let mut restored = session_from_bytes(&bytes);
    assert_eq!(restored.query(key), Some(slots));

    let err = restored
        .on_load(&bytes, &IdentityResolver)
        .expect_err("second load must fail");
    assert_eq!(err.code, CoreErrorCode::UnsupportedOperation);

    restored.on_revert();
    assert_eq!(restored.query(key), None);
    restored.on_load(&bytes, &IdentityResolver).unwrap();
    assert_eq!(restored.query(key), Some(slots));
}

fn session_from_bytes(bytes: &[u8]) -> Session {
    Engine::from_runtime_config(runtime_config())
        .open_bytes(bytes, &IdentityResolver, PLAYER)
        .expect("stream should load")
}

#[test]
fn evaluated_set_is_bounded_but_keeps_recent_and_slotted_keys() {
    let mut session = session();
    let total = RECENT_KEEP as u16 + 10;
    let slotted = make_instance_key(SWORD, 1);
    session
        .store_mut()
        .assign(slotted, InstanceAffixSlots::from_tokens([make_affix_token("of_haste")]));
    for unique in 2..=total {
        session.store_mut().mark_evaluated(make_instance_key(SWORD, unique));
    }
    let held = make_instance_key(SWORD, 2);

    let dropped = session.store_mut().prune_evaluated(&[held]);
    assert_eq!(dropped, 8);
    assert!(session.store().is_evaluated(slotted));
    assert!(session.store().is_evaluated(held));
    assert!(!session.store().is_evaluated(make_instance_key(SWORD, 3)));
    assert!(session.store().is_evaluated(make_instance_key(SWORD, total)));
}

#[test]
fn teardown_reports_session_totals() {
    let mut host = host();
    let mut session = session();
    for _ in 0..3 {
        let key = host.give(SWORD);
        assigned(acquire(&mut session, &host, key));
    }
    session.on_delete(12345);

    let summary = session.teardown();
    assert_eq!(summary.instances, 3);
    assert_eq!(summary.evaluated, 3);
    assert_eq!(summary.pending_deletions, 1);
    assert!(summary.runtime_states >= 3);
}
