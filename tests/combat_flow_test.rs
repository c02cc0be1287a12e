//! End-to-end combat scenarios against a real SQLite store

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use campd::combat::{
    should_combat_end, CombatEngine, CombatOutcome, CombatantKind, Participant, UNCONSCIOUS,
};
use campd::db::Database;
use campd::session::{SessionStore, SqliteEventLog, SqliteSessionStore, StoreError};

struct Fixture {
    _db: Database,
    store: SqliteSessionStore,
    events: SqliteEventLog,
    engine: Arc<CombatEngine<SqliteSessionStore, SqliteEventLog>>,
    session_id: String,
}

async fn fixture() -> Fixture {
    let db = Database::new(None).await.expect("db");
    let store = SqliteSessionStore::new(db.pool().clone());
    let events = SqliteEventLog::new(db.pool().clone());
    let engine = Arc::new(CombatEngine::new(store.clone(), events.clone()));
    let session = store.create("goblin ambush").await.expect("session");

    Fixture {
        _db: db,
        store,
        events,
        engine,
        session_id: session.id,
    }
}

fn participant(id: &str, kind: CombatantKind, modifier: i32, hp: i32) -> Participant {
    Participant {
        id: id.to_string(),
        name: id.to_string(),
        kind,
        initiative_modifier: modifier,
        max_hp: hp,
        armor_class: 13,
    }
}

fn standard_party() -> Vec<Participant> {
    vec![
        participant("pc-1", CombatantKind::Player, 2, 10),
        participant("pc-2", CombatantKind::Player, 1, 12),
        participant("gob-1", CombatantKind::Monster, 3, 7),
    ]
}

#[tokio::test]
async fn test_full_combat_flow() {
    let fx = fixture().await;
    let mut rng = StdRng::seed_from_u64(42);

    // Start: two players and a goblin roll initiative
    let state = fx
        .engine
        .start_combat(&fx.session_id, &standard_party(), &mut rng)
        .await
        .expect("start");
    assert!(state.active);
    assert_eq!(state.round, 1);
    assert_eq!(state.turn_index, 0);

    let scores: Vec<i32> = state.initiative_order.iter().map(|e| e.initiative).collect();
    assert!(
        scores.windows(2).all(|w| w[0] >= w[1]),
        "initiative must be non-increasing: {:?}",
        scores
    );

    // Three advances traverse everyone and open round 2
    fx.engine.next_turn(&fx.session_id).await.expect("turn 1");
    fx.engine.next_turn(&fx.session_id).await.expect("turn 2");
    let state = fx.engine.next_turn(&fx.session_id).await.expect("turn 3");
    assert_eq!(state.round, 2);
    assert_eq!(state.turn_index, 0);

    // Massive damage downs a player
    let downed = fx
        .engine
        .apply_damage(&fx.session_id, "pc-1", 9999, Some("fire"))
        .await
        .expect("damage");
    assert_eq!(downed.current_hp, 0);
    assert!(!downed.is_active);
    assert!(downed.has_condition(UNCONSCIOUS));

    // Healing revives
    let revived = fx
        .engine
        .apply_healing(&fx.session_id, "pc-1", 6)
        .await
        .expect("heal");
    assert_eq!(revived.current_hp, 6);
    assert!(revived.is_active);
    assert!(!revived.has_condition(UNCONSCIOUS));

    // Dropping the goblin makes it a victory
    fx.engine
        .apply_damage(&fx.session_id, "gob-1", 50, Some("slashing"))
        .await
        .expect("damage");
    let session = fx.store.get(&fx.session_id).await.expect("get");
    let combat = session.combat.expect("combat present");
    assert_eq!(should_combat_end(&combat), CombatOutcome::Victory);

    fx.engine
        .end_combat(&fx.session_id, "victory", Some("goblin dispatched"))
        .await
        .expect("end");
    let session = fx.store.get(&fx.session_id).await.expect("get");
    assert!(session.combat.is_none());
}

#[tokio::test]
async fn test_event_log_tells_the_story() {
    let fx = fixture().await;
    let mut rng = StdRng::seed_from_u64(7);

    fx.engine
        .start_combat(&fx.session_id, &standard_party(), &mut rng)
        .await
        .expect("start");
    fx.engine.next_turn(&fx.session_id).await.expect("turn");
    fx.engine
        .end_combat(&fx.session_id, "fled", None)
        .await
        .expect("end");

    let events = fx.events.for_session(&fx.session_id).await.expect("events");
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec!["combat_start", "turn_start", "turn_end", "turn_start", "combat_end"]
    );

    // combat_start captures everyone who rolled in
    assert_eq!(events[0].payload["participants"].as_array().unwrap().len(), 3);
    // the closing event carries the final round
    assert_eq!(events[4].payload["final_round"], 1);
    assert_eq!(events[4].payload["outcome"], "fled");
}

#[tokio::test]
async fn test_new_round_flag_on_wrap() {
    let fx = fixture().await;
    let mut rng = StdRng::seed_from_u64(11);

    fx.engine
        .start_combat(&fx.session_id, &standard_party(), &mut rng)
        .await
        .expect("start");
    for _ in 0..3 {
        fx.engine.next_turn(&fx.session_id).await.expect("turn");
    }

    let events = fx.events.for_session(&fx.session_id).await.expect("events");
    let last = events.last().unwrap();
    assert_eq!(last.event_type, "turn_start");
    assert_eq!(last.payload["round"], 2);
    assert_eq!(last.payload["new_round"], true);

    // earlier turn_starts in round 1 omit the flag
    let first_turn = &events[1];
    assert_eq!(first_turn.event_type, "turn_start");
    assert!(first_turn.payload.get("new_round").is_none());
}

#[tokio::test]
async fn test_stale_writer_loses_the_race() {
    let fx = fixture().await;
    let mut rng = StdRng::seed_from_u64(13);

    fx.engine
        .start_combat(&fx.session_id, &standard_party(), &mut rng)
        .await
        .expect("start");

    // Both writers read the same version
    let snapshot = fx.store.get(&fx.session_id).await.expect("get");
    let stale_version = snapshot.version;
    let state = snapshot.combat.expect("combat");

    // Writer A commits through the engine
    fx.engine
        .apply_damage(&fx.session_id, "gob-1", 3, None)
        .await
        .expect("damage");

    // Writer B's compare-and-swap must fail
    let err = fx
        .store
        .update_combat(&fx.session_id, Some(&state), stale_version)
        .await
        .expect_err("stale write must conflict");
    assert!(matches!(err, StoreError::VersionConflict { .. }));

    // Writer A's damage survives
    let session = fx.store.get(&fx.session_id).await.expect("get");
    let combat = session.combat.expect("combat");
    assert_eq!(combat.combatant("gob-1").unwrap().current_hp, 4);
}

#[tokio::test]
async fn test_add_combatant_keeps_current_turn() {
    let fx = fixture().await;
    let mut rng = StdRng::seed_from_u64(17);

    let state = fx
        .engine
        .start_combat(&fx.session_id, &standard_party(), &mut rng)
        .await
        .expect("start");
    let state = fx.engine.next_turn(&fx.session_id).await.expect("turn");
    let acting = state.current_entry().expect("current").id.clone();

    let newcomer = participant("gob-2", CombatantKind::Monster, 5, 7);
    let state = fx
        .engine
        .add_combatant(&fx.session_id, &newcomer, &mut rng)
        .await
        .expect("add");

    assert_eq!(state.initiative_order.len(), 4);
    let scores: Vec<i32> = state.initiative_order.iter().map(|e| e.initiative).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    // whoever was acting still is
    assert_eq!(state.current_entry().expect("current").id, acting);
}

#[tokio::test]
async fn test_conditions_and_effects_through_engine() {
    let fx = fixture().await;
    let mut rng = StdRng::seed_from_u64(19);

    fx.engine
        .start_combat(&fx.session_id, &standard_party(), &mut rng)
        .await
        .expect("start");

    let combatant = fx
        .engine
        .add_condition(
            &fx.session_id,
            "pc-2",
            campd::combat::Condition::lasting("poisoned", 2),
        )
        .await
        .expect("condition");
    assert!(combatant.has_condition("poisoned"));

    let combatant = fx
        .engine
        .add_effect(
            &fx.session_id,
            "pc-2",
            campd::combat::ActiveEffect {
                name: "bless".to_string(),
                duration: 3,
            },
        )
        .await
        .expect("effect");
    assert_eq!(combatant.effects.len(), 1);

    let combatant = fx
        .engine
        .remove_condition(&fx.session_id, "pc-2", "poisoned")
        .await
        .expect("remove");
    assert!(!combatant.has_condition("poisoned"));
}

#[tokio::test]
async fn test_combat_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("campd.db");
    let path = path.to_str().expect("utf8 path");

    let session_id = {
        let db = Database::new(Some(path)).await.expect("db");
        let store = SqliteSessionStore::new(db.pool().clone());
        let events = SqliteEventLog::new(db.pool().clone());
        let engine = CombatEngine::new(store.clone(), events);
        let session = store.create("long campaign").await.expect("session");

        let mut rng = StdRng::seed_from_u64(23);
        engine
            .start_combat(&session.id, &standard_party(), &mut rng)
            .await
            .expect("start");
        engine.next_turn(&session.id).await.expect("turn");
        session.id
    };

    // Reopen the same file and pick up where we left off
    let db = Database::new(Some(path)).await.expect("reopen");
    let store = SqliteSessionStore::new(db.pool().clone());
    let session = store.get(&session_id).await.expect("get");
    let combat = session.combat.expect("combat survived");
    assert!(combat.active);
    assert_eq!(combat.turn_index, 1);
    assert_eq!(combat.combatants.len(), 3);

    let events = SqliteEventLog::new(db.pool().clone());
    let stored = events.for_session(&session_id).await.expect("events");
    assert!(stored.len() >= 3);
}

#[tokio::test]
async fn test_start_requires_inactive_combat() {
    let fx = fixture().await;
    let mut rng = StdRng::seed_from_u64(29);

    fx.engine
        .start_combat(&fx.session_id, &standard_party(), &mut rng)
        .await
        .expect("start");
    let err = fx
        .engine
        .start_combat(&fx.session_id, &standard_party(), &mut rng)
        .await
        .expect_err("double start");
    assert!(matches!(
        err,
        campd::combat::CombatError::CombatAlreadyActive
    ));

    // but a fresh start works after ending
    fx.engine
        .end_combat(&fx.session_id, "fled", None)
        .await
        .expect("end");
    fx.engine
        .start_combat(&fx.session_id, &standard_party(), &mut rng)
        .await
        .expect("restart");
}
