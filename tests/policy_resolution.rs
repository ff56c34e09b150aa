//! End-to-end policy gating through the resolver and the database.

mod common;

use chrono::Utc;

use fedgate::error::AppError;
use fedgate::policy::{KVMatcher, Policy, PolicyResolver, UnaryMatcher, ValueMatcher};

use common::{fixed_clock, test_db};

const ALICE: &str = "https://local.example/users/alice";
const BOB: &str = "https://local.example/users/bob";
const BAD_ACTOR: &str = "https://bad.example/actors/3";
const GOOD_ACTOR: &str = "https://good.example/actors/9";

fn matcher(path: &str, value: ValueMatcher) -> KVMatcher {
    KVMatcher {
        key_path_query: path.to_string(),
        value_matcher: UnaryMatcher::Value(value),
    }
}

#[tokio::test]
async fn instance_policy_blocks_listed_actor_for_everyone() {
    let (db, _dir) = test_db().await;
    let policy = Policy::new(
        None,
        "instance-actor-block",
        "blocks one known bad actor",
        vec![matcher("actor", ValueMatcher::EqualsString(BAD_ACTOR.to_string()))],
        Utc::now(),
    );
    db.insert_policy(&policy).await.unwrap();

    let resolver = PolicyResolver::new(db.clone(), fixed_clock());

    let blocked = resolver
        .is_blocked(
            ALICE,
            &[BAD_ACTOR.to_string()],
            "https://bad.example/activities/1",
            "Create",
        )
        .await
        .unwrap();
    assert!(blocked);

    let blocked = resolver
        .is_blocked(
            BOB,
            &[BAD_ACTOR.to_string()],
            "https://bad.example/activities/2",
            "Create",
        )
        .await
        .unwrap();
    assert!(blocked, "instance policies apply to every local actor");

    let allowed = resolver
        .is_blocked(
            ALICE,
            &[GOOD_ACTOR.to_string()],
            "https://good.example/activities/1",
            "Create",
        )
        .await
        .unwrap();
    assert!(!allowed);
}

#[tokio::test]
async fn actor_policy_gates_only_its_owner() {
    let (db, _dir) = test_db().await;
    let policy = Policy::new(
        Some(ALICE.to_string()),
        "no-announces",
        "",
        vec![matcher("type", ValueMatcher::EqualsString("Announce".to_string()))],
        Utc::now(),
    );
    db.insert_policy(&policy).await.unwrap();

    let resolver = PolicyResolver::new(db.clone(), fixed_clock());
    let activity = "https://good.example/activities/5";

    assert!(
        resolver
            .is_blocked(ALICE, &[GOOD_ACTOR.to_string()], activity, "Announce")
            .await
            .unwrap()
    );
    assert!(
        !resolver
            .is_blocked(BOB, &[GOOD_ACTOR.to_string()], activity, "Announce")
            .await
            .unwrap()
    );
    assert!(
        !resolver
            .is_blocked(ALICE, &[GOOD_ACTOR.to_string()], activity, "Create")
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn domain_block_via_contains_string() {
    let (db, _dir) = test_db().await;
    let policy = Policy::new(
        None,
        "domain-block",
        "blocks a whole instance",
        vec![matcher(
            "actor",
            ValueMatcher::ContainsString("//bad.example/".to_string()),
        )],
        Utc::now(),
    );
    db.insert_policy(&policy).await.unwrap();

    let resolver = PolicyResolver::new(db.clone(), fixed_clock());

    // Any actor in the list from the blocked domain denies the interaction.
    assert!(
        resolver
            .is_blocked(
                ALICE,
                &[GOOD_ACTOR.to_string(), BAD_ACTOR.to_string()],
                "https://bad.example/activities/7",
                "Follow",
            )
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn every_evaluated_policy_persists_a_resolution() {
    let (db, _dir) = test_db().await;
    let instance_policy = Policy::new(
        None,
        "instance-block",
        "",
        vec![matcher("actor", ValueMatcher::EqualsString(BAD_ACTOR.to_string()))],
        Utc::now(),
    );
    let actor_policy = Policy::new(
        Some(ALICE.to_string()),
        "no-announces",
        "",
        vec![matcher("type", ValueMatcher::EqualsString("Announce".to_string()))],
        Utc::now(),
    );
    db.insert_policy(&instance_policy).await.unwrap();
    db.insert_policy(&actor_policy).await.unwrap();

    let resolver = PolicyResolver::new(db.clone(), fixed_clock());
    let activity = "https://good.example/activities/8";

    let blocked = resolver
        .is_blocked(ALICE, &[GOOD_ACTOR.to_string()], activity, "Create")
        .await
        .unwrap();
    assert!(!blocked);

    // Both policies were evaluated and audited even though neither matched.
    let instance_resolutions = db
        .get_resolutions_for_policy(&instance_policy.id, 10)
        .await
        .unwrap();
    assert_eq!(instance_resolutions.len(), 1);
    assert!(!instance_resolutions[0].matched);
    assert!(!instance_resolutions[0].match_log.is_empty());

    let actor_resolutions = db
        .get_resolutions_for_policy(&actor_policy.id, 10)
        .await
        .unwrap();
    assert_eq!(actor_resolutions.len(), 1);

    let by_activity = db.get_resolutions_for_activity(activity).await.unwrap();
    assert_eq!(by_activity.len(), 2);
}

#[tokio::test]
async fn evaluation_errors_fail_closed_but_still_audit() {
    let (db, _dir) = test_db().await;
    // "actor.first": a non-numeric segment against an array errors at
    // evaluation time, which static validation cannot catch.
    let broken = Policy::new(
        None,
        "broken-path",
        "",
        vec![matcher("actor.first", ValueMatcher::EqualsString("x".to_string()))],
        Utc::now(),
    );
    let healthy = Policy::new(
        None,
        "healthy-block",
        "",
        vec![matcher("actor", ValueMatcher::EqualsString(BAD_ACTOR.to_string()))],
        Utc::now(),
    );
    db.insert_policy(&broken).await.unwrap();
    db.insert_policy(&healthy).await.unwrap();

    let resolver = PolicyResolver::new(db.clone(), fixed_clock());
    let activity = "https://bad.example/activities/9";

    let result = resolver
        .is_blocked(ALICE, &[BAD_ACTOR.to_string()], activity, "Create")
        .await;
    match result {
        Err(AppError::Evaluation(msg)) => assert!(msg.contains("broken-path")),
        other => panic!("expected evaluation error, got: {other:?}"),
    }

    // The healthy policy still ran and both audits were written.
    let by_activity = db.get_resolutions_for_activity(activity).await.unwrap();
    assert_eq!(by_activity.len(), 2);
    assert!(by_activity.iter().any(|r| r.matched));
}

#[tokio::test]
async fn empty_matcher_admits_activities_without_the_field() {
    let (db, _dir) = test_db().await;
    // Block activities that carry no actor at all.
    let policy = Policy::new(
        None,
        "require-actor",
        "",
        vec![KVMatcher {
            key_path_query: "actor".to_string(),
            value_matcher: UnaryMatcher::Empty(true),
        }],
        Utc::now(),
    );
    db.insert_policy(&policy).await.unwrap();

    let resolver = PolicyResolver::new(db.clone(), fixed_clock());

    assert!(
        resolver
            .is_blocked(ALICE, &[], "https://x.example/a/1", "Create")
            .await
            .unwrap()
    );
    assert!(
        !resolver
            .is_blocked(ALICE, &[GOOD_ACTOR.to_string()], "https://x.example/a/2", "Create")
            .await
            .unwrap()
    );
}
