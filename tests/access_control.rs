//! End-to-end behavior of the access engine through its public API.

use chrono::{DateTime, TimeZone, Utc};
use keywarden::{
    AccessConfig, AccessEngine, KeySpec, KeywardenError, MockClock, RedeemOutcome, RejectReason,
    Role, UserId,
};
use std::sync::{Arc, Barrier};
use std::time::Duration;

const OWNER: UserId = UserId::new(1);
const ADMIN: UserId = UserId::new(2);
const U: UserId = UserId::new(100);
const V: UserId = UserId::new(101);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

fn setup(config: AccessConfig) -> (Arc<AccessEngine>, Arc<MockClock>) {
    let clock = Arc::new(MockClock::new(t0()));
    let engine = AccessEngine::with_clock(config, clock.clone()).unwrap();
    engine.set_role(OWNER, ADMIN, Role::Admin).unwrap();
    (Arc::new(engine), clock)
}

#[test]
fn single_use_key_scenario() {
    let (engine, clock) = setup(AccessConfig::new(OWNER));
    let session = chrono::Duration::hours(1);

    let key = engine
        .issue_key(
            ADMIN,
            KeySpec {
                ttl: Some(chrono::Duration::seconds(3600)),
                max_uses: 1,
                max_attempts: None,
            },
        )
        .unwrap();

    assert_eq!(
        engine.redeem_key(U, &key.code),
        RedeemOutcome::Granted {
            expires_at: Some(t0() + session)
        }
    );

    clock.set(t0() + chrono::Duration::seconds(1));
    assert!(engine.check_access(U));

    assert_eq!(
        engine.redeem_key(V, &key.code),
        RedeemOutcome::Rejected(RejectReason::Exhausted)
    );

    clock.set(t0() + session + chrono::Duration::seconds(1));
    assert!(!engine.check_access(U));
}

#[test]
fn concurrent_redemptions_never_exceed_max_uses() {
    let (engine, _clock) = setup(AccessConfig::new(OWNER));
    let n = 10u32;
    let key = engine
        .issue_key(
            ADMIN,
            KeySpec {
                ttl: Some(chrono::Duration::hours(1)),
                max_uses: n,
                max_attempts: None,
            },
        )
        .unwrap();

    let outcomes: Vec<RedeemOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..(n + 5))
            .map(|i| {
                let engine = &engine;
                let code = key.code.as_str();
                scope.spawn(move || engine.redeem_key(UserId::new(1000 + u64::from(i)), code))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let granted = outcomes.iter().filter(|o| o.is_granted()).count();
    let exhausted = outcomes
        .iter()
        .filter(|o| **o == RedeemOutcome::Rejected(RejectReason::Exhausted))
        .count();
    assert_eq!(granted, n as usize);
    assert_eq!(exhausted, 5);
    assert_eq!(engine.list_authorized().len(), n as usize + 2);
}

#[test]
fn concurrent_guesses_never_exceed_lockout_threshold() {
    let mut config = AccessConfig::new(OWNER);
    config.max_failed_attempts = 5;
    let (engine, _clock) = setup(config);
    let key = engine.issue_default_key(ADMIN).unwrap();

    let threads = 128;
    let barrier = Barrier::new(threads);
    let outcomes: Vec<RedeemOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let engine = &engine;
                let barrier = &barrier;
                let guess = format!("guess-{i}");
                scope.spawn(move || {
                    barrier.wait();
                    engine.redeem_key(U, &guess)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let evaluated = outcomes
        .iter()
        .filter(|o| matches!(o, RedeemOutcome::Rejected(_)))
        .count();
    assert_eq!(evaluated, 5);
    assert!(outcomes
        .iter()
        .all(|o| !matches!(o, RedeemOutcome::Granted { .. })));

    // The valid key is still refused and still unused
    assert!(matches!(
        engine.redeem_key(U, &key.code),
        RedeemOutcome::LockedOut { .. }
    ));
    assert!(engine.redeem_key(V, &key.code).is_granted());
}

#[test]
fn expired_key_is_never_consumable() {
    let (engine, clock) = setup(AccessConfig::new(OWNER));
    let key = engine
        .issue_key(
            ADMIN,
            KeySpec {
                ttl: Some(chrono::Duration::minutes(10)),
                max_uses: 5,
                max_attempts: None,
            },
        )
        .unwrap();

    clock.set(t0() + chrono::Duration::minutes(11));
    assert_eq!(
        engine.redeem_key(U, &key.code),
        RedeemOutcome::Rejected(RejectReason::Expired)
    );

    clock.set(t0());
    assert_eq!(
        engine.redeem_key(V, &key.code),
        RedeemOutcome::Rejected(RejectReason::Expired)
    );
}

#[test]
fn lockout_then_recovery() {
    let mut config = AccessConfig::new(OWNER);
    config.max_failed_attempts = 3;
    config.lockout_duration = Duration::from_secs(600);
    let (engine, clock) = setup(config);

    let key = engine.issue_default_key(ADMIN).unwrap();

    for guess in ["aaaa", "bbbb", "cccc"] {
        assert_eq!(
            engine.redeem_key(U, guess),
            RedeemOutcome::Rejected(RejectReason::NotFound)
        );
    }

    let until = t0() + chrono::Duration::minutes(10);
    assert_eq!(
        engine.redeem_key(U, &key.code),
        RedeemOutcome::LockedOut { until }
    );

    // Still inside the window, even with a valid key
    clock.set(t0() + chrono::Duration::minutes(9));
    assert_eq!(
        engine.redeem_key(U, &key.code),
        RedeemOutcome::LockedOut { until }
    );

    clock.set(until);
    assert!(engine.redeem_key(U, &key.code).is_granted());
    assert_eq!(engine.access_status(U).locked_until, None);
}

#[test]
fn revoke_is_not_idempotent_success() {
    let (engine, _clock) = setup(AccessConfig::new(OWNER));

    engine
        .grant_access(ADMIN, U, Some(Duration::from_secs(3600)))
        .unwrap();
    assert_eq!(engine.revoke_access(ADMIN, U), Ok(()));
    assert_eq!(engine.revoke_access(ADMIN, U), Err(KeywardenError::NotFound));
    assert_eq!(engine.revoke_access(ADMIN, V), Err(KeywardenError::NotFound));
}

#[test]
fn owner_role_cannot_change() {
    let mut config = AccessConfig::new(OWNER);
    config.allow_admin_promotion = true;
    let (engine, _clock) = setup(config);

    let actors = [OWNER, ADMIN, U];
    let targets = [OWNER, ADMIN, U, V];
    let roles = [Role::Owner, Role::Admin, Role::Member];

    for acting in actors {
        for target in targets {
            for role in roles {
                let _ = engine.set_role(acting, target, role);
            }
        }
    }

    assert_eq!(engine.role_of(OWNER), Role::Owner);
    let owners = [OWNER, ADMIN, U, V]
        .into_iter()
        .filter(|id| engine.role_of(*id) == Role::Owner)
        .count();
    assert_eq!(owners, 1);
}

#[test]
fn admin_cannot_change_own_role() {
    let mut config = AccessConfig::new(OWNER);
    config.allow_admin_promotion = true;
    let (engine, _clock) = setup(config);

    assert_eq!(
        engine.set_role(ADMIN, ADMIN, Role::Member),
        Err(KeywardenError::Forbidden)
    );
    assert_eq!(engine.role_of(ADMIN), Role::Admin);

    // Other members are still fair game
    assert_eq!(engine.set_role(ADMIN, U, Role::Admin), Ok(()));
    assert_eq!(engine.role_of(U), Role::Admin);
}

#[test]
fn members_cannot_administer() {
    let (engine, _clock) = setup(AccessConfig::new(OWNER));

    assert_eq!(
        engine.issue_default_key(U).map(|_| ()),
        Err(KeywardenError::Forbidden)
    );
    assert_eq!(
        engine.grant_access(U, V, None).map(|_| ()),
        Err(KeywardenError::Forbidden)
    );
    assert_eq!(engine.set_role(U, V, Role::Admin), Err(KeywardenError::Forbidden));
    assert_eq!(engine.set_role(ADMIN, V, Role::Admin), Err(KeywardenError::Forbidden));
    assert!(engine.list_keys(U).is_err());
}

#[test]
fn sweep_clears_lapsed_grants_but_not_roles() {
    let (engine, clock) = setup(AccessConfig::new(OWNER));
    engine
        .grant_access(ADMIN, U, Some(Duration::from_secs(60)))
        .unwrap();
    engine.grant_access(ADMIN, V, None).unwrap();

    clock.set(t0() + chrono::Duration::minutes(5));
    let report = engine.sweep();
    assert_eq!(report.grants, 1);

    assert_eq!(engine.list_authorized(), vec![OWNER, ADMIN, V]);
    assert_eq!(engine.list_admins(), vec![OWNER, ADMIN]);
}
