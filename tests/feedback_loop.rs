//! Properties of the detection → reputation → blocklist loop.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use gatekeeper::config::{GatekeeperConfig, RouteClassConfig};
use gatekeeper::security::{DenyReason, SecurityLayer, ViolationKind};

fn addr(n: u8) -> IpAddr {
    IpAddr::from([192, 0, 2, n])
}

#[test]
fn test_repeated_rate_abuse_ends_on_blocklist() {
    let mut config = GatekeeperConfig::default();
    // no burst limit, tiny window budget
    config
        .admission
        .classes
        .insert("chat".into(), RouteClassConfig::new(2, 60, 1000));
    let layer = SecurityLayer::new(&config);
    let client = addr(1);
    let mut now = Instant::now();

    // each cycle: fill the window, overflow once, wait out the block
    for _ in 0..8 {
        while layer.admit_at(client, "chat", now).is_allowed() {}
        now += Duration::from_secs(16 * 60);
        if layer.is_blocked(&client) {
            break;
        }
    }

    // 10 points per rate violation from 100 reaches the threshold of 20
    assert!(layer.is_blocked(&client));
    assert_eq!(
        layer.admit_at(client, "chat", now).reason(),
        Some(DenyReason::Blocklisted)
    );
    // blocklisting covers every route class
    assert_eq!(
        layer.admit_at(client, "api", now).reason(),
        Some(DenyReason::Blocklisted)
    );
}

#[test]
fn test_two_injections_block_an_address() {
    let layer = SecurityLayer::new(&GatekeeperConfig::default());
    let client = addr(2);

    let first = layer.inspect_text(client, "x'; DROP TABLE users; --", None);
    assert!(!first.valid);
    assert!(!layer.is_blocked(&client));

    let second = layer.inspect_text(client, "<script>alert(1)</script>", None);
    assert!(!second.valid);
    assert!(layer.is_blocked(&client));
    assert!(!layer.admit(client, "api").is_allowed());
}

#[test]
fn test_venting_does_not_blocklist() {
    let layer = SecurityLayer::new(&GatekeeperConfig::default());
    let client = addr(11);

    for text in [
        "I couldn't sleep (3 hours at most) and I feel awful",
        "she said \"fine\" -- and walked out",
        "his facial expression (honestly) scared me",
    ] {
        assert!(layer.inspect_text(client, text, None).valid, "{text}");
    }
    assert!(!layer.is_blocked(&client));
    assert_eq!(layer.reputation().score(&client), 100);
}

#[test]
fn test_clean_text_has_no_cost() {
    let layer = SecurityLayer::new(&GatekeeperConfig::default());
    let client = addr(3);

    for _ in 0..50 {
        let result = layer.inspect_text(client, "What time does the store open?", None);
        assert!(result.valid);
    }
    assert_eq!(layer.reputation().score(&client), 100);
    assert_eq!(layer.stats().reputation_records, 0);
}

#[test]
fn test_too_long_is_malformed_input() {
    let layer = SecurityLayer::new(&GatekeeperConfig::default());
    let client = addr(4);

    let result = layer.inspect_text(client, "hello world", Some(5));
    assert!(!result.valid);
    assert_eq!(layer.reputation().score(&client), 95);
}

#[test]
fn test_csrf_replay_and_forgery_are_violations() {
    let layer = SecurityLayer::new(&GatekeeperConfig::default());
    let client = addr(5);

    let token = layer.issue_csrf(client, "session");
    assert!(layer.verify_csrf(client, "session", &token));
    assert!(!layer.verify_csrf(client, "session", &token));
    assert!(!layer.verify_csrf(client, "unknown-session", &token));
    assert_eq!(layer.reputation().score(&client), 20);
    assert!(layer.is_blocked(&client));
}

#[test]
fn test_fingerprint_mismatch_keeps_session_and_reports() {
    let layer = SecurityLayer::new(&GatekeeperConfig::default());
    let holder = addr(6);
    let thief = addr(7);

    let session = layer.create_admin_session("root", "fp-holder");
    assert!(layer
        .validate_admin_session(thief, &session, Some("fp-thief"))
        .is_err());
    assert_eq!(layer.reputation().score(&thief), 85);

    let grant = layer
        .validate_admin_session(holder, &session, Some("fp-holder"))
        .unwrap();
    assert_eq!(grant.user_id, "root");
    assert_eq!(layer.reputation().score(&holder), 100);
}

#[test]
fn test_lockout_reports_brute_force_once() {
    let layer = SecurityLayer::new(&GatekeeperConfig::default());
    let client = addr(8);

    for _ in 0..5 {
        assert!(layer.admin_login_allowed(client).is_ok());
        layer.record_login_failure(client);
    }
    assert!(layer.admin_login_allowed(client).is_err());
    assert_eq!(layer.reputation().score(&client), 70);

    // failures during the lockout are not counted again
    layer.record_login_failure(client);
    assert_eq!(layer.reputation().score(&client), 70);
}

#[test]
fn test_sweep_never_releases_blocklisted_addresses() {
    let layer = SecurityLayer::new(&GatekeeperConfig::default());
    let client = addr(9);
    let start = Instant::now();

    layer
        .reputation()
        .record_violation_at(client, ViolationKind::SqlInjection, start);
    layer
        .reputation()
        .record_violation_at(client, ViolationKind::SqlInjection, start);
    assert!(layer.is_blocked(&client));

    let much_later = start + Duration::from_secs(30 * 24 * 60 * 60);
    layer.sweep_at(much_later);
    assert!(layer.is_blocked(&client));
    assert_eq!(layer.stats().blocklisted, 1);
}

#[test]
fn test_concurrent_admission_loses_no_increments() {
    let mut config = GatekeeperConfig::default();
    config
        .admission
        .classes
        .insert("api".into(), RouteClassConfig::new(400, 3600, 10_000));
    let layer = SecurityLayer::new(&config);
    let client = addr(10);
    let now = Instant::now();

    let admitted: usize = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    (0..100)
                        .filter(|_| layer.admit_at(client, "api", now).is_allowed())
                        .count()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    // 800 requests against a budget of 400
    assert_eq!(admitted, 400);
    let window = layer.admission().window(client, "api").unwrap();
    assert_eq!(window.count, 401);
}
