//! End-to-end retention scenarios driven through the pipeline with a manual clock.

use chrono::{DateTime, Duration, TimeZone, Utc};
use retention_agents::RetentionPipeline;
use retention_cache::{
    DailyVisitStore, LastSeenStore, LocalDailyVisitStore, LocalLastSeenStore,
    LocalRegistrationStore,
};
use retention_core::config::AppConfig;
use retention_core::types::{ActivityKey, Registration};
use retention_core::{Clock, ManualClock, Platform};
use std::collections::BTreeMap;
use std::sync::Arc;

const ANDROID_UA: &str = "Element/1.6.3 (Linux; U; Android 11; Pixel 4a Build/RQ3A)";
const USER: &str = "@alice:example.org";
const DEVICE: &str = "PHONE";

struct Harness {
    clock: Arc<ManualClock>,
    pipeline: RetentionPipeline,
    last_seen: Arc<LocalLastSeenStore>,
    visits: Arc<LocalDailyVisitStore>,
    registrations: Arc<LocalRegistrationStore>,
}

impl Harness {
    fn new(start: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let last_seen = Arc::new(LocalLastSeenStore::new());
        let visits = Arc::new(LocalDailyVisitStore::new());
        let registrations = Arc::new(LocalRegistrationStore::new());
        let pipeline = RetentionPipeline::new(
            &AppConfig::default(),
            clock.clone(),
            last_seen.clone(),
            visits.clone(),
            registrations.clone(),
        );
        Self {
            clock,
            pipeline,
            last_seen,
            visits,
            registrations,
        }
    }

    fn register_now(&self) {
        self.registrations
            .register(Registration::native(USER, self.clock.now()));
    }

    /// A request at the current instant, flushed the way the flush timer would.
    fn post(&self, user_agent: Option<&str>) {
        self.pipeline
            .record_activity(USER, Some(DEVICE), "203.0.113.9", user_agent, self.clock.now());
        self.pipeline.flush();
    }

    /// Post at `at`, then let the deriver run five minutes later.
    fn visit(&self, at: DateTime<Utc>, user_agent: Option<&str>) {
        self.clock.set(at);
        self.post(user_agent);
        self.clock.advance(Duration::minutes(5));
        self.pipeline.derive().unwrap();
    }

    fn legacy_at(&self, now: DateTime<Utc>) -> BTreeMap<String, u64> {
        self.pipeline.legacy_retained(now).unwrap()
    }

    fn successor_at(&self, now: DateTime<Utc>) -> BTreeMap<String, u64> {
        self.pipeline.successor_retained(now).unwrap()
    }
}

fn counts(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn successor(all: u64, android: u64) -> BTreeMap<String, u64> {
    counts(&[
        ("all", all),
        ("android", android),
        ("electron", 0),
        ("ios", 0),
        ("web", 0),
    ])
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
}

fn d0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()
}

#[test]
fn legacy_cohort_lifecycle() {
    let h = Harness::new(t0());
    h.register_now();
    h.post(None);

    let month = t0() + Duration::days(30) + Duration::seconds(1);
    h.clock.set(month);
    assert_eq!(h.legacy_at(month), counts(&[("all", 0)]));

    h.post(None);
    let later = month + Duration::hours(2);
    assert_eq!(h.legacy_at(later), counts(&[("all", 1), ("unknown", 1)]));

    let still = t0() + Duration::days(59) + Duration::seconds(1) + Duration::hours(2);
    assert_eq!(h.legacy_at(still), counts(&[("all", 1), ("unknown", 1)]));

    let lapsed = t0() + Duration::days(60) + Duration::seconds(1) + Duration::hours(2);
    assert_eq!(h.legacy_at(lapsed), counts(&[("all", 0)]));
}

#[test]
fn legacy_counts_only_after_a_month() {
    let h = Harness::new(t0());
    h.register_now();
    h.post(Some(ANDROID_UA));

    for day in [1, 10, 29] {
        let at = t0() + Duration::days(day);
        h.clock.set(at);
        h.post(Some(ANDROID_UA));
        assert_eq!(h.legacy_at(at + Duration::hours(1)), counts(&[("all", 0)]));
    }

    let at = t0() + Duration::days(31);
    h.clock.set(at);
    h.post(Some(ANDROID_UA));
    assert_eq!(
        h.legacy_at(at + Duration::hours(1)),
        counts(&[("all", 1), ("android", 1)])
    );
}

#[test]
fn successor_window_lifecycle() {
    let h = Harness::new(t0());
    h.register_now();
    h.visit(t0(), None);

    let second = d0() + Duration::days(31) + Duration::hours(12);
    h.visit(second, None);
    assert_eq!(h.successor_at(h.clock.now()), successor(1, 0));

    let closing = d0() + Duration::days(60) - Duration::seconds(5);
    assert_eq!(h.successor_at(closing), successor(1, 0));

    let closed = d0() + Duration::days(60) + Duration::seconds(5);
    assert_eq!(h.successor_at(closed), successor(0, 0));
}

#[test]
fn successor_counts_only_after_a_month() {
    let h = Harness::new(t0());
    h.register_now();
    h.visit(t0(), Some(ANDROID_UA));

    for day in [1, 15, 30] {
        h.visit(t0() + Duration::days(day), Some(ANDROID_UA));
        assert_eq!(h.successor_at(h.clock.now()), successor(0, 0), "day {}", day);
    }

    h.visit(t0() + Duration::days(31), Some(ANDROID_UA));
    assert_eq!(h.successor_at(h.clock.now()), successor(1, 1));
}

#[test]
fn successor_dormant_user_reenters() {
    let h = Harness::new(t0());
    h.register_now();
    h.visit(t0(), None);

    h.visit(t0() + Duration::days(60), None);
    assert_eq!(h.successor_at(h.clock.now()), successor(0, 0));

    h.visit(t0() + Duration::days(92), None);
    assert_eq!(h.successor_at(h.clock.now()), successor(1, 0));

    let inside = d0() + Duration::days(119) + Duration::hours(12);
    assert_eq!(h.successor_at(inside), successor(1, 0));

    let outside = d0() + Duration::days(120) + Duration::hours(12);
    assert_eq!(h.successor_at(outside), successor(0, 0));
}

#[test]
fn deriver_is_idempotent_within_a_day() {
    let h = Harness::new(t0());
    h.register_now();
    h.visit(t0(), Some(ANDROID_UA));

    h.clock.advance(Duration::minutes(5));
    let rerun = h.pipeline.derive().unwrap();
    assert_eq!(rerun.created, 0);
    assert_eq!(rerun.unchanged, 1);

    let visit = h.visits.get(USER, d0()).unwrap().unwrap();
    assert_eq!(visit.platform, Platform::Android);
    assert_eq!(h.visits.len(), 1);
}

#[test]
fn activity_before_midnight_is_caught_up() {
    let h = Harness::new(t0());
    h.register_now();

    h.clock.set(d0() + Duration::hours(23) + Duration::minutes(50));
    h.pipeline.derive().unwrap();

    h.clock.set(d0() + Duration::hours(23) + Duration::minutes(58));
    h.post(Some(ANDROID_UA));

    h.clock.set(d0() + Duration::days(1) + Duration::minutes(5));
    let report = h.pipeline.derive().unwrap();
    assert_eq!(report.created, 1);
    assert!(h.visits.get(USER, d0()).unwrap().is_some());
    assert!(h.visits.get(USER, d0() + Duration::days(1)).unwrap().is_none());
}

#[test]
fn out_of_order_activity_never_rewinds_last_seen() {
    let h = Harness::new(t0());
    h.register_now();
    h.post(Some(ANDROID_UA));

    h.pipeline.record_activity(
        USER,
        Some(DEVICE),
        "203.0.113.10",
        None,
        t0() - Duration::hours(1),
    );
    let report = h.pipeline.flush();
    assert_eq!(report.stale, 1);

    let key = ActivityKey {
        user_id: USER.into(),
        device_id: Some(DEVICE.into()),
    };
    let stored = h.last_seen.get(&key).unwrap().unwrap();
    assert_eq!(stored.last_seen, t0());
    assert_eq!(stored.user_agent.as_deref(), Some(ANDROID_UA));
}
