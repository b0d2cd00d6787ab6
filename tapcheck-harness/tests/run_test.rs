// End-to-end runs of the harness against the simulated substrate
//
// Every run uses its own hub, and the clock is paused, so settle waits and
// propagation delays cost no wall time.

use std::sync::Arc;
use std::time::Duration;
use tapcheck_common::logging::{Component, Logger};
use tapcheck_common::types::{ServiceKind, TapMode};
use tapcheck_harness::dispatcher::{
    expected_copy_count, expected_copy_count_at, expected_primary_count,
};
use tapcheck_harness::{
    assert_not_a_tap, assert_tap_present, run_simulated, ConvergenceChecker, Expectation,
    HarnessConfig, HarnessError, Phase, PropertyLedger, TapRegistry, TestOrchestrator, Tick,
};
use tapcheck_node::{Hub, Substrate};
use tapcheck_test_utils::{create_test_hub, init_test_logging, unistr_args, TEST_TIMEOUT};
use tokio::time::timeout;

/// The reference scenario: fan-out 2, 200 numbered messages
///
/// INTENTION: verify the full protocol end to end with the default settings:
/// - the primary handler counts every message plus the sentinel
/// - the tapper sees every second message, stride 2
/// - the subscriber peer taps both addresses and sees every message once
/// - the in-traffic check and both post-teardown checks pass on both observers
#[tokio::test(start_paused = true)]
async fn test_reference_scenario() {
    init_test_logging();
    let report = timeout(TEST_TIMEOUT, run_simulated(HarnessConfig::default()))
        .await
        .expect("test timed out")
        .expect("run failed");

    assert_eq!(report.primary_count, 201);
    assert_eq!(report.copy_count, 202);
    assert_eq!(report.sentinels, 1);
    assert_eq!(report.messages_sent, 201);
    assert_eq!(report.checkpoints.len(), 3);
    assert_eq!(report.checkpoints[0].label, "during traffic");
    assert!(report.checkpoints.iter().all(|c| c.observers == 2));
    assert_eq!(report.stats.rejected, 0);
    assert_eq!(report.stats.dropped, 0);
    assert_eq!(
        report.subscriber_counts,
        vec![("copyunistr0".to_string(), 202), ("subunistr1".to_string(), 201)]
    );
    // address 0 is copied twice (101 each), address 1 once (100)
    assert_eq!(report.stats.copies_forwarded, 302);
    assert_eq!(report.stats.delivered, 201 + 302);
}

#[tokio::test(start_paused = true)]
async fn test_counts_match_closed_forms() {
    init_test_logging();
    for (fan_out, max_msg_count) in [(1, 0), (1, 5), (3, 10), (4, 3), (5, 0), (7, 50)] {
        let config = HarnessConfig::default()
            .with_fan_out(fan_out)
            .with_max_msg_count(max_msg_count)
            .with_settle_ms(200);
        let report = timeout(TEST_TIMEOUT, run_simulated(config))
            .await
            .expect("test timed out")
            .unwrap_or_else(|e| panic!("N={fan_out} M={max_msg_count}: {e}"));

        assert_eq!(report.primary_count, expected_primary_count(max_msg_count));
        assert_eq!(
            report.copy_count,
            expected_copy_count(fan_out, max_msg_count),
            "N={fan_out} M={max_msg_count}"
        );
        assert_eq!(report.sentinels, 1);
        assert_eq!(report.subscriber_counts.len(), fan_out as usize);
        for (index, (service, count)) in report.subscriber_counts.iter().enumerate() {
            assert_eq!(
                *count,
                expected_copy_count_at(fan_out, max_msg_count, index as i64),
                "{service} N={fan_out} M={max_msg_count}"
            );
        }
    }
}

/// The subscriber peer taps every publisher address from its own process
///
/// INTENTION: with fan-out 3 the first publisher address carries two taps, one
/// per process, next to its single plain entry; after teardown every tapper
/// service is still listed, and plain.
#[tokio::test(start_paused = true)]
async fn test_subscriber_taps_every_address() {
    init_test_logging();
    let hub = create_test_hub(50);
    let publisher = Arc::new(hub.attach("unipub").await.unwrap());
    let peer: Arc<dyn Substrate> = Arc::new(hub.attach("unisub").await.unwrap());
    let watcher = hub.attach("watcher").await.unwrap();
    let mut orchestrator = TestOrchestrator::new(
        HarnessConfig::default()
            .with_fan_out(3)
            .with_max_msg_count(30)
            .with_settle_ms(200),
        publisher,
        vec![peer],
    )
    .unwrap();

    assert_eq!(
        orchestrator.subscriber().map(|s| s.process_id()),
        Some("unisub")
    );
    assert!(matches!(orchestrator.tick().await.unwrap(), Tick::Continue(_)));
    assert_eq!(orchestrator.phase(), Phase::Running);

    let listing = watcher.list_services().await.unwrap();
    let first: Vec<_> = listing.entries_named("pubunistr0").collect();
    assert_eq!(first.iter().filter(|e| e.kind == ServiceKind::Plain).count(), 1);
    let taps: Vec<(Option<&str>, &str)> = first
        .iter()
        .filter(|e| e.kind == ServiceKind::Tap)
        .map(|e| (e.tapper.as_deref(), e.process.as_str()))
        .collect();
    assert_eq!(
        taps,
        vec![(Some("subunistr0"), "unipub"), (Some("copyunistr0"), "unisub")]
    );
    for i in 1..3 {
        assert_tap_present(&listing, &format!("pubunistr{i}"), &format!("subunistr{i}")).unwrap();
    }

    let report = timeout(TEST_TIMEOUT, async {
        loop {
            if orchestrator.phase() == Phase::Terminal {
                // both post-teardown checks passed; observers are still attached
                let listing = watcher.list_services().await.unwrap();
                for name in ["subunistr0", "subunistr1", "subunistr2", "copyunistr0"] {
                    assert_not_a_tap(&listing, name, true).unwrap();
                }
                assert_eq!(listing.tap_count(), 0);
            }
            match orchestrator.tick().await.unwrap() {
                Tick::Continue(delay) => tokio::time::sleep(delay).await,
                Tick::Done(report) => break report,
            }
        }
    })
    .await
    .expect("test timed out");

    assert_eq!(
        report.subscriber_counts,
        vec![
            ("copyunistr0".to_string(), expected_copy_count_at(3, 30, 0)),
            ("subunistr1".to_string(), expected_copy_count_at(3, 30, 1)),
            ("subunistr2".to_string(), expected_copy_count_at(3, 30, 2)),
        ]
    );
    assert!(watcher.list_services().await.unwrap().is_empty());
}

/// Deferred tap removal with random extra delay still converges in the settle window
#[tokio::test(start_paused = true)]
async fn test_converges_with_jitter() {
    init_test_logging();
    for seed in [1, 2, 3] {
        let config = HarnessConfig::default()
            .with_max_msg_count(20)
            .with_peers(3)
            .with_tap_propagation_delay_ms(200)
            .with_propagation_jitter_ms(600, seed);
        let report = timeout(TEST_TIMEOUT, run_simulated(config))
            .await
            .expect("test timed out")
            .expect("run failed");
        assert!(report.checkpoints.iter().all(|c| c.observers == 4));
    }
}

/// A settle wait shorter than the propagation delay sees the stale tap
#[tokio::test(start_paused = true)]
async fn test_short_settle_detects_stale_tap() {
    init_test_logging();
    let config = HarnessConfig::default()
        .with_max_msg_count(10)
        .with_settle_ms(20)
        .with_tap_propagation_delay_ms(500);
    let result = timeout(TEST_TIMEOUT, run_simulated(config))
        .await
        .expect("test timed out");
    match result {
        Err(HarnessError::ProtocolViolation(msg)) => assert!(msg.contains("pubunistr0"), "{msg}"),
        other => panic!("expected a protocol violation, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_rejected() {
    let result = run_simulated(HarnessConfig::default().with_fan_out(0)).await;
    assert!(matches!(result, Err(HarnessError::Config(_))));

    let result = run_simulated(HarnessConfig::default().with_max_msg_count(-1)).await;
    assert!(matches!(result, Err(HarnessError::Config(_))));
}

/// A stray message on a publisher address breaks the sequence
#[tokio::test(start_paused = true)]
async fn test_injected_message_is_a_violation() {
    init_test_logging();
    let hub = create_test_hub(50);
    let publisher = Arc::new(hub.attach("unipub").await.unwrap());
    let intruder = hub.attach("intruder").await.unwrap();
    let mut orchestrator = TestOrchestrator::new(
        HarnessConfig::default().with_max_msg_count(10),
        publisher,
        Vec::new(),
    )
    .unwrap();

    assert!(matches!(orchestrator.tick().await.unwrap(), Tick::Continue(_)));
    assert_eq!(orchestrator.phase(), Phase::Running);

    intruder
        .send("/pubunistr1/äta", unistr_args(42))
        .await
        .unwrap();
    match orchestrator.tick().await {
        Err(HarnessError::ProtocolViolation(msg)) => assert!(msg.contains("42"), "{msg}"),
        other => panic!("expected a protocol violation, got {other:?}"),
    }
}

/// The run leaves nothing behind
#[tokio::test(start_paused = true)]
async fn test_services_released_after_run() {
    let hub = Hub::default();
    let publisher = Arc::new(hub.attach("unipub").await.unwrap());
    let peer: Arc<dyn Substrate> = Arc::new(hub.attach("unisub").await.unwrap());
    let watcher = hub.attach("watcher").await.unwrap();

    let mut orchestrator = TestOrchestrator::new(
        HarnessConfig::default().with_max_msg_count(6).with_settle_ms(100),
        publisher,
        vec![peer],
    )
    .unwrap();
    timeout(TEST_TIMEOUT, orchestrator.run())
        .await
        .expect("test timed out")
        .expect("run failed");

    assert!(watcher.list_services().await.unwrap().is_empty());
    assert_eq!(hub.clock_master().await, None);
}

/// Property text survives the listing unmodified, as seen by a second process
#[tokio::test(start_paused = true)]
async fn test_property_round_trip_across_processes() {
    let hub = create_test_hub(50);
    let owner = Arc::new(hub.attach("owner").await.unwrap());
    let peer = Arc::new(hub.attach("peer").await.unwrap());
    let logger = Logger::new_root(Component::Harness, "owner");
    owner.create_service("svcA").await.unwrap();

    let mut ledger = PropertyLedger::new(&logger);
    ledger
        .set(owner.as_ref(), "svcA", "norwegian", "Blåbærsyltetøy")
        .await
        .unwrap();
    ledger
        .set(owner.as_ref(), "svcA", "sep:ar;ated\\", "a;b:c")
        .await
        .unwrap();

    let observers: Vec<Arc<dyn Substrate>> = vec![owner.clone(), peer.clone()];
    let checker = ConvergenceChecker::new(observers, Duration::from_millis(2), &logger).unwrap();
    checker
        .check_now("properties", &ledger.expectations())
        .await
        .unwrap();

    let listing = peer.list_services().await.unwrap();
    let props = listing.plain_entry("svcA").unwrap().property_list().unwrap();
    assert_eq!(props.get("norwegian"), Some("Blåbærsyltetøy"));
    assert_eq!(props.get("sep:ar;ated\\"), Some("a;b:c"));

    ledger.remove(owner.as_ref(), "svcA", "norwegian").await.unwrap();
    ledger.remove(owner.as_ref(), "svcA", "norwegian").await.unwrap();
    checker
        .check_now("after remove", &ledger.expectations())
        .await
        .unwrap();
}

/// Tapping one service leaves the other services plain, and removal converges
#[tokio::test(start_paused = true)]
async fn test_tap_lifecycle_through_registry() {
    let hub = create_test_hub(80);
    let node = Arc::new(hub.attach("unipub").await.unwrap());
    let peer = Arc::new(hub.attach("unisub").await.unwrap());
    let logger = Logger::new_root(Component::Harness, "unipub");
    for name in ["pubunistr0", "pubunistr1", "subunistr0"] {
        node.create_service(name).await.unwrap();
    }

    let mut taps = TapRegistry::new(&logger);
    taps.create_tap(node.as_ref(), "pubunistr0", "subunistr0", TapMode::Reliable)
        .await
        .unwrap();
    taps.create_tap(node.as_ref(), "pubunistr0", "subunistr0", TapMode::Reliable)
        .await
        .unwrap();
    assert_eq!(taps.relations().len(), 1);

    let observers: Vec<Arc<dyn Substrate>> = vec![node.clone(), peer.clone()];
    let checker = ConvergenceChecker::new(observers, Duration::from_millis(2), &logger).unwrap();
    let while_tapped = vec![
        Expectation::TapPresent {
            tappee: "pubunistr0".into(),
            tapper: "subunistr0".into(),
        },
        Expectation::NotATap {
            name: "pubunistr1".into(),
            must_exist: true,
        },
        Expectation::NotATap {
            name: "subunistr0".into(),
            must_exist: true,
        },
    ];
    checker.check_now("tapped", &while_tapped).await.unwrap();

    taps.remove_all(node.as_ref()).await.unwrap();
    assert!(taps.is_empty());
    let untapped = vec![
        Expectation::NotATap {
            name: "pubunistr0".into(),
            must_exist: true,
        },
        Expectation::NotATap {
            name: "subunistr0".into(),
            must_exist: true,
        },
        Expectation::NotATap {
            name: "gone".into(),
            must_exist: false,
        },
    ];
    // removal is still in flight right after it was accepted
    assert!(checker.check_now("too early", &untapped).await.is_err());
    checker
        .wait_until_settled(Duration::from_millis(100), "settled", &untapped)
        .await
        .unwrap();
}
