use helios_devkit::{BackendCall, EmsMessageBuilder, MockBackend, TestHarness, TEST_TOKEN};
use helios_sync::models::{ConnectionStatus, RlStrategy, SuggestionAction, SuggestionStatus};
use helios_sync::{ClientStateStore, MemoryStateStore, PersistedKey, Resolution, SyncError};
use std::time::Duration;

fn suggestion_ids(harness: &TestHarness) -> Vec<String> {
    harness
        .session
        .view()
        .site
        .suggestions
        .iter()
        .map(|s| s.id.clone())
        .collect()
}

#[tokio::test]
async fn test_telemetry_tracks_latest_push() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("1").await.unwrap();

    for pv in [1.0, 2.5, 4.0] {
        harness.push(&EmsMessageBuilder::telemetry("1", pv, 0.0, 0.0)).unwrap();
    }
    harness
        .wait_until(1000, |v| {
            v.site.telemetry.as_ref().map(|t| t.metrics.pv_generation) == Some(4.0)
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_switching_a_b_a_never_leaks_b_data() {
    let backend = MockBackend::with_sites(&["1", "2"]);
    backend.set_health("1", EmsMessageBuilder::health(91.0, 80.0));
    backend.set_health("2", EmsMessageBuilder::health(42.0, 15.0));
    let harness = TestHarness::with_parts(backend, MemoryStateStore::new()).unwrap();

    harness.login_and_select("1").await.unwrap();
    harness.wait_until(1000, |v| v.site.health.as_ref().map(|h| h.site_health) == Some(91.0)).await.unwrap();
    harness.push(&EmsMessageBuilder::alert("a1", "warning", "inverter temperature high")).unwrap();
    harness.wait_until(1000, |v| v.site.alerts.len() == 1).await.unwrap();

    harness.session.select_site(Some("2")).await.unwrap();
    let view = harness.session.view();
    assert!(view.site.alerts.is_empty());
    assert!(view.site.health.is_none());
    assert!(harness.live.wait_for_site("2", 1000).await);
    harness.wait_for_status(ConnectionStatus::Connected, 1000).await.unwrap();
    harness.push(&EmsMessageBuilder::alert("b1", "critical", "grid outage")).unwrap();
    harness.push(&EmsMessageBuilder::telemetry("2", 9.9, 0.0, 0.0)).unwrap();
    harness.wait_until(1000, |v| v.site.alerts.iter().any(|a| a.id == "b1")).await.unwrap();

    harness.session.select_site(Some("1")).await.unwrap();
    let view = harness.session.view();
    assert_eq!(view.selected_site.as_ref().map(|s| s.id.as_str()), Some("1"));
    assert!(view.site.alerts.is_empty());
    assert!(view.site.telemetry.is_none());
    assert!(view.site.health.is_none());

    let view = harness
        .wait_until(1000, |v| v.site.health.is_some())
        .await
        .unwrap();
    assert_eq!(view.site.health.unwrap().site_health, 91.0);
    assert!(view.site.alerts.iter().all(|a| a.id != "b1"));
    assert!(harness.live.wait_for_site("1", 1000).await);
    assert_eq!(harness.live.attempts(), vec!["1", "2", "1"]);
}

#[tokio::test]
async fn test_late_health_snapshot_for_previous_site_is_discarded() {
    let backend = MockBackend::with_sites(&["1", "2"]);
    backend.set_health("1", EmsMessageBuilder::health(91.0, 80.0));
    backend.set_health("2", EmsMessageBuilder::health(42.0, 15.0));
    backend.set_health_delay(Some(Duration::from_millis(150)));
    let harness = TestHarness::with_parts(backend, MemoryStateStore::new()).unwrap();

    harness.login().await.unwrap();
    harness.session.select_site(Some("2")).await.unwrap();
    harness.session.select_site(Some("1")).await.unwrap();

    let view = harness.wait_until(1000, |v| v.site.health.is_some()).await.unwrap();
    assert_eq!(view.site.health.unwrap().site_health, 91.0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.session.view().site.health.unwrap().site_health, 91.0);
}

#[tokio::test]
async fn test_resolve_success_never_readds_suggestion() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("1").await.unwrap();
    harness.push(&EmsMessageBuilder::rl_suggestion("s1", "charge_battery")).unwrap();
    harness.wait_until(1000, |v| v.suggestion("s1").is_some()).await.unwrap();

    let outcome = harness
        .session
        .resolve_suggestion("s1", SuggestionAction::Accept)
        .await
        .unwrap();
    assert_eq!(outcome, Resolution::Confirmed);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.session.view().suggestion("s1").is_none());

    let again = harness
        .session
        .resolve_suggestion("s1", SuggestionAction::Accept)
        .await
        .unwrap();
    assert_eq!(again, Resolution::AlreadyResolved);
}

#[tokio::test]
async fn test_rejected_suggestion_is_pending_again_after_backend_failure() {
    let harness = TestHarness::new().unwrap();
    harness.backend.fail_mutations(true);
    harness.login_and_select("1").await.unwrap();
    harness.push(&EmsMessageBuilder::rl_suggestion("s0", "idle")).unwrap();
    harness.push(&EmsMessageBuilder::rl_suggestion("s1", "discharge_battery")).unwrap();
    harness.wait_until(1000, |v| v.site.suggestions.len() == 2).await.unwrap();
    let original = harness.session.view().suggestion("s1").cloned().unwrap();

    let err = harness
        .session
        .resolve_suggestion("s1", SuggestionAction::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Mutation { .. }));
    assert!(err.is_recoverable());

    let view = harness.session.view();
    assert_eq!(view.site.suggestions[0], original);
    assert_eq!(view.site.suggestions[0].status, SuggestionStatus::Pending);

    let before = suggestion_ids(&harness);
    let _ = harness
        .session
        .resolve_suggestion("s1", SuggestionAction::Reject)
        .await;
    assert_eq!(suggestion_ids(&harness), before);
    assert!(harness.session.view().session.authenticated);
}

#[tokio::test]
async fn test_concurrent_resolves_of_same_id_hit_backend_once() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("1").await.unwrap();
    harness.push(&EmsMessageBuilder::rl_suggestion("s1", "charge_battery")).unwrap();
    harness.push(&EmsMessageBuilder::rl_suggestion("s2", "export_to_grid")).unwrap();
    harness.wait_until(1000, |v| v.site.suggestions.len() == 2).await.unwrap();

    let (first, second, other) = tokio::join!(
        harness.session.resolve_suggestion("s1", SuggestionAction::Accept),
        harness.session.resolve_suggestion("s1", SuggestionAction::Accept),
        harness.session.resolve_suggestion("s2", SuggestionAction::Reject),
    );
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|r| *r == Resolution::Confirmed);
    assert_eq!(outcomes, vec![Resolution::AlreadyResolved, Resolution::Confirmed]);
    assert_eq!(other.unwrap(), Resolution::Confirmed);

    let resolves = harness
        .backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, BackendCall::Resolve { suggestion_id, .. } if suggestion_id == "s1"))
        .count();
    assert_eq!(resolves, 1);
    assert!(harness.session.view().site.suggestions.is_empty());
}

#[tokio::test]
async fn test_resolve_without_selected_site_is_noop() {
    let harness = TestHarness::new().unwrap();
    harness.login().await.unwrap();
    let outcome = harness
        .session
        .resolve_suggestion("s1", SuggestionAction::Accept)
        .await
        .unwrap();
    assert_eq!(outcome, Resolution::NoSiteSelected);
    assert!(harness.backend.calls().iter().all(|c| !matches!(c, BackendCall::Resolve { .. })));
}

#[tokio::test]
async fn test_logout_clears_everything_in_one_step() {
    // pas de second tick pendant le test : la seule publication attendue est celle du logout
    let mut config = TestHarness::fast_config();
    config.poller.interval_ms = 60_000;
    let harness =
        TestHarness::with_config(config, MockBackend::with_sites(&["1", "2"]), MemoryStateStore::new()).unwrap();
    harness.login_and_select("1").await.unwrap();
    harness.push(&EmsMessageBuilder::telemetry("1", 3.0, 1.0, 0.2)).unwrap();
    harness.push(&EmsMessageBuilder::rl_suggestion("s1", "charge_battery")).unwrap();
    harness
        .wait_until(1000, |v| v.site.telemetry.is_some() && v.site.health.is_some() && !v.site.suggestions.is_empty())
        .await
        .unwrap();

    let mut rx = harness.session.subscribe();
    let before = rx.borrow_and_update().revision;
    harness.session.logout().await;

    let view = rx.borrow().clone();
    assert_eq!(view.revision, before + 1);
    assert!(!view.session.authenticated);
    assert!(view.session.credential.is_none());
    assert!(view.catalogue.is_empty());
    assert!(view.selected_site.is_none());
    assert!(view.site.health.is_none());
    assert!(view.site.telemetry.is_none());
    assert!(view.site.alerts.is_empty());
    assert!(view.site.suggestions.is_empty());
    assert_eq!(harness.session.connection_status(), ConnectionStatus::Disconnected);

    assert_eq!(harness.persisted.load(PersistedKey::BearerToken).unwrap(), None);
    assert_eq!(harness.persisted.load(PersistedKey::SelectedSiteId).unwrap(), None);
}

#[tokio::test]
async fn test_connection_status_transitions_and_no_reconnect_after_close() {
    let harness = TestHarness::new().unwrap();
    let mut status = harness.session.watch_connection();
    assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);

    harness.login_and_select("1").await.unwrap();

    harness.live.drop_connection();
    harness.wait_for_status(ConnectionStatus::Connecting, 1000).await.ok();
    assert!(harness.live.wait_for_attempts(2, 1000).await);
    harness.wait_for_status(ConnectionStatus::Connected, 1000).await.unwrap();
    assert_eq!(harness.session.health().reconnects, 1);

    harness.session.select_site(None).await.unwrap();
    assert_eq!(*status.borrow_and_update(), ConnectionStatus::Disconnected);
    let attempts = harness.live.attempts().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.live.attempts().len(), attempts);
    assert!(!status.has_changed().unwrap());
    assert_eq!(harness.session.connection_status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_refused_connection_retries_with_backoff() {
    let harness = TestHarness::new().unwrap();
    harness.live.refuse_connections(true);
    harness.login().await.unwrap();
    harness.session.select_site(Some("1")).await.unwrap();

    assert!(harness.live.wait_for_attempts(3, 2000).await);
    assert_eq!(harness.session.connection_status(), ConnectionStatus::Connecting);

    harness.live.refuse_connections(false);
    harness.wait_for_status(ConnectionStatus::Connected, 2000).await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_keeps_channel_open() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("1").await.unwrap();

    assert!(harness.live.send_raw("{definitely not json"));
    harness.push(&EmsMessageBuilder::unknown("weather_update")).unwrap();
    harness.push(&EmsMessageBuilder::telemetry("1", 5.0, 0.0, 0.0)).unwrap();
    harness.wait_until(1000, |v| v.site.telemetry.is_some()).await.unwrap();

    assert_eq!(harness.session.connection_status(), ConnectionStatus::Connected);
    assert_eq!(harness.live.attempts().len(), 1);
    assert_eq!(harness.session.health().frames_dropped, 1);
}

#[tokio::test]
async fn test_persisted_site_absent_from_catalogue_leaves_selection_empty() {
    let persisted = MemoryStateStore::new()
        .with(PersistedKey::BearerToken, TEST_TOKEN)
        .with(PersistedKey::SelectedSiteId, "3");
    let harness = TestHarness::with_parts(MockBackend::with_sites(&["1", "2"]), persisted).unwrap();

    assert!(harness.session.restore().await.unwrap());
    let view = harness.session.view();
    assert!(view.session.authenticated);
    assert_eq!(view.catalogue.len(), 2);
    assert!(view.selected_site.is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.live.attempts().is_empty());
    assert_eq!(harness.session.connection_status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_persisted_site_is_restored() {
    let persisted = MemoryStateStore::new()
        .with(PersistedKey::BearerToken, TEST_TOKEN)
        .with(PersistedKey::SelectedSiteId, "2");
    let harness = TestHarness::with_parts(MockBackend::with_sites(&["1", "2"]), persisted).unwrap();

    assert!(harness.session.restore().await.unwrap());
    assert_eq!(
        harness.session.view().selected_site.map(|s| s.id),
        Some("2".to_string())
    );
    assert!(harness.live.wait_for_site("2", 1000).await);
}

#[tokio::test]
async fn test_restore_without_token_does_nothing() {
    let harness = TestHarness::new().unwrap();
    assert!(!harness.session.restore().await.unwrap());
    assert!(harness.backend.calls().is_empty());
}

#[tokio::test]
async fn test_first_pull_is_immediate() {
    let mut config = TestHarness::fast_config();
    config.poller.interval_ms = 60_000;
    let harness = TestHarness::with_config(config, MockBackend::with_sites(&["1"]), MemoryStateStore::new()).unwrap();
    harness.login().await.unwrap();
    harness.session.select_site(Some("1")).await.unwrap();

    harness.wait_until(500, |v| v.site.health.is_some()).await.unwrap();
    assert_eq!(harness.backend.health_fetches("1"), 1);
}

#[tokio::test]
async fn test_poll_failure_retains_previous_snapshot() {
    let backend = MockBackend::with_sites(&["1"]);
    backend.set_health("1", EmsMessageBuilder::health(88.0, 60.0));
    let harness = TestHarness::with_parts(backend, MemoryStateStore::new()).unwrap();
    harness.login().await.unwrap();
    harness.session.select_site(Some("1")).await.unwrap();
    harness.wait_until(1000, |v| v.site.health.is_some()).await.unwrap();

    harness.backend.fail_health(true);
    let fetched = harness.backend.health_fetches("1");
    let start = std::time::Instant::now();
    while harness.backend.health_fetches("1") < fetched + 2 && start.elapsed() < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(harness.backend.health_fetches("1") >= fetched + 2);

    let view = harness.session.view();
    assert_eq!(view.site.health.unwrap().site_health, 88.0);
    assert!(harness.session.health().polls_failed >= 1);
    assert!(view.session.authenticated);
}

#[tokio::test]
async fn test_rejected_live_handshake_ends_session() {
    let harness = TestHarness::new().unwrap();
    harness.live.reject_credentials(true);
    harness.login().await.unwrap();
    harness.session.select_site(Some("1")).await.unwrap();

    harness.wait_until(1000, |v| !v.session.authenticated).await.unwrap();
    assert_eq!(harness.session.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(harness.persisted.load(PersistedKey::BearerToken).unwrap(), None);
}

#[tokio::test]
async fn test_unauthorized_mutation_rolls_back_and_ends_session() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("1").await.unwrap();
    harness.push(&EmsMessageBuilder::rl_suggestion("s1", "charge_battery")).unwrap();
    harness.wait_until(1000, |v| v.suggestion("s1").is_some()).await.unwrap();

    harness.backend.reject_credentials(true);
    let err = harness
        .session
        .resolve_suggestion("s1", SuggestionAction::Accept)
        .await
        .unwrap_err();
    assert!(err.is_auth_failure());
    harness.wait_until(1000, |v| !v.session.authenticated).await.unwrap();
}

#[tokio::test]
async fn test_login_with_credentials() {
    let harness = TestHarness::new().unwrap();
    harness.session.login("operator", "secret").await.unwrap();
    assert!(harness.session.view().session.authenticated);
    assert_eq!(
        harness.persisted.load(PersistedKey::BearerToken).unwrap().as_deref(),
        Some(TEST_TOKEN)
    );

    let err = harness.session.login("operator", "").await.unwrap_err();
    assert!(err.is_auth_failure());
}

#[tokio::test]
async fn test_select_unknown_site_or_without_session_fails() {
    let harness = TestHarness::new().unwrap();
    assert!(matches!(
        harness.session.select_site(Some("1")).await,
        Err(SyncError::NotAuthenticated)
    ));
    harness.login().await.unwrap();
    assert!(matches!(
        harness.session.select_site(Some("9")).await,
        Err(SyncError::UnknownSite(_))
    ));
}

#[tokio::test]
async fn test_acknowledge_alert_rolls_back_on_failure() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("1").await.unwrap();
    harness.push(&EmsMessageBuilder::alert("a1", "critical", "battery overheating")).unwrap();
    harness.wait_until(1000, |v| v.site.alerts.len() == 1).await.unwrap();

    harness.backend.fail_mutations(true);
    assert!(harness.session.acknowledge_alert("a1").await.is_err());
    assert!(!harness.session.view().site.alerts[0].acknowledged);

    harness.backend.fail_mutations(false);
    assert_eq!(harness.session.acknowledge_alert("a1").await.unwrap(), Resolution::Confirmed);
    assert!(harness.session.view().site.alerts[0].acknowledged);
    assert_eq!(
        harness.session.acknowledge_alert("a1").await.unwrap(),
        Resolution::AlreadyResolved
    );
}

#[tokio::test]
async fn test_strategy_weights_survive_site_switch_and_reset_on_logout() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("1").await.unwrap();

    let weights = RlStrategy {
        cost_priority: 40,
        grid_stability_priority: 40,
        battery_longevity_priority: 20,
    };
    assert_eq!(harness.session.update_strategy(weights).await.unwrap(), Resolution::Confirmed);
    harness.session.select_site(Some("2")).await.unwrap();
    assert_eq!(harness.session.view().strategy, weights);

    harness.backend.fail_mutations(true);
    let bolder = RlStrategy { cost_priority: 90, ..weights };
    assert!(harness.session.update_strategy(bolder).await.is_err());
    assert_eq!(harness.session.view().strategy, weights);

    let invalid = RlStrategy { cost_priority: 120, ..weights };
    assert!(matches!(
        harness.session.update_strategy(invalid).await,
        Err(SyncError::InvalidInput(_))
    ));

    harness.session.logout().await;
    assert_eq!(harness.session.view().strategy, RlStrategy::default());
}

#[tokio::test]
async fn test_unchanged_strategy_is_still_sent_to_backend() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("1").await.unwrap();

    let outcome = harness.session.update_strategy(RlStrategy::default()).await.unwrap();
    assert_eq!(outcome, Resolution::Confirmed);
    let updates = harness
        .backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, BackendCall::UpdateStrategy { site_id, .. } if site_id == "1"))
        .count();
    assert_eq!(updates, 1);
}

#[tokio::test]
async fn test_failed_resolve_after_site_switch_does_not_leak_into_new_site() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("1").await.unwrap();
    harness.push(&EmsMessageBuilder::rl_suggestion("s1", "charge_battery")).unwrap();
    harness.wait_until(1000, |v| v.suggestion("s1").is_some()).await.unwrap();

    harness.backend.fail_mutations(true);
    harness.backend.set_mutation_delay(Some(Duration::from_millis(200)));

    let switch = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.session.select_site(Some("2")).await
    };
    let (resolved, switched) = tokio::join!(
        harness.session.resolve_suggestion("s1", SuggestionAction::Accept),
        switch,
    );
    switched.unwrap();

    let err = resolved.unwrap_err();
    assert!(matches!(err, SyncError::Mutation { action: "accept", .. }));

    let view = harness.session.view();
    assert_eq!(view.selected_site.as_ref().map(|s| s.id.as_str()), Some("2"));
    assert!(view.suggestion("s1").is_none());
    assert!(view.site.suggestions.is_empty());
}

#[tokio::test]
async fn test_refresh_suggestions_replaces_sequence() {
    let backend = MockBackend::with_sites(&["1"]);
    backend.set_suggestions(
        "1",
        vec![EmsMessageBuilder::suggestion("r1"), EmsMessageBuilder::suggestion("r2")],
    );
    let harness = TestHarness::with_parts(backend, MemoryStateStore::new()).unwrap();
    harness.login_and_select("1").await.unwrap();
    harness.push(&EmsMessageBuilder::rl_suggestion("s9", "idle")).unwrap();
    harness.wait_until(1000, |v| v.suggestion("s9").is_some()).await.unwrap();

    harness.session.refresh_suggestions().await.unwrap();
    assert_eq!(suggestion_ids(&harness), vec!["r1", "r2"]);
}

#[tokio::test]
async fn test_reload_catalogue_drops_vanished_selection() {
    let harness = TestHarness::new().unwrap();
    harness.login_and_select("2").await.unwrap();

    harness
        .backend
        .set_sites(vec![EmsMessageBuilder::site("1", "Pune Plant")]);
    harness.session.reload_catalogue().await.unwrap();

    let view = harness.session.view();
    assert!(view.selected_site.is_none());
    assert_eq!(view.catalogue.len(), 1);
    assert_eq!(harness.session.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(harness.persisted.load(PersistedKey::SelectedSiteId).unwrap(), None);
}
