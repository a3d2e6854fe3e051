use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use libfirehose::{EventDispatcher, FirehoseSession, SnapshotManager, StatsConfig};
use libfirehose_model::{Envelope, HttpMethod};

type TestRes = Result<(), Box<dyn std::error::Error>>;

fn load_capture() -> Result<Vec<Envelope>, serde_json::Error> {
    std::include_str!("capture.jsonl")
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(Envelope::from_json_line)
        .collect()
}

#[tokio::test]
async fn replay_capture_over_two_streams() -> TestRes {
    common::init::firehose_test_init();
    let envelopes = load_capture()?;
    assert_eq!(envelopes.len(), 23);

    let mut session = FirehoseSession::new(StatsConfig::default());
    session
        .dispatcher()
        .with_graph(|g| g.routes.register_route("apps.example.com", "billing", "/invoices", "r-invoices"))?;
    let senders = vec![session.spawn_stream(0), session.spawn_stream(1)];
    for (i, env) in envelopes.into_iter().enumerate() {
        senders[i % senders.len()].send(env).await?;
    }
    drop(senders);
    session.drain_streams().await;
    let snap = session.publish_now();
    let stats = &snap.stats;

    assert_eq!(snap.total_processed, 23);
    assert_eq!(stats.ingest.processed_by_stream[&0], 12);
    assert_eq!(stats.ingest.processed_by_stream[&1], 11);
    assert_eq!(stats.ingest.server_leg_http_skipped, 1);
    // HTTP event without app id, container metric without app id
    assert_eq!(stats.ingest.malformed_events, 2);
    assert_eq!(stats.ingest.unknown_events, 1);
    assert_eq!(stats.ingest.ignored_log_lines, 1);
    assert_eq!(stats.ingest.dropped_messages, 17);
    assert_eq!(stats.ingest.ignored_counters, 1);

    let billing = &stats.apps["app-billing"];
    assert_eq!(billing.total_traffic.http_all_count, 3);
    assert_eq!(billing.total_traffic.http_2xx_count, 1);
    assert_eq!(billing.total_traffic.http_4xx_count, 1);
    assert_eq!(billing.total_traffic.http_5xx_count, 1);
    assert_eq!(billing.reporting_containers, 2);
    approx::assert_relative_eq!(billing.total_cpu_percentage, 20.0);
    assert_eq!(billing.total_memory_bytes, 384 * 1024 * 1024);
    // 2 container lines, 1 staging line, 1 cloud controller line
    assert_eq!(billing.total_log_count, 4);
    assert_eq!(billing.crash_count, 1);
    assert_eq!(billing.crashes[0].instance_index, 1);
    assert_eq!(
        billing.crashes[0].exit_description,
        "APP/PROC/WEB: Exited with status 137 (out of memory)"
    );
    assert_eq!(
        billing.container(0).and_then(|c| c.cell_ip.as_deref()),
        Some("10.0.32.7")
    );

    let checkout = &stats.apps["app-checkout"];
    assert_eq!(checkout.total_traffic.http_all_count, 2);
    assert_eq!(checkout.total_traffic.http_3xx_count, 1);

    assert_eq!(stats.cells.len(), 2);
    let cell = &stats.cells["10.0.32.7"];
    assert_eq!(cell.capacity_total_memory, 16 * 1024 * 1024 * 1024);
    assert_eq!(cell.used_memory(), 8 * 1024 * 1024 * 1024);
    assert_eq!(cell.num_cpus, 4);
    assert_eq!(cell.job, "diego-cell");
    assert_eq!(stats.cells["10.0.32.8"].container_count, 2);
    Ok(())
}

#[test]
fn replay_routes() -> TestRes {
    let now = Utc::now();
    let dispatcher = EventDispatcher::new(&StatsConfig::default());
    dispatcher
        .with_graph(|g| g.routes.register_route("apps.example.com", "billing", "/invoices", "r-invoices"))?;
    for env in load_capture()? {
        dispatcher.process_with_time(0, &env, now);
    }
    dispatcher.with_graph(|g| {
        let summaries = g.routes.summaries();
        let invoices = summaries
            .iter()
            .find(|s| s.host == "billing" && s.route == "/invoices")
            .expect("invoices route");
        assert_eq!(invoices.domain, "apps.example.com");
        assert_eq!(invoices.route_id.as_deref(), Some("r-invoices"));
        assert_eq!(invoices.request_count, 3);

        // unregistered paths of an unknown host land on its root route, with or
        // without an app id
        let shop = g.routes.host("apps.example.com", "shop").expect("shop host");
        let root = &shop.routes[""];
        assert_eq!(root.request_count(), 3);
        assert_eq!(root.apps[""].request_count(), 1);

        let billing = g.routes.host("apps.example.com", "billing").expect("billing host");
        let get = &billing.routes["/invoices"].apps["app-billing"].methods[&HttpMethod::Get];
        assert_eq!(get.request_count, 2);
        assert_eq!(get.status_codes[&200], 1);
        assert_eq!(get.status_codes[&404], 1);
        assert_eq!(get.user_agents.len(), 2);
        assert_eq!(get.forwarders.get("203.0.113.9"), Some(&1));
        assert_eq!(get.request_bytes, 128);
    });
    Ok(())
}

#[test]
fn replay_then_go_quiet() -> TestRes {
    let t0 = Utc::now();
    let config = StatsConfig::default();
    let dispatcher = EventDispatcher::new(&config);
    let manager = SnapshotManager::new(
        dispatcher.live_state().clone(),
        dispatcher.counters().clone(),
        config.route_limits,
        config.stale_threshold(),
    );
    for env in load_capture()? {
        dispatcher.process_with_time(0, &env, t0);
    }
    let fresh = manager.take_snapshot_with_time(t0);
    assert_eq!(fresh.stats.apps["app-billing"].total_traffic.event_l1_rate, 3);

    let later = manager.take_snapshot_with_time(t0 + ChronoDuration::seconds(81));
    let billing = &later.stats.apps["app-billing"];
    assert_eq!(billing.live_containers().count(), 0);
    assert_eq!(billing.reporting_containers, 0);
    approx::assert_relative_eq!(billing.total_cpu_percentage, 0.0);
    // counters survive, the windows have moved on
    assert_eq!(billing.total_traffic.http_all_count, 3);
    assert_eq!(billing.total_traffic.event_l60_rate, 0);
    assert_eq!(billing.total_traffic.avg_response_l60_time, 0.0);
    // non-container logs and crashes don't go stale
    assert_eq!(billing.total_log_count, 2);
    assert_eq!(billing.crash_count, 1);
    Ok(())
}

#[test]
fn config_from_file() -> TestRes {
    let path = common::test_utils::test_dir("libfirehose", "tests/firehose.toml");
    let config = StatsConfig::from_toml_file(path)?;
    assert_eq!(config.stale_container_threshold, Duration::from_secs(120));
    assert_eq!(config.snapshot_interval, Duration::from_millis(500));
    assert_eq!(config.max_crash_records, 10);
    assert_eq!(config.history.second, 60);
    assert_eq!(config.history.minute, 30);
    // not in the file: defaults
    assert_eq!(config.history.hour, 48);
    assert_eq!(config.route_limits.max_user_agents, 20);
    assert_eq!(config.route_limits.max_domains, 500);
    Ok(())
}
