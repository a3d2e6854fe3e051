use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use common::rate_limit::SimpleRateLimiter;
use itertools::Itertools;
use libfirehose::{route_tracker::RouteSummary, FirehoseSession, StatsConfig, StatsSnapshot};
use libfirehose_model::{
    display_app_name,
    metadata::display_space_and_org,
    pretty_print_si_units,
    sort::{AppColumn, CellColumn, Comparator, SortDirection},
    AppStats, CellStats, Envelope, EventRate, EventType, MetadataProvider, StaticMetadata,
};
use log::{info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, long_about = None)]
#[command(
    about = "Replay a firehose capture (one JSON envelope per line) through the stats engine and print what it saw"
)]
struct Args {
    /// Capture file; reads stdin if not given
    #[arg(long)]
    input: Option<String>,

    /// Stats config (TOML)
    #[arg(long)]
    config: Option<String>,

    /// Number of firehose streams to spread the envelopes over (round-robin)
    #[arg(long, default_value_t = 1)]
    streams: u32,

    /// App/space/org names (JSON)
    #[arg(long)]
    metadata: Option<String>,

    /// Column to sort the apps by
    #[arg(long, default_value = "total-req")]
    sort: String,

    /// Sort ascending instead of descending
    #[arg(long, default_value_t = false)]
    ascending: bool,

    /// Number of apps, cells and routes to print
    #[arg(long, default_value_t = 20)]
    top: usize,

    /// Register an HTTP route before replaying: DOMAIN,HOST,PATH,ROUTE_ID
    #[arg(long)]
    route: Vec<String>,

    /// Dump the final snapshot and history as JSON instead of tables
    #[arg(long, default_value_t = false)]
    json: bool,
}

struct RouteArg {
    domain: String,
    host: String,
    path: String,
    route_id: String,
}

fn parse_route_arg(arg: &str) -> anyhow::Result<RouteArg> {
    let parts = arg.split(',').map(str::trim).collect_vec();
    if parts.len() != 4 {
        bail!(
            "Bad --route {:?}: expected DOMAIN,HOST,PATH,ROUTE_ID",
            arg
        );
    }
    Ok(RouteArg {
        domain: parts[0].to_string(),
        host: parts[1].to_string(),
        path: parts[2].to_string(),
        route_id: parts[3].to_string(),
    })
}

#[derive(Serialize)]
struct JsonReport<'a> {
    snapshot: &'a StatsSnapshot,
    routes: Vec<RouteSummary>,
    history: &'a [EventRate],
}

async fn open_input(input: Option<&str>) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin>> {
    Ok(match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open capture {}", path))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    })
}

/// Feed every envelope of the capture into the session. Returns (envelopes, bad lines).
async fn replay(
    session: &mut FirehoseSession,
    args: &Args,
) -> anyhow::Result<(u64, u64)> {
    let senders = (0..args.streams.max(1))
        .map(|id| session.spawn_stream(id))
        .collect_vec();
    let mut lines = open_input(args.input.as_deref()).await?.lines();
    let mut parse_warn_limiter = SimpleRateLimiter::new(Duration::from_secs(5));
    let mut line_no = 0;
    let (mut envelopes, mut bad_lines) = (0u64, 0u64);
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match Envelope::from_json_line(&line) {
            Ok(env) => {
                let tx = &senders[envelopes as usize % senders.len()];
                tx.send(env)
                    .await
                    .context("Ingest task went away mid-replay")?;
                envelopes += 1;
            }
            Err(e) => {
                bad_lines += 1;
                if let Some(suppressed) = parse_warn_limiter.check_update_with_suppressed() {
                    warn!(
                        "Skipping line {}: {} ({} similar suppressed)",
                        line_no, e, suppressed
                    );
                }
            }
        }
    }
    drop(senders);
    session.drain_streams().await;
    Ok((envelopes, bad_lines))
}

fn print_apps(snapshot: &StatsSnapshot, metadata: &dyn MetadataProvider, args: &Args) -> anyhow::Result<()> {
    let column: AppColumn = args.sort.parse().with_context(|| {
        format!(
            "Valid sort columns: {}",
            AppColumn::column_names().join(", ")
        )
    })?;
    let direction = if args.ascending {
        SortDirection::Ascending
    } else {
        SortDirection::Descending
    };
    let mut apps: Vec<&AppStats> = snapshot.stats.apps.values().collect();
    Comparator::new(column, direction).sort(&mut apps);
    println!(
        "{:<28} {:<24} {:>5} {:>7} {:>10} {:>6} {:>6} {:>6} {:>8} {:>6} {:>6} {:>6} {:>6} {:>10} {:>7} {:>7}",
        "APP", "SPACE/ORG", "CNTRS", "CPU%", "MEM", "REQ/1", "REQ/10", "REQ/60", "TOTAL", "2XX", "3XX",
        "4XX", "5XX", "RESP/60", "LOGS", "CRASH"
    );
    for app in apps.iter().take(args.top) {
        let (space, org) = display_space_and_org(metadata, &app.app_id);
        let t = &app.total_traffic;
        let resp60 = if t.event_l60_rate > 0 || t.avg_response_l60_time > 0.0 {
            pretty_print_si_units(Some(t.avg_response_l60_time / 1e9), "s")
        } else {
            "-".to_string()
        };
        println!(
            "{:<28} {:<24} {:>5} {:>7.2} {:>10} {:>6} {:>6} {:>6} {:>8} {:>6} {:>6} {:>6} {:>6} {:>10} {:>7} {:>7}",
            display_app_name(metadata, &app.app_id),
            format!("{}/{}", space, org),
            app.reporting_containers,
            app.total_cpu_percentage,
            pretty_print_si_units(Some(app.total_memory_bytes as f64), "B"),
            t.event_l1_rate,
            t.event_l10_rate,
            t.event_l60_rate,
            t.http_all_count,
            t.http_2xx_count,
            t.http_3xx_count,
            t.http_4xx_count,
            t.http_5xx_count,
            resp60,
            app.total_log_count,
            app.crash_count,
        );
        for crash in app.crashes.iter().rev().take(3) {
            println!(
                "    crash: instance {} at {}: {}",
                crash.instance_index, crash.crash_time, crash.exit_description
            );
        }
    }
    Ok(())
}

fn print_cells(snapshot: &StatsSnapshot, top: usize) {
    let mut cells: Vec<&CellStats> = snapshot.stats.cells.values().collect();
    Comparator::new(CellColumn::UsedMemory, SortDirection::Descending).sort(&mut cells);
    println!(
        "{:<16} {:<16} {:>5} {:>10} {:>10} {:>10} {:>10} {:>6}",
        "CELL", "JOB/INDEX", "CPUS", "MEM TOTAL", "MEM USED", "DISK TOTAL", "DISK USED", "CNTRS"
    );
    for cell in cells.iter().take(top) {
        println!(
            "{:<16} {:<16} {:>5} {:>10} {:>10} {:>10} {:>10} {:>6}",
            cell.ip,
            format!("{}/{}", cell.job, cell.index),
            cell.num_cpus,
            pretty_print_si_units(Some(cell.capacity_total_memory as f64), "B"),
            pretty_print_si_units(Some(cell.used_memory() as f64), "B"),
            pretty_print_si_units(Some(cell.capacity_total_disk as f64), "B"),
            pretty_print_si_units(Some(cell.used_disk() as f64), "B"),
            cell.container_count,
        );
    }
}

fn print_routes(routes: &[RouteSummary], top: usize) {
    println!("{:<40} {:<24} {:<16} {:>8}", "HOST", "ROUTE", "ROUTE ID", "REQS");
    for r in routes.iter().take(top) {
        let hostname = [r.host.as_str(), r.domain.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .join(".");
        println!(
            "{:<40} {:<24} {:<16} {:>8}",
            hostname,
            if r.route.is_empty() { "/" } else { r.route.as_str() },
            r.route_id.as_deref().unwrap_or("-"),
            r.request_count
        );
    }
}

fn print_history(history: &[EventRate]) {
    println!("{:<32} {:<32} {:>10} {:>10}  PER TYPE (high)", "BEGIN", "END", "HIGH", "LOW");
    for rate in history {
        let per_type = EventType::ALL
            .iter()
            .map(|t| (t, rate.type_rate(*t).high))
            .filter(|(_, high)| *high > 0)
            .map(|(t, high)| format!("{}={}", t, high))
            .join(" ");
        println!(
            "{:<32} {:<32} {:>10} {:>10}  {}",
            rate.begin.to_rfc3339(),
            rate.end.to_rfc3339(),
            rate.total_high(),
            rate.total_low(),
            per_type
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::init::firehose_init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => StatsConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path))?,
        None => StatsConfig::default(),
    };
    let metadata = match &args.metadata {
        Some(path) => StaticMetadata::from_json_file(path)
            .with_context(|| format!("Failed to load metadata {}", path))?,
        None => StaticMetadata::default(),
    };

    let mut session = FirehoseSession::new(config);
    for arg in &args.route {
        let route = parse_route_arg(arg)?;
        session.dispatcher().with_graph(|g| {
            g.routes
                .register_route(&route.domain, &route.host, &route.path, &route.route_id)
        })?;
    }

    let (envelopes, bad_lines) = replay(&mut session, &args).await?;
    info!(
        "Replayed {} envelopes over {} stream(s), skipped {} bad lines",
        envelopes,
        args.streams.max(1),
        bad_lines
    );

    let snapshot = session.publish_now();
    let history = session.tick_history_now();
    let routes = snapshot.stats.routes.summaries();

    if args.json {
        let report = JsonReport {
            snapshot: &snapshot,
            routes,
            history: &history,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let ingest = &snapshot.stats.ingest;
    println!(
        "Generation {}: {} events processed, {} malformed, {} unknown, {} dropped by the platform",
        snapshot.generation,
        snapshot.total_processed,
        ingest.malformed_events,
        ingest.unknown_events,
        ingest.dropped_messages
    );
    println!();
    print_apps(&snapshot, &metadata, &args)?;
    println!();
    print_cells(&snapshot, args.top);
    println!();
    print_routes(&routes, args.top);
    println!();
    print_history(&history);
    Ok(())
}
