use std::sync::Arc;

use chrono::Utc;
use libfirehose_model::{Envelope, EventRate};
#[cfg(not(test))]
use log::{debug, info, warn};
use tokio::{
    sync::mpsc::{channel, Receiver, Sender},
    task::JoinHandle,
    time::MissedTickBehavior,
};

#[cfg(test)]
use std::{println as debug, println as info, println as warn}; // Workaround to use prinltn! for logs.

use crate::{
    config::StatsConfig,
    dispatcher::EventDispatcher,
    history::HistoryRecorder,
    snapshot::{SnapshotManager, StatsSnapshot},
    stats_graph::StreamId,
};

/**
 * One monitoring session: the live statistics graph, the tasks feeding it and the
 * periodic tasks publishing snapshots and history from it.
 *
 * Everything is owned here and dropped with the session; there's no global state.
 * ```ignore
 * let mut session = FirehoseSession::new(StatsConfig::default());
 * let tx = session.spawn_stream(0);
 * session.spawn_periodic_tasks();
 * tx.send(envelope).await?;
 * let stats = session.displayed_stats();
 * ```
 */
pub struct FirehoseSession {
    config: StatsConfig,
    dispatcher: EventDispatcher,
    snapshots: Arc<SnapshotManager>,
    history: Arc<HistoryRecorder>,
    stream_tasks: Vec<(StreamId, JoinHandle<()>)>,
    periodic_tasks: Vec<JoinHandle<()>>,
}

impl FirehoseSession {
    pub fn new(config: StatsConfig) -> FirehoseSession {
        let dispatcher = EventDispatcher::new(&config);
        let snapshots = Arc::new(SnapshotManager::new(
            dispatcher.live_state().clone(),
            dispatcher.counters().clone(),
            config.route_limits,
            config.stale_threshold(),
        ));
        let history = Arc::new(HistoryRecorder::new(
            &config.history,
            dispatcher.counters().clone(),
            Utc::now(),
        ));
        FirehoseSession {
            config,
            dispatcher,
            snapshots,
            history,
            stream_tasks: Vec::new(),
            periodic_tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    /// The dispatcher feeding the live graph, e.g., to process events synchronously
    /// or to register routes
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /**
     * Start the ingest task for one firehose subscriber. Envelopes sent into the
     * returned channel are processed in order. The task ends once every sender is
     * dropped.
     */
    pub fn spawn_stream(&mut self, stream_id: StreamId) -> Sender<Envelope> {
        let (tx, rx) = channel(self.config.stream_queue_size);
        let dispatcher = self.dispatcher.clone();
        let join = tokio::spawn(async move { ingest_loop(dispatcher, stream_id, rx).await });
        self.stream_tasks.push((stream_id, join));
        tx
    }

    /// Start publishing snapshots and history records on the configured intervals
    pub fn spawn_periodic_tasks(&mut self) {
        if !self.periodic_tasks.is_empty() {
            warn!("Periodic tasks already running; not starting them again");
            return;
        }
        let snapshots = self.snapshots.clone();
        let snapshot_interval = self.config.snapshot_interval;
        self.periodic_tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(snapshot_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                snapshots.take_snapshot();
            }
        }));
        let history = self.history.clone();
        let history_tick = self.config.history_tick;
        self.periodic_tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(history_tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick fires right away; that interval is empty
            interval.tick().await;
            loop {
                interval.tick().await;
                history.tick();
            }
        }));
        info!(
            "Publishing snapshots every {:?}, history records every {:?}",
            snapshot_interval, history_tick
        );
    }

    /// Publish a new generation right away
    pub fn publish_now(&self) -> Arc<StatsSnapshot> {
        self.snapshots.take_snapshot()
    }

    /// Take a history record right away
    pub fn tick_history_now(&self) -> Arc<Vec<EventRate>> {
        self.history.tick()
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn history(&self) -> &Arc<HistoryRecorder> {
        &self.history
    }

    /// The latest published generation. Never blocks.
    pub fn displayed_stats(&self) -> Arc<StatsSnapshot> {
        self.snapshots.displayed()
    }

    /// The latest published history, oldest first. Never blocks.
    pub fn displayed_history(&self) -> Arc<Vec<EventRate>> {
        self.history.displayed()
    }

    /// Explicit reset: forget all statistics, counters and history
    pub fn clear(&self) {
        let now = Utc::now();
        self.dispatcher.clear();
        self.snapshots.reset(now);
        self.history.clear(now);
        info!("Statistics cleared");
    }

    /// Wait for every ingest task to finish. The caller must have dropped all
    /// stream senders, otherwise this waits forever.
    pub async fn drain_streams(&mut self) {
        for (stream_id, join) in self.stream_tasks.drain(..) {
            if let Err(e) = join.await {
                warn!("Ingest task for stream {} failed: {}", stream_id, e);
            }
        }
    }

    /// Stop the periodic tasks
    pub fn shutdown(&mut self) {
        for task in self.periodic_tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for FirehoseSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn ingest_loop(dispatcher: EventDispatcher, stream_id: StreamId, mut rx: Receiver<Envelope>) {
    debug!("Ingest task for firehose stream {} started", stream_id);
    while let Some(envelope) = rx.recv().await {
        dispatcher.process(stream_id, &envelope);
    }
    debug!(
        "Firehose stream {} closed; ingest task exiting",
        stream_id
    );
}
