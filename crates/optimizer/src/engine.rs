use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use error_stack::ResultExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backend::{DataSource, SystemTimeSource, TimeSource};
use crate::ema::calculate_time_frame;
use crate::policy::{evaluate, Evaluation, PolicyInput, SkipReason};
use crate::range::{net_link_max_active, resolve_range, resolve_storage_limits};
use crate::sink::{DecisionRecord, DecisionSink};
use crate::store::PairStateStore;
use crate::streams::optimize_streams;
use crate::{
    NetLinkState, OptimizerConfig, OptimizerError, Pair, PairState, Result, StorageState,
};

/// Window used to estimate how long transfers on a link take.
const AVERAGE_DURATION_WINDOW: Duration = Duration::from_secs(30 * 60);

/// What happened to one link in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Decided {
        decision: u32,
        diff: i64,
        streams: u32,
        rationale: String,
    },
    Skipped(SkipReason),
    /// The link could not be evaluated. Other links were not affected.
    Failed(String),
}

/// Summary of one optimizer cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcomes: Vec<(Pair, PairOutcome)>,
    pub evicted: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn outcome(&self, pair: &Pair) -> Option<&PairOutcome> {
        self.outcomes
            .iter()
            .find(|(candidate, _)| candidate == pair)
            .map(|(_, outcome)| outcome)
    }

    pub fn decided(&self) -> usize {
        self.count(|outcome| matches!(outcome, PairOutcome::Decided { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, PairOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, PairOutcome::Failed(_)))
    }

    fn count(&self, predicate: impl Fn(&PairOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .count()
    }
}

/// Read-only view shared by the workers of one cycle.
struct CycleContext<D: DataSource> {
    cycle: u64,
    data_source: Arc<D>,
    store: Arc<PairStateStore>,
    sinks: Vec<Arc<dyn DecisionSink>>,
    cfg: Arc<OptimizerConfig>,
    storages: HashMap<String, StorageState>,
    net_links: HashMap<String, NetLinkState>,
    states: HashMap<Pair, PairState>,
}

impl<D: DataSource> CycleContext<D> {
    fn optimize_pair(&self, pair: &Pair) -> Result<PairOutcome> {
        let Some(current) = self.states.get(pair) else {
            return Err(error_stack::report!(OptimizerError::pair_evaluation(
                "no state snapshot for pair"
            )));
        };
        let ds = &self.data_source;
        let cfg = &self.cfg;

        let mode = ds.get_optimizer_mode(pair)?;
        let (configured_range, configured_limits) = ds.get_pair_limits(pair)?;
        let limits = resolve_storage_limits(pair, configured_limits, &self.storages, cfg);
        let link_max_active = net_link_max_active(&current.net_links, &self.net_links, cfg);
        let range = resolve_range(pair, configured_range, &limits, link_max_active, cfg)?;
        tracing::debug!(pair = %pair, range = %range, mode = ?mode, "optimizer range");

        let previous_value = ds.get_optimizer_value(pair)?;
        let previous = self.store.get(pair);
        self.store.touch(pair, self.cycle);

        let evaluation = evaluate(
            PolicyInput {
                pair,
                mode,
                range,
                limits: &limits,
                previous_value,
                previous: previous.as_ref(),
                current: current.clone(),
                storages: &self.storages,
                net_links: &self.net_links,
            },
            cfg,
        );

        match evaluation {
            Evaluation::Decided(decided) => {
                if self.store.cycle_of(pair).is_some_and(|written| written > self.cycle) {
                    tracing::warn!(pair = %pair, cycle = self.cycle, "{}", SkipReason::Stale);
                    return Ok(PairOutcome::Skipped(SkipReason::Stale));
                }
                ds.store_optimizer_decision(
                    pair,
                    decided.decision,
                    &decided.state,
                    decided.diff,
                    &decided.rationale,
                )?;
                // The previous state follows the persisted decision.
                self.store.record(pair, decided.state.clone(), self.cycle);

                let streams = optimize_streams(
                    mode,
                    decided.decision,
                    decided.state.queue_size,
                    cfg.max_streams_per_file,
                );
                ds.store_optimizer_streams(pair, streams)?;

                let record = DecisionRecord {
                    pair: pair.clone(),
                    decision: decided.decision,
                    diff: decided.diff,
                    streams,
                    rationale: decided.rationale,
                    state: decided.state,
                    cycle: self.cycle,
                };
                for sink in &self.sinks {
                    sink.notify_decision(&record);
                }

                Ok(PairOutcome::Decided {
                    decision: record.decision,
                    diff: record.diff,
                    streams,
                    rationale: record.rationale,
                })
            }
            Evaluation::Skipped { reason, seed } => {
                if let Some(seed) = seed {
                    self.store.record(pair, seed, self.cycle);
                }
                tracing::debug!(pair = %pair, reason = %reason, "no decision");
                Ok(PairOutcome::Skipped(reason))
            }
        }
    }
}

fn snapshot_pair<D: DataSource>(
    ds: &D,
    clock: &dyn TimeSource,
    pair: &Pair,
) -> Result<PairState> {
    let mut state = PairState::new(clock.now());

    state.avg_duration = ds.get_average_duration(pair, AVERAGE_DURATION_WINDOW)?;
    let window = calculate_time_frame(state.avg_duration);

    let success = ds.get_success_rate_for_pair(pair, window)?;
    state.success_rate = success.rate.clamp(0.0, 100.0);
    state.retry_count = success.retry_count;

    state.active_count = ds.get_active(pair)?;
    state.queue_size = ds.get_submitted(pair)?;

    let info = ds.get_current_interval_transfer_info(pair, window, state.active_count)?;
    state.throughput = info.throughput.max(0.0);
    state.filesize_avg = info.filesize_avg;
    state.filesize_std_dev = info.filesize_std_dev;
    state.avg_active_connections = info.avg_active_connections.max(0.0);

    state.net_links = ds.get_net_links(pair)?;
    Ok(state)
}

/// Rebuild the windowed throughput and pair counts of every resource from
/// the links of this cycle. Values reported by the data source for these
/// fields are discarded.
///
/// `unobserved` links count towards their endpoints with no throughput. Their
/// network links are unknown, so they are not counted there.
fn aggregate_throughput(
    states: &HashMap<Pair, PairState>,
    unobserved: &[Pair],
    storages: &mut HashMap<String, StorageState>,
    net_links: &mut HashMap<String, NetLinkState>,
) {
    for storage in storages.values_mut() {
        storage.as_source_throughput = 0.0;
        storage.as_dest_throughput = 0.0;
        storage.as_source_num_pairs = 0;
        storage.as_dest_num_pairs = 0;
    }
    for link in net_links.values_mut() {
        link.throughput = 0.0;
        link.num_pairs = 0;
    }

    let observed = states.iter().map(|(pair, state)| (pair, state.throughput));
    let unobserved = unobserved.iter().map(|pair| (pair, 0.0));
    for (pair, throughput) in observed.chain(unobserved) {
        let source = storages.entry(pair.source.clone()).or_default();
        source.as_source_throughput += throughput;
        source.as_source_num_pairs += 1;

        let destination = storages.entry(pair.destination.clone()).or_default();
        destination.as_dest_throughput += throughput;
        destination.as_dest_num_pairs += 1;
    }

    for state in states.values() {
        for link in &state.net_links {
            let link = net_links.entry(link.clone()).or_default();
            link.throughput += state.throughput;
            link.num_pairs += 1;
        }
    }
}

async fn blocking<T, F>(phase: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error_stack::report!(OptimizerError::data_source(format!(
                "{phase} task failed: {e}"
            )))
        })?
}

/// Connection-count optimizer driving every active link once per cycle.
pub struct Optimizer<D: DataSource> {
    data_source: Arc<D>,
    clock: Arc<dyn TimeSource>,
    store: Arc<PairStateStore>,
    sinks: Vec<Arc<dyn DecisionSink>>,
    cfg: Arc<OptimizerConfig>,
    cycle: AtomicU64,
    cycle_lock: Mutex<()>,
}

impl<D: DataSource> Optimizer<D> {
    pub fn new(
        data_source: Arc<D>,
        store: Arc<PairStateStore>,
        cfg: OptimizerConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            data_source,
            clock: Arc::new(SystemTimeSource),
            store,
            sinks: Vec::new(),
            cfg: Arc::new(cfg),
            cycle: AtomicU64::new(0),
            cycle_lock: Mutex::new(()),
        })
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DecisionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn store(&self) -> &Arc<PairStateStore> {
        &self.store
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.cfg
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    /// Run one cycle over every active link.
    ///
    /// A data source failure aborts the cycle and is returned. Failures
    /// confined to one link are reported in its [`PairOutcome`].
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _serialized = self.cycle_lock.lock().await;
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();

        let ds = self.data_source.clone();
        let (pairs, mut storages, mut net_links) = blocking("cycle setup", move || {
            ds.refresh()?;
            let mut pairs = ds.get_active_pairs()?;
            pairs.sort();
            pairs.dedup();
            Ok((pairs, ds.get_storage_states()?, ds.get_net_link_states()?))
        })
        .await
        .attach_printable_lazy(|| format!("cycle {cycle}"))?;

        let mut outcomes = Vec::with_capacity(pairs.len());

        let snapshots = {
            let ds = self.data_source.clone();
            let clock = self.clock.clone();
            self.for_each_pair(&pairs, move |pair| {
                snapshot_pair(ds.as_ref(), clock.as_ref(), pair)
            })
            .await
            .attach_printable_lazy(|| format!("cycle {cycle}, phase snapshot"))?
        };
        let mut states = HashMap::with_capacity(snapshots.len());
        let mut unobserved = Vec::new();
        for (pair, snapshot) in snapshots {
            match snapshot {
                Ok(state) => {
                    states.insert(pair, state);
                }
                Err(e) => {
                    tracing::warn!(pair = %pair, phase = "snapshot", error = ?e, "pair skipped");
                    unobserved.push(pair.clone());
                    outcomes.push((pair, PairOutcome::Failed(e.current_context().to_string())));
                }
            }
        }

        aggregate_throughput(&states, &unobserved, &mut storages, &mut net_links);

        let evaluated: Vec<Pair> = pairs
            .iter()
            .filter(|pair| states.contains_key(*pair))
            .cloned()
            .collect();
        let ctx = Arc::new(CycleContext {
            cycle,
            data_source: self.data_source.clone(),
            store: self.store.clone(),
            sinks: self.sinks.clone(),
            cfg: self.cfg.clone(),
            storages,
            net_links,
            states,
        });
        let results = self
            .for_each_pair(&evaluated, move |pair| ctx.optimize_pair(pair))
            .await
            .attach_printable_lazy(|| format!("cycle {cycle}, phase optimize"))?;

        for (pair, result) in results {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(pair = %pair, phase = "optimize", error = ?e, "pair skipped");
                    PairOutcome::Failed(e.current_context().to_string())
                }
            };
            outcomes.push((pair, outcome));
        }
        outcomes.sort_by(|(a, _), (b, _)| a.cmp(b));

        let evicted = self.store.evict_idle(cycle, self.cfg.max_idle_cycles);
        let report = CycleReport {
            cycle,
            outcomes,
            evicted,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            cycle,
            decided = report.decided(),
            skipped = report.skipped(),
            failed = report.failed(),
            evicted,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "optimized {} pairs",
            report.outcomes.len()
        );
        Ok(report)
    }

    /// Run `work` for every pair on blocking threads, at most
    /// `worker_pool_size` at a time.
    ///
    /// Per-pair errors are returned alongside the pair. The first cycle-fatal
    /// error stops the remaining work and is returned instead.
    async fn for_each_pair<T, F>(
        &self,
        pairs: &[Pair],
        work: F,
    ) -> Result<Vec<(Pair, Result<T>)>>
    where
        T: Send + 'static,
        F: Fn(&Pair) -> Result<T> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let permits = Arc::new(Semaphore::new(self.cfg.worker_pool_size));
        let mut workers = JoinSet::new();

        for pair in pairs {
            let work = work.clone();
            let permits = permits.clone();
            let pair = pair.clone();
            workers.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let report = error_stack::report!(OptimizerError::pair_evaluation(format!(
                            "worker pool closed: {e}"
                        )));
                        return (pair, Err(report));
                    }
                };
                let task_pair = pair.clone();
                let result = match tokio::task::spawn_blocking(move || work(&task_pair)).await {
                    Ok(result) => result,
                    Err(e) => Err(error_stack::report!(OptimizerError::pair_evaluation(format!(
                        "worker failed: {e}"
                    )))),
                };
                (pair, result)
            });
        }

        let mut results = Vec::with_capacity(pairs.len());
        while let Some(joined) = workers.join_next().await {
            let (pair, result) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    tracing::error!(error = %e, "optimizer worker task lost");
                    continue;
                }
            };
            if let Err(e) = &result {
                if e.current_context().is_cycle_fatal() {
                    workers.abort_all();
                    return result
                        .map(|_| Vec::new())
                        .attach_printable_lazy(|| format!("pair {pair}"));
                }
            }
            results.push((pair, result));
        }
        Ok(results)
    }

    /// Run cycles every `interval` until `cancellation_token` fires.
    ///
    /// Cancellation is only observed between cycles, so a cycle in flight
    /// always finishes its writes.
    pub async fn run(&self, interval: Duration, cancellation_token: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "starting optimizer loop");
        loop {
            if cancellation_token.is_cancelled() {
                break;
            }
            if let Err(e) = self.run_cycle().await {
                tracing::error!("optimizer cycle aborted, retrying on next tick: {e:?}");
            }
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("optimizer loop stopped");
    }
}
