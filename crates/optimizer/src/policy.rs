//! Per-link decision rules.
//!
//! Success rate comes first: while transfers fail, the link backs off no
//! matter what throughput does. With a good success rate the decision
//! follows the throughput trend, much like a TCP congestion window.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::ema::{exponential_moving_average, magnitude_decreased};
use crate::fair_share::{enforce_throughput_limits, FairShareInput};
use crate::{
    NetLinkState, OptimizerConfig, OptimizerMode, Pair, PairState, Range, StorageLimits,
    StorageState,
};

/// Why a link got no decision this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A decision is persisted but this process has not seen the link yet.
    ColdStart,
    /// Nothing changed since the last decision and it is too recent.
    Steady,
    /// A newer cycle already stored a decision for the link.
    Stale,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ColdStart => write!(f, "first feedback since start, state stored"),
            SkipReason::Steady => write!(
                f,
                "same success rate and throughput EMA, not enough time passed since last update"
            ),
            SkipReason::Stale => write!(f, "superseded by a newer cycle"),
        }
    }
}

/// Inputs of one evaluation.
#[derive(Debug, Clone)]
pub struct PolicyInput<'a> {
    pub pair: &'a Pair,
    pub mode: OptimizerMode,
    pub range: Range,
    pub limits: &'a StorageLimits,
    /// Last persisted decision, 0 if none.
    pub previous_value: u32,
    /// State kept from the previous cycle of this process.
    pub previous: Option<&'a PairState>,
    pub current: PairState,
    pub storages: &'a HashMap<String, StorageState>,
    pub net_links: &'a HashMap<String, NetLinkState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub decision: u32,
    /// Change against the previous persisted decision.
    pub diff: i64,
    pub rationale: String,
    /// Snapshot to keep as previous state, with the decision recorded.
    pub state: PairState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Decided(Decision),
    Skipped {
        reason: SkipReason,
        /// Replaces the previous state when present.
        seed: Option<PairState>,
    },
}

fn decided(decision: u32, previous_value: u32, rationale: String, mut state: PairState) -> Evaluation {
    state.optimizer_decision = Some(decision);
    Evaluation::Decided(Decision {
        decision,
        diff: i64::from(decision) - i64::from(previous_value),
        rationale,
        state,
    })
}

fn elapsed(previous: &PairState, current: &PairState) -> Duration {
    (current.timestamp - previous.timestamp)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Run the decision rules for one link.
pub fn evaluate(input: PolicyInput<'_>, cfg: &OptimizerConfig) -> Evaluation {
    let PolicyInput {
        pair,
        mode,
        range,
        limits,
        previous_value,
        previous,
        mut current,
        storages,
        net_links,
    } = input;

    if previous_value == 0 {
        current.ema = current.throughput;
        let (decision, rationale) = if range.specific {
            (range.max, "No information. Use configured range max.")
        } else {
            (range.midpoint(), "No information. Go halfway.")
        };
        return decided(decision, previous_value, rationale.to_string(), current);
    }

    let Some(previous) = previous else {
        current.ema = current.throughput;
        tracing::debug!(pair = %pair, "store first feedback");
        return Evaluation::Skipped {
            reason: SkipReason::ColdStart,
            seed: Some(current),
        };
    };

    current.ema = exponential_moving_average(current.throughput, cfg.ema_alpha, previous.ema);

    if range.is_fixed() {
        return decided(range.min, previous_value, "Range fixed".to_string(), current);
    }

    let constraint = enforce_throughput_limits(&FairShareInput {
        pair,
        current: &current,
        limits,
        storages,
        net_links,
        range,
        previous_decision: previous_value,
        increase_step: cfg.increase_step_for(mode),
    });
    if let Some(constraint) = constraint {
        return decided(constraint.decision, previous_value, constraint.rationale, current);
    }

    if current.success_rate == previous.success_rate
        && current.ema == previous.ema
        && elapsed(previous, &current) < cfg.steady_interval
    {
        tracing::debug!(pair = %pair, "{}", SkipReason::Steady);
        return Evaluation::Skipped {
            reason: SkipReason::Steady,
            seed: None,
        };
    }

    let prev = i64::from(previous_value);
    let decrease = i64::from(cfg.decrease_step);
    let mut rationale = String::new();

    let mut decision = if current.success_rate < cfg.low_success_rate {
        if current.success_rate > previous.success_rate
            && current.success_rate >= cfg.base_success_rate
            && current.retry_count <= previous.retry_count
        {
            rationale.push_str("Bad link efficiency but progressively improving");
            prev
        } else if current.success_rate < previous.success_rate {
            rationale.push_str("Bad link efficiency");
            prev - decrease
        } else {
            rationale.push_str("Bad link efficiency, no changes");
            prev - decrease
        }
    } else if current.success_rate < previous.success_rate {
        rationale.push_str("Worse link efficiency");
        prev - decrease
    } else if current.ema == 0.0 {
        rationale.push_str("Steady, not enough throughput information");
        prev
    } else if current.queue_size < previous_value {
        rationale.push_str("Good link efficiency, queue emptying. Hold on");
        prev
    } else if current.ema < previous.ema {
        if magnitude_decreased(previous.filesize_avg, current.filesize_avg) {
            rationale.push_str("Good link efficiency, throughput deterioration, avg. filesize decreasing");
            prev + i64::from(cfg.increase_step)
        } else if magnitude_decreased(previous.ema, current.ema) {
            rationale.push_str("Good link efficiency, throughput deterioration");
            prev - decrease
        } else {
            rationale.push_str("Good link efficiency, small throughput deterioration");
            prev
        }
    } else if current.ema > previous.ema {
        rationale.push_str(
            "Good link efficiency, current average throughput is larger than the preceding average",
        );
        prev + i64::from(cfg.increase_step_for(mode))
    } else {
        rationale.push_str("Good link efficiency. Increment");
        prev + i64::from(cfg.increase_step)
    };

    if decision < i64::from(range.min) {
        decision = i64::from(range.min);
        rationale.push_str(". Hit lower range limit");
    } else if decision > i64::from(range.max) {
        decision = i64::from(range.max);
        rationale.push_str(". Hit upper range limit");
    }
    let mut decision = decision as u32;

    match mode {
        OptimizerMode::Conservative => {
            if decision > previous_value && current.queue_size < decision {
                decision = range.clamp(prev);
                rationale.push_str(". Not enough files in the queue");
            }
        }
        OptimizerMode::Normal | OptimizerMode::Aggressive => {
            let cap = current.queue_size.saturating_mul(cfg.max_streams_per_file);
            if decision > cap {
                decision = cap.max(range.min);
                rationale.push_str(". Capped by the queue size");
            }
        }
    }

    decided(decision, previous_value, rationale, current)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use similar_asserts::assert_eq;

    use super::*;

    struct Scenario {
        pair: Pair,
        mode: OptimizerMode,
        range: Range,
        limits: StorageLimits,
        previous_value: u32,
        previous: Option<PairState>,
        current: PairState,
        storages: HashMap<String, StorageState>,
        net_links: HashMap<String, NetLinkState>,
    }

    impl Scenario {
        /// A link that ran at decision 10 two minutes ago with a healthy state.
        fn new() -> Self {
            let now = Utc::now();
            let mut previous = PairState::new(now - TimeDelta::minutes(2));
            previous.success_rate = 100.0;
            previous.throughput = 1_000.0;
            previous.ema = 1_000.0;
            previous.filesize_avg = 1_000_000.0;
            previous.queue_size = 100;
            previous.active_count = 10;
            previous.optimizer_decision = Some(10);

            let mut current = previous.clone();
            current.timestamp = now;
            current.optimizer_decision = None;

            Self {
                pair: Pair::new("mock://a.cern.ch", "mock://b.desy.de"),
                mode: OptimizerMode::Conservative,
                range: Range::new(2, 20),
                limits: StorageLimits::default(),
                previous_value: 10,
                previous: Some(previous),
                current,
                storages: HashMap::new(),
                net_links: HashMap::new(),
            }
        }

        fn evaluate(&self, cfg: &OptimizerConfig) -> Evaluation {
            evaluate(
                PolicyInput {
                    pair: &self.pair,
                    mode: self.mode,
                    range: self.range,
                    limits: &self.limits,
                    previous_value: self.previous_value,
                    previous: self.previous.as_ref(),
                    current: self.current.clone(),
                    storages: &self.storages,
                    net_links: &self.net_links,
                },
                cfg,
            )
        }

        fn decide(&self) -> Decision {
            match self.evaluate(&OptimizerConfig::default()) {
                Evaluation::Decided(decision) => decision,
                other => panic!("expected a decision, got {other:?}"),
            }
        }
    }

    #[test]
    fn first_observation_goes_halfway() {
        let mut scenario = Scenario::new();
        scenario.previous_value = 0;
        scenario.previous = None;
        scenario.current.throughput = 321.0;

        let decision = scenario.decide();
        assert_eq!(decision.decision, 11);
        assert!(decision.rationale.contains("halfway"));
        assert_eq!(decision.state.ema, 321.0);
        assert_eq!(decision.state.optimizer_decision, Some(11));
    }

    #[test]
    fn first_observation_uses_configured_max() {
        let mut scenario = Scenario::new();
        scenario.previous_value = 0;
        scenario.range = Range::configured(4, 16);

        let decision = scenario.decide();
        assert_eq!(decision.decision, 16);
        assert_eq!(decision.diff, 16);
    }

    #[test]
    fn cold_start_seeds_without_deciding() {
        let mut scenario = Scenario::new();
        scenario.previous = None;
        scenario.current.throughput = 55.0;

        match scenario.evaluate(&OptimizerConfig::default()) {
            Evaluation::Skipped {
                reason: SkipReason::ColdStart,
                seed: Some(seed),
            } => assert_eq!(seed.ema, 55.0),
            other => panic!("unexpected evaluation {other:?}"),
        }
    }

    #[test]
    fn fixed_range_collapses() {
        let mut scenario = Scenario::new();
        scenario.range = Range::configured(7, 7);
        scenario.current.success_rate = 10.0;

        let decision = scenario.decide();
        assert_eq!(decision.decision, 7);
        assert_eq!(decision.rationale, "Range fixed");
    }

    #[test]
    fn steady_state_is_skipped() {
        let mut scenario = Scenario::new();
        let cfg = OptimizerConfig {
            steady_interval: Duration::from_secs(600),
            ..Default::default()
        };

        assert_eq!(scenario.evaluate(&cfg), Evaluation::Skipped {
            reason: SkipReason::Steady,
            seed: None,
        });

        // Past the steady interval the link is explored upward again.
        scenario.current.timestamp += TimeDelta::minutes(20);
        match scenario.evaluate(&cfg) {
            Evaluation::Decided(decision) => {
                assert_eq!(decision.decision, 11);
                assert_eq!(decision.rationale, "Good link efficiency. Increment");
            }
            other => panic!("unexpected evaluation {other:?}"),
        }
    }

    #[test]
    fn low_success_rate_decreases_by_step() {
        let mut scenario = Scenario::new();
        scenario.previous.as_mut().unwrap().success_rate = 95.0;
        scenario.current.success_rate = 40.0;

        let decision = scenario.decide();
        assert_eq!(decision.decision, 9);
        assert_eq!(decision.diff, -1);
        assert_eq!(decision.rationale, "Bad link efficiency");
    }

    #[test]
    fn low_but_improving_success_rate_holds() {
        let mut scenario = Scenario::new();
        scenario.previous.as_mut().unwrap().success_rate = 90.0;
        scenario.current.success_rate = 96.5;

        let decision = scenario.decide();
        assert_eq!(decision.decision, 10);
        assert_eq!(decision.rationale, "Bad link efficiency but progressively improving");

        scenario.current.retry_count = 3;
        let decision = scenario.decide();
        assert_eq!(decision.decision, 9);
        assert_eq!(decision.rationale, "Bad link efficiency, no changes");
    }

    #[test]
    fn worsening_success_rate_decreases() {
        let mut scenario = Scenario::new();
        scenario.current.success_rate = 98.0;

        let decision = scenario.decide();
        assert_eq!(decision.decision, 9);
        assert_eq!(decision.rationale, "Worse link efficiency");
    }

    #[test]
    fn no_throughput_signal_holds() {
        let mut scenario = Scenario::new();
        scenario.previous.as_mut().unwrap().ema = 0.0;
        scenario.current.throughput = 0.0;
        scenario.current.timestamp += TimeDelta::minutes(5);

        let decision = scenario.decide();
        assert_eq!(decision.decision, 10);
        assert_eq!(decision.rationale, "Steady, not enough throughput information");
    }

    #[test]
    fn draining_queue_holds() {
        let mut scenario = Scenario::new();
        scenario.current.queue_size = 4;
        scenario.current.throughput = 2_000.0;

        let decision = scenario.decide();
        assert_eq!(decision.decision, 10);
    }

    #[test]
    fn rising_throughput_increases_by_mode_step() {
        let mut scenario = Scenario::new();
        scenario.current.throughput = 2_000.0;
        assert_eq!(scenario.decide().decision, 11);

        scenario.mode = OptimizerMode::Aggressive;
        assert_eq!(scenario.decide().decision, 12);
    }

    #[test]
    fn throughput_drop_explained_by_smaller_files_increases() {
        let mut scenario = Scenario::new();
        scenario.current.throughput = 1.0;
        scenario.current.filesize_avg = 1_000.0;

        let decision = scenario.decide();
        assert_eq!(decision.decision, 11);
        assert!(decision.rationale.ends_with("avg. filesize decreasing"));
    }

    #[test]
    fn throughput_drop_by_an_order_of_magnitude_decreases() {
        let mut scenario = Scenario::new();
        // EMA of 1000 and a sample of 1 stays in the same magnitude.
        scenario.current.throughput = 1.0;
        assert_eq!(scenario.decide().decision, 10);

        // 3500 rounds to 10^4, the new EMA of about 2800 to 10^3.
        scenario.previous.as_mut().unwrap().ema = 3_500.0;
        scenario.current.throughput = 10.0;
        let decision = scenario.decide();
        assert_eq!(decision.decision, 9);
        assert_eq!(decision.rationale, "Good link efficiency, throughput deterioration");
    }

    #[test]
    fn decision_is_clamped_to_range() {
        let mut scenario = Scenario::new();
        scenario.previous_value = 20;
        scenario.current.throughput = 2_000.0;

        let decision = scenario.decide();
        assert_eq!(decision.decision, 20);
        assert_eq!(decision.rationale, "Good link efficiency, current average throughput is larger than the preceding average. Hit upper range limit");

        scenario.previous_value = 2;
        scenario.current.throughput = 1_000.0;
        scenario.current.success_rate = 10.0;
        let decision = scenario.decide();
        assert_eq!(decision.decision, 2);
        assert!(decision.rationale.ends_with(". Hit lower range limit"));
    }

    #[test]
    fn conservative_mode_needs_queued_work_to_grow() {
        let mut scenario = Scenario::new();
        scenario.current.throughput = 2_000.0;
        scenario.current.queue_size = 10;

        let decision = scenario.decide();
        assert_eq!(decision.decision, 10);
        assert!(decision.rationale.ends_with(". Not enough files in the queue"));
    }

    #[test]
    fn normal_mode_caps_at_queue_times_streams() {
        let mut scenario = Scenario::new();
        scenario.mode = OptimizerMode::Normal;
        scenario.range = Range::new(2, 200);
        scenario.previous_value = 100;
        scenario.current.queue_size = 100;
        scenario.current.throughput = 2_000.0;
        assert_eq!(scenario.decide().decision, 101);

        let cfg = OptimizerConfig {
            max_streams_per_file: 1,
            ..Default::default()
        };
        match scenario.evaluate(&cfg) {
            Evaluation::Decided(decision) => assert_eq!(decision.decision, 100),
            other => panic!("unexpected evaluation {other:?}"),
        }
    }

    #[test]
    fn violated_resource_short_circuits() {
        let mut scenario = Scenario::new();
        scenario.limits.throughput_destination = 100.0;
        scenario.current.throughput = 60.0;
        scenario.current.avg_active_connections = 12.0;
        scenario.current.active_count = 12;
        scenario.storages.insert(scenario.pair.destination.clone(), StorageState {
            as_dest_throughput: 120.0,
            as_dest_num_pairs: 2,
            ..Default::default()
        });

        let decision = scenario.decide();
        assert_eq!(decision.decision, 8);
        assert!(decision.rationale.contains("throughput limitation reached"));
    }

    #[test]
    fn decisions_stay_in_range() {
        let rates = [0.0, 40.0, 96.5, 98.0, 100.0];
        let throughputs = [0.0, 1.0, 900.0, 1_000.0, 50_000.0];
        let queues = [0, 3, 10, 500];
        let modes = [
            OptimizerMode::Conservative,
            OptimizerMode::Normal,
            OptimizerMode::Aggressive,
        ];

        for previous_value in [1, 2, 10, 20, 45] {
            for &rate in &rates {
                for &throughput in &throughputs {
                    for &queue in &queues {
                        for &mode in &modes {
                            let mut scenario = Scenario::new();
                            scenario.mode = mode;
                            scenario.previous_value = previous_value;
                            scenario.current.success_rate = rate;
                            scenario.current.throughput = throughput;
                            scenario.current.queue_size = queue;
                            if let Evaluation::Decided(decision) =
                                scenario.evaluate(&OptimizerConfig::default())
                            {
                                assert!(
                                    (2..=20).contains(&decision.decision),
                                    "decision {} out of range for {mode:?} rate {rate} throughput {throughput} queue {queue}",
                                    decision.decision
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}
