//! Demo workloads
//!
//! Small registers exercising each collapse strategy, the observer, the
//! adaptive controller, the scheduler and the cross-learning bus. Each demo
//! returns a one-line summary; `run_demo` picks one by name.

use crate::adaptive::{AdaptivePolicy, AdaptiveThresholds};
use crate::collapse::EvaluateFn;
use crate::cross_learning::{CrossLearningBus, MessageKind};
use crate::types::{CollapseStrategy, QubitData};
use crate::{QuantumEngine, Register};
use anyhow::{bail, Result};
use std::sync::Arc;

pub const DEMO_NAMES: [&str; 12] = [
    "square",
    "algorithm-race",
    "redundant",
    "data-parallel",
    "ai-recommended",
    "adaptive",
    "predictive",
    "cross-search",
    "advanced",
    "multidim",
    "temporal",
    "ensemble",
];

/// Run one demo by name
pub fn run_demo(engine: &QuantumEngine, name: &str) -> Result<String> {
    let summary = match name {
        "square" => square(engine)?,
        "algorithm-race" => algorithm_race(engine)?,
        "redundant" => redundant(engine)?,
        "data-parallel" => data_parallel(engine)?,
        "ai-recommended" => ai_recommended(engine)?,
        "adaptive" => adaptive(engine)?,
        "predictive" => predictive(engine)?,
        "cross-search" => cross_search(engine)?,
        "advanced" => advanced(engine)?,
        "multidim" => multidim(engine)?,
        "temporal" => temporal(engine)?,
        "ensemble" => ensemble(engine)?,
        other => bail!("unknown demo '{}' (try one of: {})", other, DEMO_NAMES.join(", ")),
    };
    log::info!("[{}] {}", name, summary);
    Ok(summary)
}

fn evaluator<T: QubitData>(f: fn(&T) -> i64) -> EvaluateFn<T> {
    Arc::new(f)
}

fn square(engine: &QuantumEngine) -> Result<String> {
    let mut register = engine.register::<i64>(4)?;
    for (i, n) in [2i64, 3, 4, 5].into_iter().enumerate() {
        register.init_qubit(i, Arc::new(|x: &mut i64| *x *= *x), n, 8)?;
    }
    register.set_strategy(CollapseStrategy::FirstWins);
    engine.run(&mut register)?;

    let squares: Vec<i64> = (0..register.len()).filter_map(|i| register.data(i).copied()).collect();
    Ok(format!("squares {:?}, first wins -> {}", squares, register.output()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SortRun {
    pub algorithm: &'static str,
    pub size: i64,
    pub result_time: i64,
}

fn algorithm_race(engine: &QuantumEngine) -> Result<String> {
    let mut register = engine.register::<SortRun>(3)?;
    let algorithms: [(&'static str, fn(&mut SortRun)); 3] = [
        ("bubble", |s| s.result_time = s.size * s.size),
        ("quick", |s| s.result_time = s.size * 10),
        ("merge", |s| s.result_time = s.size * 12),
    ];
    for (i, (algorithm, run)) in algorithms.into_iter().enumerate() {
        let data = SortRun {
            algorithm,
            size: 100,
            result_time: 0,
        };
        register.init_qubit(i, Arc::new(run), data, std::mem::size_of::<SortRun>())?;
    }
    register.set_strategy(CollapseStrategy::Best);
    register.set_evaluate(evaluator(|s: &SortRun| -s.result_time));
    engine.run(&mut register)?;

    let winner = register.output();
    Ok(format!("fastest sort: {} ({} ticks)", winner.algorithm, winner.result_time))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SumTask {
    pub a: i64,
    pub b: i64,
    pub result: i64,
}

fn redundant(engine: &QuantumEngine) -> Result<String> {
    let mut register = engine.register::<SumTask>(3)?;
    for i in 0..3 {
        let data = SumTask { a: 10, b: 20, result: 0 };
        register.init_qubit(
            i,
            Arc::new(|t: &mut SumTask| t.result = t.a + t.b),
            data,
            std::mem::size_of::<SumTask>(),
        )?;
    }
    register.set_strategy(CollapseStrategy::Validate);
    engine.run(&mut register)?;
    Ok(format!("3 redundant computations agree on {}", register.output().result))
}

/// Partial sum over `[start, start + count)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeSum {
    pub start: i64,
    pub count: i64,
    pub sum: i64,
}

impl RangeSum {
    pub fn new(start: i64, count: i64) -> Self {
        Self { start, count, sum: 0 }
    }

    fn compute(&mut self) {
        self.sum = (self.start..self.start + self.count).sum();
    }
}

/// Install `count`-wide range sums covering `[0, qubits * count)`
pub fn range_sum_register(
    engine: &QuantumEngine,
    qubits: usize,
    count: i64,
) -> Result<Register<RangeSum>> {
    let mut register = engine.register::<RangeSum>(qubits)?;
    for i in 0..qubits {
        register.init_qubit(
            i,
            Arc::new(RangeSum::compute),
            RangeSum::new(i as i64 * count, count),
            std::mem::size_of::<RangeSum>(),
        )?;
    }
    register.set_combine(Arc::new(|results: &[&RangeSum], out: &mut RangeSum| {
        out.start = results.iter().map(|r| r.start).min().unwrap_or(0);
        out.count = results.iter().map(|r| r.count).sum();
        out.sum = results.iter().map(|r| r.sum).sum();
    }));
    Ok(register)
}

fn data_parallel(engine: &QuantumEngine) -> Result<String> {
    let mut register = range_sum_register(engine, 4, 25)?;
    register.set_strategy(CollapseStrategy::Combine);
    engine.run(&mut register)?;
    Ok(format!("sum of 0..100 over 4 qubits = {}", register.output().sum))
}

fn ai_recommended(engine: &QuantumEngine) -> Result<String> {
    let mut register = range_sum_register(engine, 4, 25)?;
    register.set_wait_all(true);

    let profile = register.profile();
    let mut recommended = engine.observer().recommend_strategy(&profile);
    let confidence = engine.observer().confidence(&profile, recommended);
    if !register.collapse_config().supports(recommended) {
        log::warn!("Observer recommended {} but this workload has no callback for it", recommended);
        recommended = CollapseStrategy::Combine;
    }
    register.set_strategy(recommended);
    engine.run(&mut register)?;

    Ok(format!(
        "observer recommended {} (confidence {:.2}); result sum {}",
        recommended,
        confidence,
        register.output().sum
    ))
}

fn adaptive(engine: &QuantumEngine) -> Result<String> {
    let mut register = range_sum_register(engine, 8, 50)?;
    for i in 0..register.len() {
        let slow = Arc::new(|range: &mut RangeSum| {
            std::thread::sleep(std::time::Duration::from_millis(2));
            range.compute();
        });
        let data = RangeSum::new(i as i64 * 50, 50);
        register.init_qubit(i, slow, data, std::mem::size_of::<RangeSum>())?;
    }
    register.set_strategy(CollapseStrategy::FirstWins);

    // Any elapsed time with under half the qubits done counts as slow
    let controller =
        engine.adaptive_controller(AdaptivePolicy::Aggressive, CollapseStrategy::FirstWins);
    controller.set_thresholds(AdaptiveThresholds {
        timeout_ms: 0,
        check_interval_ms: 0,
        ..engine.config().adaptive
    });
    register.set_adaptive(controller.clone());
    engine.run(&mut register)?;

    let total: i64 = (0..register.len()).filter_map(|i| register.data(i)).map(|r| r.sum).sum();
    let state = controller.state();
    let switched = if state.has_switched {
        format!("switched {} -> {}", state.original_strategy, state.current_strategy)
    } else {
        format!("kept {}", state.original_strategy)
    };
    Ok(format!("adaptive run {}; partial sums total {}", switched, total))
}

fn variable_task(range: &mut RangeSum) {
    range.sum = 0;
    for i in range.start..range.start + range.count {
        range.sum += i;
        for _ in 0..range.count / 10 {
            range.sum = std::hint::black_box(range.sum);
        }
    }
}

fn predictive(engine: &QuantumEngine) -> Result<String> {
    let counts = [10i64, 50, 20, 80, 30, 100];
    let mut register = engine.register::<RangeSum>(counts.len())?;
    for (i, &count) in counts.iter().enumerate() {
        // Result size grows with the range so predictions differ per qubit.
        register.init_qubit(
            i,
            Arc::new(variable_task),
            RangeSum::new(i as i64 * 20, count),
            count as usize * 4,
        )?;
    }

    let order = {
        let mut scheduler = engine.scheduler();
        scheduler.predict(&register);
        scheduler.get_order(&register)
    };
    engine.run(&mut register)?;

    let stats = engine.scheduler().stats();
    Ok(format!(
        "scheduled order {:?}; {} learned patterns, smoothed error {:.2}",
        order, stats.learned_patterns, stats.avg_prediction_error
    ))
}

/// One slice of a distributed search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchTask {
    pub qubit_id: u32,
    pub target: u32,
    pub start: u32,
    pub end: u32,
    pub found_at: Option<u32>,
    pub found_here: bool,
    pub scanned: u32,
}

/// Qubit function scanning its slice and stopping on a peer's `BestFound`
pub fn search_with_bus(
    bus: Arc<CrossLearningBus>,
) -> impl Fn(&mut SearchTask) + Send + Sync + 'static {
    move |task: &mut SearchTask| {
        for i in task.start..task.end {
            if let Some(msg) = bus.receive(task.qubit_id) {
                if msg.kind == MessageKind::BestFound {
                    task.found_at = msg.read_u32(0);
                    bus.record_feedback(true);
                    return;
                }
                bus.record_feedback(false);
            }

            task.scanned += 1;
            if i == task.target {
                task.found_at = Some(i);
                task.found_here = true;
                bus.broadcast_best(task.qubit_id, &i.to_le_bytes(), 100);
                return;
            }
        }
    }
}

/// Six qubits searching `[0, 30000)` for `target`, sharing the engine's bus
pub fn search_register(engine: &QuantumEngine, target: u32) -> Result<Register<SearchTask>> {
    const QUBITS: u32 = 6;
    const SLICE: u32 = 5000;

    let mut register = engine.register::<SearchTask>(QUBITS as usize)?;
    for i in 0..QUBITS {
        let task = SearchTask {
            qubit_id: i,
            target,
            start: i * SLICE,
            end: (i + 1) * SLICE,
            ..SearchTask::default()
        };
        register.init_qubit(
            i as usize,
            Arc::new(search_with_bus(engine.bus().clone())),
            task,
            std::mem::size_of::<u32>(),
        )?;
    }
    register.set_strategy(CollapseStrategy::Best);
    register.set_evaluate(evaluator(|t: &SearchTask| {
        if t.found_here {
            2
        } else {
            t.found_at.is_some() as i64
        }
    }));
    Ok(register)
}

fn cross_search(engine: &QuantumEngine) -> Result<String> {
    let bus = engine.bus();
    bus.clear();

    let mut register = search_register(engine, 23456)?;
    engine.run(&mut register)?;

    let scanned: u32 =
        (0..register.len()).filter_map(|i| register.data(i)).map(|t| t.scanned).sum();
    let stats = bus.stats();
    let summary = match (register.output().found_at, bus.check_convergence()) {
        (Some(at), Some(owner)) => format!(
            "target found at {} by qubit {}; {} of 30000 candidates scanned, \
             {} messages sent, {} helpful",
            at, owner, scanned, stats.messages_sent, stats.helpful_messages
        ),
        _ => format!("target not found after scanning {} candidates", scanned),
    };
    bus.clear();
    Ok(summary)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizationResult {
    pub quality: i64,
    pub computation_cost: i64,
    pub result_value: i64,
}

const fn opt(quality: i64, computation_cost: i64, result_value: i64) -> OptimizationResult {
    OptimizationResult {
        quality,
        computation_cost,
        result_value,
    }
}

const FUZZY_RESULTS: [OptimizationResult; 5] =
    [opt(60, 10, 100), opt(85, 25, 170), opt(45, 5, 90), opt(70, 15, 140), opt(55, 8, 110)];
const PROGRESSIVE_RESULTS: [OptimizationResult; 5] =
    [opt(40, 10, 80), opt(55, 12, 110), opt(70, 15, 140), opt(50, 8, 100), opt(45, 7, 90)];
const SPECULATIVE_RESULTS: [OptimizationResult; 5] =
    [opt(65, 10, 130), opt(90, 30, 180), opt(60, 12, 120), opt(55, 8, 110), opt(70, 15, 140)];

fn collapse_fixed<T: QubitData>(
    engine: &QuantumEngine,
    strategy: CollapseStrategy,
    data: &[T],
    configure: impl FnOnce(&mut Register<T>) -> crate::Result<()>,
) -> Result<T> {
    let mut register = engine.register::<T>(data.len())?;
    for (i, item) in data.iter().enumerate() {
        register.init_qubit(i, Arc::new(|_: &mut T| {}), item.clone(), std::mem::size_of::<T>())?;
    }
    register.set_strategy(strategy);
    configure(&mut register)?;
    engine.run(&mut register)?;
    Ok(register.output().clone())
}

fn advanced(engine: &QuantumEngine) -> Result<String> {
    let quality = evaluator(|r: &OptimizationResult| r.quality);
    let mut picks = Vec::new();
    for (strategy, data) in [
        (CollapseStrategy::Fuzzy, &FUZZY_RESULTS),
        (CollapseStrategy::Progressive, &PROGRESSIVE_RESULTS),
        (CollapseStrategy::Speculative, &SPECULATIVE_RESULTS),
    ] {
        let evaluate = quality.clone();
        let picked = collapse_fixed(engine, strategy, data, |r| {
            r.set_evaluate(evaluate);
            Ok(())
        })?;
        picks.push(format!("{} -> quality {}", strategy, picked.quality));
    }
    Ok(picks.join(", "))
}

/// Output quality, speed and resource usage of one candidate algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultidimResult {
    pub quality: i64,
    pub speed: i64,
    pub resources: i64,
    pub result_value: i64,
}

fn multidim(engine: &QuantumEngine) -> Result<String> {
    let data = [
        MultidimResult { quality: 95, speed: 30, resources: 80, result_value: 0 },
        MultidimResult { quality: 60, speed: 90, resources: 40, result_value: 0 },
        MultidimResult { quality: 70, speed: 50, resources: 20, result_value: 0 },
        MultidimResult { quality: 80, speed: 70, resources: 50, result_value: 0 },
        MultidimResult { quality: 40, speed: 95, resources: 90, result_value: 0 },
    ];

    let mut picks = Vec::new();
    let mixes = [("quality", [70, 20, 10]), ("speed", [20, 70, 10]), ("balanced", [33, 33, 34])];
    for (label, weights) in mixes {
        let mut register = engine.register::<MultidimResult>(data.len())?;
        for (i, item) in data.iter().enumerate() {
            register.init_qubit(
                i,
                Arc::new(|r: &mut MultidimResult| r.result_value = r.quality * 10 + r.speed),
                *item,
                std::mem::size_of::<MultidimResult>(),
            )?;
        }
        register.set_strategy(CollapseStrategy::Multidim);
        register.set_multidim(
            Some(evaluator(|r: &MultidimResult| r.quality)),
            Some(evaluator(|r: &MultidimResult| r.speed)),
            Some(evaluator(|r: &MultidimResult| 100 - r.resources)),
            weights,
        );
        engine.run(&mut register)?;
        let picked = register.output();
        picks.push(format!(
            "{}: q{}/s{}/r{}",
            label, picked.quality, picked.speed, picked.resources
        ));
    }
    Ok(picks.join(", "))
}

/// Candidate whose quality drifts by `trend` per iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemporalResult {
    pub iteration: i64,
    pub base_quality: i64,
    pub trend: i64,
    pub current_quality: i64,
}

const TEMPORAL_CANDIDATES: [(i64, i64); 5] = [(85, -3), (60, 5), (40, 8), (80, 0), (65, -2)];

fn temporal_step(r: &mut TemporalResult) {
    r.current_quality = (r.base_quality + r.trend * r.iteration).clamp(0, 100);
}

fn temporal(engine: &QuantumEngine) -> Result<String> {
    let mut runs = Vec::new();
    for trend_weight in [20, 80] {
        let mut register = engine.register::<TemporalResult>(TEMPORAL_CANDIDATES.len())?;
        for (i, &(base_quality, trend)) in TEMPORAL_CANDIDATES.iter().enumerate() {
            let data = TemporalResult {
                iteration: 0,
                base_quality,
                trend,
                current_quality: 0,
            };
            let size = std::mem::size_of::<TemporalResult>();
            register.init_qubit(i, Arc::new(temporal_step), data, size)?;
        }
        register.set_strategy(CollapseStrategy::Temporal);
        register.set_evaluate(evaluator(|r: &TemporalResult| r.current_quality));
        register.set_temporal(5, trend_weight);

        let mut picks = Vec::new();
        for iteration in 1..=4 {
            for i in 0..register.len() {
                if let Some(data) = register.data_mut(i) {
                    data.iteration = iteration;
                }
            }
            engine.run(&mut register)?;
            let picked = register.output();
            picks.push(format!("{}{:+}", picked.base_quality, picked.trend));
        }
        runs.push(format!("trend weight {}: [{}]", trend_weight, picks.join(" ")));
    }
    Ok(runs.join(", "))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnsembleResult {
    pub quality: i64,
    pub speed: i64,
    pub consistency: i64,
    pub result_value: i64,
}

fn ensemble(engine: &QuantumEngine) -> Result<String> {
    let data = [
        EnsembleResult { quality: 90, speed: 40, consistency: 60, result_value: 0 },
        EnsembleResult { quality: 70, speed: 70, consistency: 70, result_value: 0 },
        EnsembleResult { quality: 50, speed: 95, consistency: 55, result_value: 0 },
        EnsembleResult { quality: 80, speed: 45, consistency: 95, result_value: 0 },
        EnsembleResult { quality: 40, speed: 45, consistency: 50, result_value: 0 },
    ];
    let quality = evaluator(|r: &EnsembleResult| r.quality);
    let speed = evaluator(|r: &EnsembleResult| r.speed);

    type Dimension = Option<EvaluateFn<EnsembleResult>>;
    let setups: [(&str, Dimension, Dimension, [i64; 3], Vec<(CollapseStrategy, i64)>); 3] = [
        (
            "best+speed",
            Some(quality.clone()),
            Some(speed.clone()),
            [0, 100, 0],
            vec![(CollapseStrategy::Best, 50), (CollapseStrategy::Multidim, 50)],
        ),
        (
            "three-way",
            Some(quality.clone()),
            None,
            [100, 0, 0],
            vec![
                (CollapseStrategy::Best, 40),
                (CollapseStrategy::Fuzzy, 30),
                (CollapseStrategy::Multidim, 30),
            ],
        ),
        (
            "quality-weighted",
            None,
            Some(speed.clone()),
            [0, 100, 0],
            vec![(CollapseStrategy::Best, 70), (CollapseStrategy::Multidim, 30)],
        ),
    ];

    let mut picks = Vec::new();
    for (label, dim_quality, dim_speed, weights, members) in setups {
        let evaluate = quality.clone();
        let picked = collapse_fixed(engine, CollapseStrategy::Ensemble, &data, |r| {
            r.set_evaluate(evaluate);
            r.set_multidim(dim_quality, dim_speed, None, weights);
            r.set_ensemble(&members)
        })?;
        picks.push(format!(
            "{}: q{}/s{}/c{}",
            label, picked.quality, picked.speed, picked.consistency
        ));
    }
    Ok(picks.join(", "))
}
