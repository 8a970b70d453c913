//! Benchmark suite for the event loop and Monte Carlo VaR.
//!
//! Covers:
//! - single-symbol engine throughput at several bar counts
//! - grid search over a small strategy lattice
//! - 10k-iteration Monte Carlo VaR over 10 positions (<500 ms budget)

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quantlab_core::bar::Bar;
use quantlab_core::engine::{BacktestConfig, BacktestEngine, BarData};
use quantlab_core::indicators::MaType;
use quantlab_core::optimize::{
    grid_search, Direction, Objective, OptimizationConfig, Optimizer, ParamValue, ParameterRange,
    ParameterSpace, StrategyBuilder,
};
use quantlab_core::risk::{monte_carlo_var, ReturnsPanel};
use quantlab_core::strategy::{MaCrossoverStrategy, Strategy};
use std::sync::Arc;

/// Deterministic synthetic OHLCV series (no RNG so runs are comparable).
fn generate_bars(num_bars: usize) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
    let mut price = 100.0_f64;
    (0..num_bars)
        .map(|i| {
            let wave = (i as f64 * 0.13).sin() * 0.012 + (i as f64 * 0.031).cos() * 0.007;
            price = (price * (1.0 + wave)).max(10.0);
            let open = price * 0.998;
            let close = price;
            let high = open.max(close) * 1.004;
            let low = open.min(close) * 0.996;
            Bar::new(
                "BENCH",
                start + Duration::days(i as i64),
                open,
                high,
                low,
                close,
                1_000_000.0,
            )
        })
        .collect()
}

fn bar_data(num_bars: usize) -> BarData {
    let mut data = BarData::new();
    data.insert("BENCH".into(), generate_bars(num_bars));
    data
}

fn template(num_bars: usize) -> BacktestConfig {
    let start = Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap();
    BacktestConfig::new(
        "bench",
        vec!["BENCH".into()],
        start,
        start + Duration::days(num_bars as i64),
        100_000.0,
    )
}

fn bench_engine_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_throughput");
    for num_bars in [252usize, 1_260, 2_520] {
        let data = bar_data(num_bars);
        let config = template(num_bars);
        group.throughput(Throughput::Elements(num_bars as u64));
        group.bench_with_input(BenchmarkId::from_parameter(num_bars), &num_bars, |b, _| {
            b.iter(|| {
                let mut engine = BacktestEngine::new(config.clone()).unwrap();
                let mut strategy = MaCrossoverStrategy::new(10, 50, MaType::Sma);
                black_box(
                    engine
                        .run_with_data(&data, &mut strategy, Vec::new())
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

fn crossover_builder() -> Arc<StrategyBuilder> {
    Arc::new(|params| {
        let fast = params
            .get("fast")
            .and_then(ParamValue::as_usize)
            .unwrap_or(10);
        let slow = params
            .get("slow")
            .and_then(ParamValue::as_usize)
            .unwrap_or(50);
        Ok(Box::new(MaCrossoverStrategy::new(fast, slow, MaType::Sma)) as Box<dyn Strategy>)
    })
}

fn bench_grid_search(c: &mut Criterion) {
    let data = bar_data(756);
    let config = template(756);
    let mut space = ParameterSpace::new();
    space.insert(
        "fast".into(),
        ParameterRange::Integer {
            min: 5,
            max: 20,
            step: 5,
        },
    );
    space.insert(
        "slow".into(),
        ParameterRange::Integer {
            min: 40,
            max: 100,
            step: 20,
        },
    );
    let opt = OptimizationConfig::new(Objective::Sharpe, Direction::Maximize, space);

    c.bench_function("grid_search_16_points", |b| {
        b.iter(|| {
            let optimizer = Optimizer::new(&data, &config, crossover_builder());
            black_box(grid_search(&optimizer, &opt).unwrap())
        })
    });
}

fn bench_monte_carlo_var(c: &mut Criterion) {
    let symbols: Vec<String> = (0..10).map(|i| format!("S{i}")).collect();
    let series: Vec<Vec<f64>> = (0..10usize)
        .map(|k| {
            (0..250)
                .map(|i| ((i * (k + 3)) % 37) as f64 / 2_000.0 - 0.008)
                .collect()
        })
        .collect();
    let panel = ReturnsPanel::new(symbols, series).unwrap();
    let values: Vec<f64> = (0..10).map(|i| 10_000.0 + i as f64 * 1_000.0).collect();

    c.bench_function("monte_carlo_var_10k_x_10_positions", |b| {
        b.iter(|| {
            black_box(monte_carlo_var(&panel, &values, 0.95, 1, 10_000, 42).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_engine_throughput,
    bench_grid_search,
    bench_monte_carlo_var
);
criterion_main!(benches);
