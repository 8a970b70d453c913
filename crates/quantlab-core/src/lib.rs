//! QuantLab Core - Deterministic backtesting, parameter optimization, and
//! portfolio risk analytics.
//!
//! This crate provides:
//! - Bar and OHLCV data types with a CSV loader and provider trait
//! - An event-driven, single-threaded backtest engine
//! - Performance metrics over equity curves and closed trades
//! - Grid / random / walk-forward parameter optimization (rayon at the
//!   outer level only)
//! - VaR, expected shortfall, correlation, Kelly, Monte Carlo, stress
//!   tests, and pre-trade validation

pub mod bar;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod event;
pub mod fill;
pub mod indicators;
pub mod metrics;
pub mod optimize;
pub mod order;
pub mod portfolio;
pub mod report;
pub mod risk;
pub mod stats;
pub mod strategy;

pub use bar::Bar;
pub use engine::{run_backtest, BacktestConfig, BacktestEngine, BacktestResult};
pub use error::{QuantError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bar::Bar;
    pub use crate::data::{DataProvider, InMemoryProvider};
    pub use crate::engine::{
        run_backtest, BacktestConfig, BacktestEngine, BacktestResult, PositionSizing, Severity,
    };
    pub use crate::error::{QuantError, Result};
    pub use crate::fill::{CommissionModel, Fill, FillSimulator, SlippageModel};
    pub use crate::metrics::{compute_metrics, PerformanceMetrics};
    pub use crate::optimize::{
        grid_search, random_search, run_walk_forward, Direction, Objective, OptimizationConfig,
        Optimizer, ParamValue, ParameterRange, WalkForwardConfig,
    };
    pub use crate::order::{Order, OrderSide, OrderType, TimeInForce};
    pub use crate::portfolio::{ExitReason, PortfolioTracker, Position, Trade};
    pub use crate::risk::{
        historical_var, kelly_criterion, monte_carlo_var, parametric_var, predefined_scenarios,
        project_portfolio, run_stress_test, validate_trade, CorrelationMatrix, MonteCarloConfig,
        ReturnsPanel, RiskLimits,
    };
    pub use crate::strategy::{Signal, SignalAction, Strategy};
}
