//! The backtest engine: a single-threaded, cooperative event loop.
//!
//! One run owns its portfolio, fill simulator, and event queue; the
//! strategy is a borrowed collaborator. Given identical inputs the run is
//! bit-identical: every ordering decision flows through the event queue's
//! `(timestamp, priority, sequence)` key or an explicit sort.

use crate::bar::Bar;
use crate::data::DataProvider;
use crate::error::{QuantError, Result};
use crate::event::{EventKind, EventQueue};
use crate::fill::{Fill, FillSimulator};
use crate::metrics::{compute_metrics, PerformanceMetrics};
use crate::order::{Order, OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::portfolio::{
    EquityPoint, ExitReason, FillMeta, PortfolioTracker, PositionSide, Trade,
};
use crate::strategy::{Signal, SignalAction, Strategy};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Strategy name used for engine-generated protective exit signals.
const PROTECTIVE_EXIT: &str = "protective_exit";

/// How the engine sizes orders when the signal does not specify a size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum PositionSizing {
    /// Always trade a fixed number of units.
    FixedQuantity(f64),
    /// Trade `floor(equity × fraction / price)` units.
    PercentOfEquity(f64),
    /// Trade `floor(cash / price)` units.
    MaxAffordable,
}

impl Default for PositionSizing {
    fn default() -> Self {
        PositionSizing::MaxAffordable
    }
}

/// Configuration for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub id: String,
    pub symbols: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: f64,
    #[serde(default)]
    pub fill: FillSimulator,
    #[serde(default)]
    pub sizing: PositionSizing,
    #[serde(default)]
    pub allow_short: bool,
}

impl BacktestConfig {
    pub fn new(
        id: impl Into<String>,
        symbols: Vec<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        initial_capital: f64,
    ) -> Self {
        Self {
            id: id.into(),
            symbols,
            start,
            end,
            initial_capital,
            fill: FillSimulator::default(),
            sizing: PositionSizing::MaxAffordable,
            allow_short: false,
        }
    }

    /// Surface configuration errors before any run begins.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(QuantError::Config("symbol list is empty".into()));
        }
        if self.start >= self.end {
            return Err(QuantError::Config(format!(
                "start {} must precede end {}",
                self.start, self.end
            )));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(QuantError::Config(format!(
                "initial_capital must be > 0, got {}",
                self.initial_capital
            )));
        }
        match self.sizing {
            PositionSizing::FixedQuantity(q) if q <= 0.0 => {
                return Err(QuantError::Config("fixed quantity must be > 0".into()));
            }
            PositionSizing::PercentOfEquity(p) if !(0.0..=1.0).contains(&p) || p == 0.0 => {
                return Err(QuantError::Config(
                    "percent-of-equity must be in (0, 1]".into(),
                ));
            }
            _ => {}
        }
        if self.fill.max_order_size_pct <= 0.0 {
            return Err(QuantError::Config(
                "max_order_size_pct must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Severity of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A diagnostic record attached to the result, ordered by emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub ts: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// The owned outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub config_id: String,
    pub metrics: PerformanceMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub records: Vec<RunRecord>,
    /// True when the cooperative stop flag ended the run early.
    pub stopped_early: bool,
}

impl BacktestResult {
    pub fn final_equity(&self) -> f64 {
        self.metrics.final_equity
    }

    pub fn records_at_least(&self, severity: Severity) -> impl Iterator<Item = &RunRecord> {
        self.records.iter().filter(move |r| r.severity >= severity)
    }
}

/// Per-symbol bar series, shared read-only across optimizer workers.
pub type BarData = HashMap<String, Vec<Bar>>;

/// Load bars for every configured symbol. Per-symbol failures become
/// warnings; the run proceeds if any symbol has data.
pub fn load_bar_data(
    provider: &dyn DataProvider,
    config: &BacktestConfig,
    records: &mut Vec<RunRecord>,
) -> Result<BarData> {
    let mut data = BarData::new();
    for symbol in &config.symbols {
        match provider.load(symbol, config.start, config.end) {
            Ok(bars) => {
                data.insert(symbol.clone(), bars);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "skipping symbol: data unavailable");
                records.push(RunRecord {
                    ts: config.start,
                    severity: Severity::Warning,
                    message: format!("data unavailable for {symbol}: {e}"),
                    context: Some(symbol.clone()),
                });
            }
        }
    }
    if data.is_empty() {
        return Err(QuantError::Data("no symbol has data in range".into()));
    }
    Ok(data)
}

/// Run a full backtest against a data provider.
pub fn run_backtest(
    provider: &dyn DataProvider,
    config: &BacktestConfig,
    strategy: &mut dyn Strategy,
) -> Result<BacktestResult> {
    let mut engine = BacktestEngine::new(config.clone())?;
    engine.run(provider, strategy)
}

/// The event-loop engine. Exclusively owns its queue, portfolio, and fill
/// simulator for the duration of a run.
pub struct BacktestEngine {
    config: BacktestConfig,
    stop: Arc<AtomicBool>,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Cooperative cancellation flag, checked at the top of each loop
    /// iteration. On stop, remaining positions are still closed and a
    /// partial result is returned.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn run(
        &mut self,
        provider: &dyn DataProvider,
        strategy: &mut dyn Strategy,
    ) -> Result<BacktestResult> {
        let mut records = Vec::new();
        let data = load_bar_data(provider, &self.config, &mut records)?;
        self.run_with_data(&data, strategy, records)
    }

    /// Run against preloaded bar data (the optimizer path: bars are shared
    /// read-only across workers).
    pub fn run_with_data(
        &mut self,
        data: &BarData,
        strategy: &mut dyn Strategy,
        mut records: Vec<RunRecord>,
    ) -> Result<BacktestResult> {
        let run = RunState::new(&self.config, strategy, &mut records);
        let outcome = run.execute(data, &self.stop)?;
        tracing::info!(
            config_id = %self.config.id,
            trades = outcome.trades.len(),
            final_equity = outcome.metrics.final_equity,
            stopped_early = outcome.stopped_early,
            "backtest complete"
        );
        Ok(outcome)
    }
}

/// Mutable state of one run, separated from the engine so borrows stay
/// tractable.
struct RunState<'a> {
    config: &'a BacktestConfig,
    strategy: &'a mut dyn Strategy,
    records: &'a mut Vec<RunRecord>,
    portfolio: PortfolioTracker,
    queue: EventQueue,
    histories: HashMap<String, Vec<Bar>>,
    latest: HashMap<String, Bar>,
    resting: Vec<Order>,
    submitted: HashMap<u64, Order>,
    pending_exits: HashMap<String, (ExitReason, f64)>,
    next_order_id: u64,
}

impl<'a> RunState<'a> {
    fn new(
        config: &'a BacktestConfig,
        strategy: &'a mut dyn Strategy,
        records: &'a mut Vec<RunRecord>,
    ) -> Self {
        Self {
            config,
            strategy,
            records,
            portfolio: PortfolioTracker::new(config.initial_capital, config.allow_short),
            queue: EventQueue::new(),
            histories: HashMap::new(),
            latest: HashMap::new(),
            resting: Vec::new(),
            submitted: HashMap::new(),
            pending_exits: HashMap::new(),
            next_order_id: 1,
        }
    }

    fn execute(mut self, data: &BarData, stop: &AtomicBool) -> Result<BacktestResult> {
        self.strategy
            .initialize()
            .map_err(|e| QuantError::Strategy(format!("initialize failed: {e}")))?;

        // Seed market-data events. Symbol order within a timestamp follows
        // the configured symbol list via insertion sequence.
        for symbol in &self.config.symbols {
            if let Some(bars) = data.get(symbol) {
                for bar in bars {
                    self.queue.push(bar.ts, EventKind::MarketData(bar.clone()));
                }
            }
        }

        let mut stopped_early = false;
        while let Some(event) = self.queue.pop() {
            if stop.load(Ordering::Relaxed) {
                stopped_early = true;
                self.record(event.ts, Severity::Warning, "run stopped by caller", None);
                break;
            }
            match event.kind {
                EventKind::MarketData(bar) => self.on_market_data(bar)?,
                EventKind::Signal(signal) => self.on_signal(signal),
                EventKind::Order(order) => self.on_order(order),
                EventKind::Fill(fill) => self.on_fill(fill)?,
            }
        }

        if let Err(e) = self.strategy.cleanup() {
            let ts = self.config.end;
            self.record(ts, Severity::Error, format!("strategy cleanup failed: {e}"), None);
        }
        self.close_remaining_positions()?;

        let metrics = compute_metrics(
            self.portfolio.equity_curve(),
            self.portfolio.closed_trades(),
            self.config.initial_capital,
            self.portfolio.total_commission(),
            self.portfolio.total_slippage(),
        );
        Ok(BacktestResult {
            config_id: self.config.id.clone(),
            metrics,
            equity_curve: self.portfolio.equity_curve().to_vec(),
            trades: self.portfolio.closed_trades().to_vec(),
            records: std::mem::take(self.records),
            stopped_early,
        })
    }

    fn on_market_data(&mut self, bar: Bar) -> Result<()> {
        self.histories
            .entry(bar.symbol.clone())
            .or_default()
            .push(bar.clone());
        self.latest.insert(bar.symbol.clone(), bar.clone());

        self.process_resting_orders(&bar);

        let prices: HashMap<String, f64> = self
            .latest
            .iter()
            .map(|(s, b)| (s.clone(), b.close))
            .collect();
        self.portfolio.update_prices(&prices, bar.ts);
        self.portfolio.verify_accounting()?;

        // Protective exits are evaluated before the strategy is consulted.
        if !self.pending_exits.contains_key(&bar.symbol) {
            if let Some((reason, level)) = self.portfolio.exit_trigger(&bar) {
                self.pending_exits
                    .insert(bar.symbol.clone(), (reason, level));
                let signal = Signal::new(
                    &bar.symbol,
                    exit_action(self.portfolio.position(&bar.symbol)),
                    PROTECTIVE_EXIT,
                    bar.ts,
                )
                .with_reason(match reason {
                    ExitReason::StopLoss => "stop-loss level crossed",
                    ExitReason::TakeProfit => "take-profit level crossed",
                    _ => "protective exit",
                });
                self.queue.push(bar.ts, EventKind::Signal(signal));
            }
        }

        let history = &self.histories[&bar.symbol];
        if history.len() >= self.strategy.warmup_period().max(1) {
            match self.strategy.on_bar(&bar, history) {
                Ok(Some(signal)) => self.queue.push(bar.ts, EventKind::Signal(signal)),
                Ok(None) => {}
                Err(e) => {
                    self.record(
                        bar.ts,
                        Severity::Error,
                        format!("strategy on_bar failed: {e}"),
                        Some(bar.symbol.clone()),
                    );
                }
            }
        }
        Ok(())
    }

    /// Re-attempt resting orders against a fresh bar of their symbol.
    fn process_resting_orders(&mut self, bar: &Bar) {
        let mut keep = Vec::with_capacity(self.resting.len());
        for mut order in std::mem::take(&mut self.resting) {
            if order.symbol != bar.symbol {
                keep.push(order);
                continue;
            }
            // An exit order whose position is already gone is stale.
            if order.exit_reason.is_some() && self.portfolio.position(&order.symbol).is_none() {
                order.status = OrderStatus::Cancelled;
                self.pending_exits.remove(&order.symbol);
                continue;
            }
            if order.time_in_force == TimeInForce::Day
                && bar.ts.num_days_from_ce() > order.created_at.num_days_from_ce()
            {
                order.status = OrderStatus::Expired;
                self.record(
                    bar.ts,
                    Severity::Info,
                    format!("order {} expired (Day)", order.id),
                    Some(order.symbol.clone()),
                );
                continue;
            }
            if order.order_type == OrderType::TrailingStop {
                self.config.fill.update_trailing_stop(&mut order, bar);
            }
            match self.config.fill.simulate(&order, bar) {
                Some(fill) => {
                    order.status = OrderStatus::Filled;
                    self.submitted.insert(order.id, order);
                    self.queue.push(bar.ts, EventKind::Fill(fill));
                }
                None => keep.push(order),
            }
        }
        self.resting = keep;
    }

    fn on_signal(&mut self, signal: Signal) {
        if signal.action == SignalAction::Hold {
            return;
        }
        if signal.strategy == PROTECTIVE_EXIT {
            self.submit_protective_exit(&signal);
            return;
        }
        let Some(side) = signal.order_side() else {
            return;
        };
        let Some(bar) = self.latest.get(&signal.symbol).cloned() else {
            self.record(
                signal.ts,
                Severity::Error,
                "signal for symbol without market data",
                Some(signal.symbol.clone()),
            );
            return;
        };
        let Some(quantity) = self.order_quantity(&signal, side, bar.close) else {
            self.record(
                signal.ts,
                Severity::Warning,
                "signal dropped: computed quantity is zero",
                Some(signal.symbol.clone()),
            );
            return;
        };

        let id = self.next_order_id;
        self.next_order_id += 1;
        let mut order = Order::market(id, &signal.symbol, side, quantity, signal.ts);
        if let Some(entry) = signal.entry_price {
            order = order.with_type(OrderType::Limit).with_limit(entry);
        }
        order.stop_loss = signal.stop_loss;
        order.take_profit = signal.take_profit;
        order.strategy = Some(signal.strategy.clone());
        match order.validate() {
            Ok(()) => self.queue.push(signal.ts, EventKind::Order(order)),
            Err(e) => {
                self.record(
                    signal.ts,
                    Severity::Error,
                    format!("invalid order from signal: {e}"),
                    Some(signal.symbol.clone()),
                );
            }
        }
    }

    fn submit_protective_exit(&mut self, signal: &Signal) {
        let Some((reason, level)) = self.pending_exits.get(&signal.symbol).copied() else {
            return;
        };
        let Some(position) = self.portfolio.position(&signal.symbol) else {
            self.pending_exits.remove(&signal.symbol);
            return;
        };
        let side = match position.side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        };
        let id = self.next_order_id;
        self.next_order_id += 1;
        let order = Order::market(id, &signal.symbol, side, position.quantity, signal.ts)
            .with_exit_reason(reason);
        let order = match reason {
            ExitReason::TakeProfit => order.with_type(OrderType::TakeProfit).with_limit(level),
            _ => order.with_type(OrderType::Stop).with_stop(level),
        };
        self.queue.push(signal.ts, EventKind::Order(order));
    }

    fn order_quantity(&self, signal: &Signal, side: OrderSide, price: f64) -> Option<f64> {
        if let Some(size) = signal.position_size {
            return (size > 0.0).then_some(size);
        }
        // A sell against an existing long closes the whole position.
        if side == OrderSide::Sell {
            if let Some(position) = self.portfolio.position(&signal.symbol) {
                if position.side == PositionSide::Long {
                    return Some(position.quantity);
                }
            }
        }
        if price <= 0.0 {
            return None;
        }
        let quantity = match self.config.sizing {
            PositionSizing::FixedQuantity(q) => q,
            PositionSizing::PercentOfEquity(p) => (self.portfolio.equity() * p / price).floor(),
            PositionSizing::MaxAffordable => (self.portfolio.cash() / price).floor(),
        };
        (quantity > 0.0).then_some(quantity)
    }

    fn on_order(&mut self, mut order: Order) {
        let Some(bar) = self.latest.get(&order.symbol).cloned() else {
            self.record(
                order.created_at,
                Severity::Error,
                format!("order {} has no market data", order.id),
                Some(order.symbol.clone()),
            );
            return;
        };
        if order.order_type == OrderType::TrailingStop {
            self.config.fill.update_trailing_stop(&mut order, &bar);
        }
        match self.config.fill.simulate(&order, &bar) {
            Some(fill) => {
                order.status = OrderStatus::Filled;
                self.submitted.insert(order.id, order);
                self.queue.push(bar.ts, EventKind::Fill(fill));
            }
            None => match order.time_in_force {
                TimeInForce::Ioc | TimeInForce::Fok => {
                    order.status = OrderStatus::Cancelled;
                    self.record(
                        bar.ts,
                        Severity::Info,
                        format!("order {} cancelled ({:?})", order.id, order.time_in_force),
                        Some(order.symbol.clone()),
                    );
                }
                _ if order.order_type == OrderType::Market => {
                    // Market orders only miss on the volume cap.
                    order.status = OrderStatus::Cancelled;
                    self.record(
                        bar.ts,
                        Severity::Warning,
                        format!(
                            "order {} rejected: exceeds {}% of bar volume",
                            order.id,
                            self.config.fill.max_order_size_pct * 100.0
                        ),
                        Some(order.symbol.clone()),
                    );
                }
                _ => self.resting.push(order),
            },
        }
    }

    fn on_fill(&mut self, fill: Fill) -> Result<()> {
        let meta = self
            .submitted
            .get(&fill.order_id)
            .map(|order| FillMeta {
                stop_loss: order.stop_loss,
                take_profit: order.take_profit,
                exit_reason: order.exit_reason,
                strategy: order.strategy.clone(),
            })
            .unwrap_or_default();
        match self.portfolio.apply_fill(&fill, &meta) {
            Ok(closed) => {
                if closed.is_some() || self.portfolio.position(&fill.symbol).is_none() {
                    self.pending_exits.remove(&fill.symbol);
                }
            }
            Err(QuantError::Critical(msg)) => return Err(QuantError::Critical(msg)),
            Err(e) => {
                self.record(
                    fill.ts,
                    Severity::Error,
                    format!("fill rejected: {e}"),
                    Some(fill.symbol.clone()),
                );
                return Ok(());
            }
        }
        if let Err(e) = self.strategy.on_fill(&fill) {
            self.record(
                fill.ts,
                Severity::Error,
                format!("strategy on_fill failed: {e}"),
                Some(fill.symbol.clone()),
            );
        }
        Ok(())
    }

    /// Close every remaining position at its final bar close with
    /// `ExitReason::EndOfBacktest`, then refresh the last equity point.
    fn close_remaining_positions(&mut self) -> Result<()> {
        let mut symbols: Vec<String> = self.portfolio.positions().keys().cloned().collect();
        symbols.sort();
        let mut last_ts = None;
        for symbol in symbols {
            let Some(bar) = self.latest.get(&symbol).cloned() else {
                continue;
            };
            let position = self.portfolio.position(&symbol).cloned();
            let Some(position) = position else { continue };
            let side = match position.side {
                PositionSide::Long => OrderSide::Sell,
                PositionSide::Short => OrderSide::Buy,
            };
            let fill = Fill {
                order_id: 0,
                symbol: symbol.clone(),
                side,
                quantity: position.quantity,
                price: bar.close,
                ts: bar.ts,
                commission: self
                    .config
                    .fill
                    .commission
                    .calculate(position.quantity, bar.close),
                slippage: 0.0,
            };
            let meta = FillMeta {
                exit_reason: Some(ExitReason::EndOfBacktest),
                ..FillMeta::default()
            };
            match self.portfolio.apply_fill(&fill, &meta) {
                Ok(_) => {}
                Err(QuantError::Critical(msg)) => return Err(QuantError::Critical(msg)),
                Err(e) => {
                    self.record(
                        bar.ts,
                        Severity::Error,
                        format!("end-of-backtest close failed: {e}"),
                        Some(symbol.clone()),
                    );
                }
            }
            last_ts = Some(last_ts.map_or(bar.ts, |prev: DateTime<Utc>| prev.max(bar.ts)));
        }
        if let Some(ts) = last_ts {
            let prices: HashMap<String, f64> = self
                .latest
                .iter()
                .map(|(s, b)| (s.clone(), b.close))
                .collect();
            self.portfolio.update_prices(&prices, ts);
            self.portfolio.verify_accounting()?;
        }
        Ok(())
    }

    fn record(
        &mut self,
        ts: DateTime<Utc>,
        severity: Severity,
        message: impl Into<String>,
        context: Option<String>,
    ) {
        let message = message.into();
        match severity {
            Severity::Error | Severity::Critical => {
                tracing::error!(%ts, context = ?context, "{message}");
            }
            Severity::Warning => tracing::warn!(%ts, context = ?context, "{message}"),
            Severity::Info => tracing::trace!(%ts, context = ?context, "{message}"),
        }
        self.records.push(RunRecord {
            ts,
            severity,
            message,
            context,
        });
    }
}

fn exit_action(position: Option<&crate::portfolio::Position>) -> SignalAction {
    match position.map(|p| p.side) {
        Some(PositionSide::Short) => SignalAction::Buy,
        _ => SignalAction::Sell,
    }
}
