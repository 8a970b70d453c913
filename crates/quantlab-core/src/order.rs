//! Order types and lifecycle.

use crate::error::{QuantError, Result};
use crate::portfolio::ExitReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Order type. Price fields required by each variant are validated by
/// [`Order::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TakeProfit,
    TrailingStop,
}

/// How far a trailing stop trails its water mark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum TrailingOffset {
    /// Fixed dollar amount.
    Amount(f64),
    /// Fraction of the water mark (0.05 = 5%).
    Percent(f64),
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Valid until the next calendar day boundary.
    Day,
    /// Good till cancelled: rests until filled or cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
}

/// Order lifecycle state. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }
}

/// An order submitted to the fill simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing: Option<TrailingOffset>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Stop-loss to attach to the resulting position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    /// Take-profit to attach to the resulting position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    /// Exit reason to record when this order closes a position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
    /// Name of the strategy whose signal originated this order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl Order {
    /// A market order with GTC defaults; builder-style setters refine it.
    pub fn market(
        id: u64,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            order_type: OrderType::Market,
            side,
            quantity,
            limit_price: None,
            stop_price: None,
            trailing: None,
            time_in_force: TimeInForce::Gtc,
            status: OrderStatus::Pending,
            created_at,
            stop_loss: None,
            take_profit: None,
            exit_reason: None,
            strategy: None,
        }
    }

    pub fn with_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    pub fn with_limit(mut self, price: f64) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_stop(mut self, price: f64) -> Self {
        self.stop_price = Some(price);
        self
    }

    pub fn with_trailing(mut self, offset: TrailingOffset) -> Self {
        self.trailing = Some(offset);
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    pub fn with_exit_reason(mut self, reason: ExitReason) -> Self {
        self.exit_reason = Some(reason);
        self
    }

    /// Validate structural requirements before submission.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(QuantError::Order("empty symbol".into()));
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(QuantError::Order(format!(
                "order {}: quantity must be > 0, got {}",
                self.id, self.quantity
            )));
        }
        match self.order_type {
            OrderType::Market => {}
            OrderType::Limit | OrderType::TakeProfit => {
                if self.limit_price.is_none() {
                    return Err(QuantError::Order(format!(
                        "order {}: {:?} requires limit_price",
                        self.id, self.order_type
                    )));
                }
            }
            OrderType::Stop => {
                if self.stop_price.is_none() {
                    return Err(QuantError::Order(format!(
                        "order {}: Stop requires stop_price",
                        self.id
                    )));
                }
            }
            OrderType::StopLimit => {
                if self.stop_price.is_none() || self.limit_price.is_none() {
                    return Err(QuantError::Order(format!(
                        "order {}: StopLimit requires stop_price and limit_price",
                        self.id
                    )));
                }
            }
            OrderType::TrailingStop => {
                if self.trailing.is_none() {
                    return Err(QuantError::Order(format!(
                        "order {}: TrailingStop requires a trailing offset",
                        self.id
                    )));
                }
            }
        }
        if let Some(p) = self.limit_price {
            if !p.is_finite() || p <= 0.0 {
                return Err(QuantError::Order(format!(
                    "order {}: invalid limit_price {p}",
                    self.id
                )));
            }
        }
        if let Some(p) = self.stop_price {
            if !p.is_finite() || p <= 0.0 {
                return Err(QuantError::Order(format!(
                    "order {}: invalid stop_price {p}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
