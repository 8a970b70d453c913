//! Kelly criterion position sizing.
//!
//! `f* = (p·b − (1 − p)) / b` with `b = avg_win / |avg_loss|`, clamped to
//! `[0, 0.25]` before the full/half/quarter variants are derived.

use super::RiskError;
use crate::portfolio::Trade;
use serde::{Deserialize, Serialize};

/// Hard cap on the Kelly fraction.
pub const KELLY_CAP: f64 = 0.25;

/// Sizing recommendation derived from the clamped fraction and the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KellyRecommendation {
    /// Negative or zero edge: do not size up.
    NoEdge,
    Minimal,
    Conservative,
    Moderate,
    Aggressive,
}

impl KellyRecommendation {
    fn derive(fraction: f64, expected_value: f64) -> Self {
        if fraction <= 0.0 || expected_value <= 0.0 {
            Self::NoEdge
        } else if fraction < 0.05 {
            Self::Minimal
        } else if fraction < 0.10 {
            Self::Conservative
        } else if fraction < 0.20 {
            Self::Moderate
        } else {
            Self::Aggressive
        }
    }
}

/// Kelly sizing report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KellySizing {
    pub win_rate: f64,
    pub avg_win: f64,
    /// Positive magnitude of the average losing trade.
    pub avg_loss: f64,
    /// Odds ratio `b = avg_win / avg_loss`.
    pub payoff_ratio: f64,
    /// Clamped Kelly fraction.
    pub full: f64,
    pub half: f64,
    pub quarter: f64,
    /// Per-trade expected value as a fraction of risk.
    pub expected_value: f64,
    pub recommendation: KellyRecommendation,
    /// Set when the fraction had to be clamped or the loss history was
    /// too thin to trust.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Compute Kelly sizing from win rate and average win/loss magnitudes.
pub fn kelly_criterion(win_rate: f64, avg_win: f64, avg_loss: f64) -> Result<KellySizing, RiskError> {
    if !(0.0..=1.0).contains(&win_rate) {
        return Err(RiskError::InvalidParameter(format!(
            "win_rate must be in [0, 1], got {win_rate}"
        )));
    }
    if avg_win < 0.0 || avg_loss < 0.0 || !avg_win.is_finite() || !avg_loss.is_finite() {
        return Err(RiskError::InvalidParameter(
            "avg_win and avg_loss must be non-negative and finite".into(),
        ));
    }

    let p = win_rate;
    let q = 1.0 - p;
    let expected_value = p * avg_win - q * avg_loss;

    let (raw, note) = if avg_loss == 0.0 {
        // b is undefined without losses; cap rather than report infinity.
        let note = "no loss history: fraction capped".to_string();
        (if p > 0.0 && avg_win > 0.0 { KELLY_CAP } else { 0.0 }, Some(note))
    } else {
        let b = avg_win / avg_loss;
        if b == 0.0 {
            (0.0, None)
        } else {
            ((p * b - q) / b, None)
        }
    };

    let full = raw.clamp(0.0, KELLY_CAP);
    let note = if note.is_none() && raw > KELLY_CAP {
        Some(format!("raw fraction {raw:.3} clamped to {KELLY_CAP}"))
    } else {
        note
    };
    let payoff_ratio = if avg_loss > 0.0 { avg_win / avg_loss } else { 0.0 };

    Ok(KellySizing {
        win_rate,
        avg_win,
        avg_loss,
        payoff_ratio,
        full,
        half: full / 2.0,
        quarter: full / 4.0,
        expected_value,
        recommendation: KellyRecommendation::derive(full, expected_value),
        note,
    })
}

/// Kelly sizing from a closed-trade history.
pub fn kelly_from_trades(trades: &[Trade]) -> Result<KellySizing, RiskError> {
    if trades.is_empty() {
        return Err(RiskError::InvalidParameter(
            "no closed trades to size from".into(),
        ));
    }
    let wins: Vec<f64> = trades
        .iter()
        .map(|t| t.net_pnl)
        .filter(|p| *p > 0.0)
        .collect();
    let losses: Vec<f64> = trades
        .iter()
        .map(|t| t.net_pnl)
        .filter(|p| *p < 0.0)
        .collect();
    let win_rate = wins.len() as f64 / trades.len() as f64;
    let avg_win = crate::stats::mean(&wins);
    let avg_loss = crate::stats::mean(&losses).abs();
    kelly_criterion(win_rate, avg_win, avg_loss)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textbook_kelly_fraction() {
        // p = 0.6, W = 100, L = 100: f* = (0.6*1 - 0.4)/1 = 0.2
        let k = kelly_criterion(0.6, 100.0, 100.0).unwrap();
        assert!((k.full - 0.2).abs() < 1e-12);
        assert!((k.half - 0.1).abs() < 1e-12);
        assert!((k.quarter - 0.05).abs() < 1e-12);
        assert_eq!(k.recommendation, KellyRecommendation::Aggressive);
        assert!(k.note.is_none());
    }

    #[test]
    fn negative_edge_clamps_to_zero() {
        let k = kelly_criterion(0.3, 50.0, 100.0).unwrap();
        assert_eq!(k.full, 0.0);
        assert_eq!(k.recommendation, KellyRecommendation::NoEdge);
    }

    #[test]
    fn large_fraction_clamps_to_cap() {
        // p = 0.9, b = 3: raw = (2.7 - 0.1)/3 ≈ 0.867
        let k = kelly_criterion(0.9, 300.0, 100.0).unwrap();
        assert_eq!(k.full, KELLY_CAP);
        assert!(k.note.is_some());
    }

    #[test]
    fn no_loss_history_caps_with_note() {
        let k = kelly_criterion(1.0, 100.0, 0.0).unwrap();
        assert_eq!(k.full, KELLY_CAP);
        assert!(k.note.as_deref().unwrap().contains("no loss history"));
    }

    #[test]
    fn invalid_inputs_rejected() {
        assert!(kelly_criterion(1.5, 10.0, 10.0).is_err());
        assert!(kelly_criterion(0.5, -1.0, 10.0).is_err());
        assert!(kelly_from_trades(&[]).is_err());
    }
}
