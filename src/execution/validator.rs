use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Action, Decision};

/// Minimum notional (USD) for BTC/ETH-class symbols.
pub const MIN_POSITION_BTC_ETH_USD: f64 = 60.0;
/// Minimum notional (USD) for every other symbol.
pub const MIN_POSITION_ALTCOIN_USD: f64 = 12.0;
/// Max position value as a multiple of account equity, BTC/ETH class.
pub const MAX_POSITION_EQUITY_MULT_BTC_ETH: f64 = 10.0;
/// Max position value as a multiple of account equity, altcoins.
pub const MAX_POSITION_EQUITY_MULT_ALTCOIN: f64 = 1.5;
/// Allowance over the max position value for floating-point drift.
pub const MAX_POSITION_TOLERANCE: f64 = 0.01;
/// Risk-reward floor no configuration can lower.
pub const MIN_RISK_REWARD: f64 = 3.0;
/// Heuristic entry point: this far into the stop-to-target range, from the stop.
pub const HEURISTIC_ENTRY_FRACTION: f64 = 0.2;

/// Explicit parameters for a validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationContext {
    pub account_equity: f64,
    /// Leverage ceiling for BTC/ETH-class symbols.
    pub btc_eth_leverage: i64,
    /// Leverage ceiling for everything else.
    pub altcoin_leverage: i64,
    /// Required reward/risk ratio; values below 3.0 are raised to 3.0.
    pub min_risk_reward: f64,
}

impl ValidationContext {
    pub fn new(account_equity: f64, btc_eth_leverage: i64, altcoin_leverage: i64) -> Self {
        Self {
            account_equity,
            btc_eth_leverage,
            altcoin_leverage,
            min_risk_reward: MIN_RISK_REWARD,
        }
    }

    pub fn with_min_risk_reward(mut self, ratio: f64) -> Self {
        self.min_risk_reward = ratio;
        self
    }

    fn risk_reward_floor(&self) -> f64 {
        self.min_risk_reward.max(MIN_RISK_REWARD)
    }
}

/// Symbol class deciding leverage and size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    BtcEth,
    Altcoin,
}

impl SymbolClass {
    pub fn of(symbol: &str) -> Self {
        match symbol {
            "BTCUSDT" | "ETHUSDT" => SymbolClass::BtcEth,
            _ => SymbolClass::Altcoin,
        }
    }

    pub fn leverage_ceiling(&self, ctx: &ValidationContext) -> i64 {
        match self {
            SymbolClass::BtcEth => ctx.btc_eth_leverage,
            SymbolClass::Altcoin => ctx.altcoin_leverage,
        }
    }

    pub fn min_position_usd(&self) -> f64 {
        match self {
            SymbolClass::BtcEth => MIN_POSITION_BTC_ETH_USD,
            SymbolClass::Altcoin => MIN_POSITION_ALTCOIN_USD,
        }
    }

    pub fn max_position_usd(&self, account_equity: f64) -> f64 {
        match self {
            SymbolClass::BtcEth => account_equity * MAX_POSITION_EQUITY_MULT_BTC_ETH,
            SymbolClass::Altcoin => account_equity * MAX_POSITION_EQUITY_MULT_ALTCOIN,
        }
    }
}

/// A hard safety rule broken by one decision.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleViolation {
    #[error("invalid action '{0}'")]
    InvalidAction(String),

    #[error("leverage ceiling must be at least 1, got {0}")]
    InvalidLeverageCeiling(i64),

    #[error("leverage must be greater than 0, got {0}")]
    NonPositiveLeverage(i64),

    #[error("position size must be greater than 0, got {0}")]
    NonPositiveSize(f64),

    #[error("position size {size:.2} USDT below minimum {min:.2} USDT")]
    SizeBelowMinimum { size: f64, min: f64 },

    #[error("position size {size:.0} USDT exceeds max {max:.0} USDT ({mult}x account equity)")]
    SizeAboveMaximum { size: f64, max: f64, mult: f64 },

    #[error("stop loss and take profit must be greater than 0 (stop_loss={stop_loss}, take_profit={take_profit})")]
    NonPositiveStops { stop_loss: f64, take_profit: f64 },

    #[error("long stop loss {stop_loss} must be below take profit {take_profit}")]
    LongStopsInverted { stop_loss: f64, take_profit: f64 },

    #[error("short stop loss {stop_loss} must be above take profit {take_profit}")]
    ShortStopsInverted { stop_loss: f64, take_profit: f64 },

    #[error("risk-reward ratio {ratio:.2}:1 below required {min:.1}:1 [risk: {risk_pct:.2}% reward: {reward_pct:.2}% stop loss: {stop_loss:.2} take profit: {take_profit:.2}]")]
    RiskRewardTooLow {
        ratio: f64,
        min: f64,
        risk_pct: f64,
        reward_pct: f64,
        stop_loss: f64,
        take_profit: f64,
    },
}

/// First failing decision of a batch.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("decision #{index} ({symbol}) rejected: {reason}")]
pub struct ValidationError {
    /// 1-based position in the batch.
    pub index: usize,
    pub symbol: String,
    pub reason: RuleViolation,
}

/// Heuristic risk/reward figures for an open decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskReward {
    pub entry_price: f64,
    pub risk_pct: f64,
    pub reward_pct: f64,
    pub ratio: f64,
}

/// Validate a batch in order, auto-correcting leverage in place.
///
/// Stops at the first failing decision. Decisions before it keep their
/// corrections; the failing one and those after it are left untouched.
pub fn validate_decisions(
    decisions: &mut [Decision],
    ctx: &ValidationContext,
) -> Result<(), ValidationError> {
    for (i, decision) in decisions.iter_mut().enumerate() {
        if let Err(reason) = validate_decision(decision, ctx) {
            counter!("decisions_rejected_total").increment(1);
            tracing::warn!(
                index = i + 1,
                symbol = %decision.symbol,
                action = %decision.action,
                reason = %reason,
                "Decision rejected"
            );
            return Err(ValidationError {
                index: i + 1,
                symbol: decision.symbol.clone(),
                reason,
            });
        }
    }
    Ok(())
}

/// Validate one decision. Leverage above the ceiling is clamped, every other
/// rule is a hard rejection that leaves the decision unchanged.
pub fn validate_decision(
    decision: &mut Decision,
    ctx: &ValidationContext,
) -> Result<(), RuleViolation> {
    let is_long = match &decision.action {
        Action::OpenLong => true,
        Action::OpenShort => false,
        Action::CloseLong | Action::CloseShort | Action::Hold | Action::Wait => return Ok(()),
        Action::Unknown(a) => return Err(RuleViolation::InvalidAction(a.clone())),
    };

    let class = SymbolClass::of(&decision.symbol);
    let ceiling = class.leverage_ceiling(ctx);
    if ceiling < 1 {
        return Err(RuleViolation::InvalidLeverageCeiling(ceiling));
    }

    if decision.leverage <= 0 {
        return Err(RuleViolation::NonPositiveLeverage(decision.leverage));
    }

    if decision.position_size_usd <= 0.0 {
        return Err(RuleViolation::NonPositiveSize(decision.position_size_usd));
    }

    let min = class.min_position_usd();
    if decision.position_size_usd < min {
        return Err(RuleViolation::SizeBelowMinimum {
            size: decision.position_size_usd,
            min,
        });
    }

    let max = class.max_position_usd(ctx.account_equity);
    if decision.position_size_usd > max * (1.0 + MAX_POSITION_TOLERANCE) {
        return Err(RuleViolation::SizeAboveMaximum {
            size: decision.position_size_usd,
            max,
            mult: match class {
                SymbolClass::BtcEth => MAX_POSITION_EQUITY_MULT_BTC_ETH,
                SymbolClass::Altcoin => MAX_POSITION_EQUITY_MULT_ALTCOIN,
            },
        });
    }

    let (stop_loss, take_profit) = (decision.stop_loss, decision.take_profit);
    if stop_loss <= 0.0 || take_profit <= 0.0 {
        return Err(RuleViolation::NonPositiveStops {
            stop_loss,
            take_profit,
        });
    }

    if is_long && stop_loss >= take_profit {
        return Err(RuleViolation::LongStopsInverted {
            stop_loss,
            take_profit,
        });
    }
    if !is_long && stop_loss <= take_profit {
        return Err(RuleViolation::ShortStopsInverted {
            stop_loss,
            take_profit,
        });
    }

    let rr = risk_reward(is_long, stop_loss, take_profit);
    let floor = ctx.risk_reward_floor();
    if rr.ratio < floor {
        return Err(RuleViolation::RiskRewardTooLow {
            ratio: rr.ratio,
            min: floor,
            risk_pct: rr.risk_pct,
            reward_pct: rr.reward_pct,
            stop_loss,
            take_profit,
        });
    }

    // Clamp last so a rejected decision is never mutated.
    if decision.leverage > ceiling {
        tracing::warn!(
            symbol = %decision.symbol,
            requested = decision.leverage,
            ceiling,
            "Leverage above ceiling, clamping"
        );
        counter!("decisions_leverage_clamped_total").increment(1);
        decision.leverage = ceiling;
    }

    Ok(())
}

/// Reward/risk estimate using an entry assumed 20% of the way from the stop
/// towards the target.
pub fn risk_reward(is_long: bool, stop_loss: f64, take_profit: f64) -> RiskReward {
    let (entry_price, risk_pct, reward_pct) = if is_long {
        let entry = stop_loss + (take_profit - stop_loss) * HEURISTIC_ENTRY_FRACTION;
        (
            entry,
            (entry - stop_loss) / entry * 100.0,
            (take_profit - entry) / entry * 100.0,
        )
    } else {
        let entry = stop_loss - (stop_loss - take_profit) * HEURISTIC_ENTRY_FRACTION;
        (
            entry,
            (stop_loss - entry) / entry * 100.0,
            (entry - take_profit) / entry * 100.0,
        )
    };

    let ratio = if risk_pct > 0.0 {
        reward_pct / risk_pct
    } else {
        0.0
    };

    RiskReward {
        entry_price,
        risk_pct,
        reward_pct,
        ratio,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ValidationContext {
        ValidationContext::new(1_000.0, 10, 5)
    }

    fn open_long(symbol: &str, leverage: i64, size: f64, sl: f64, tp: f64) -> Decision {
        Decision {
            symbol: symbol.into(),
            action: Action::OpenLong,
            leverage,
            position_size_usd: size,
            stop_loss: sl,
            take_profit: tp,
            confidence: 80,
            risk_usd: 0.0,
            reasoning: String::new(),
        }
    }

    fn open_short(symbol: &str, leverage: i64, size: f64, sl: f64, tp: f64) -> Decision {
        Decision {
            action: Action::OpenShort,
            ..open_long(symbol, leverage, size, sl, tp)
        }
    }

    #[test]
    fn test_valid_long_passes_unchanged() {
        let mut d = open_long("BTCUSDT", 5, 500.0, 90_000.0, 99_000.0);
        let before = d.clone();
        assert!(validate_decision(&mut d, &ctx()).is_ok());
        assert_eq!(d, before);
    }

    #[test]
    fn test_leverage_above_ceiling_is_clamped() {
        let mut btc = open_long("BTCUSDT", 50, 500.0, 90_000.0, 99_000.0);
        assert!(validate_decision(&mut btc, &ctx()).is_ok());
        assert_eq!(btc.leverage, 10);

        let mut alt = open_short("SOLUSDT", 20, 100.0, 160.0, 140.0);
        assert!(validate_decision(&mut alt, &ctx()).is_ok());
        assert_eq!(alt.leverage, 5);
    }

    #[test]
    fn test_non_positive_leverage_rejected_unchanged() {
        for lev in [0, -3] {
            let mut d = open_long("BTCUSDT", lev, 500.0, 90_000.0, 99_000.0);
            let before = d.clone();
            let err = validate_decision(&mut d, &ctx()).unwrap_err();
            assert_eq!(err, RuleViolation::NonPositiveLeverage(lev));
            assert_eq!(d, before);
        }
    }

    #[test]
    fn test_size_bounds_by_symbol_class() {
        // 50 USD clears the altcoin minimum but not the BTC/ETH one.
        let mut btc = open_long("ETHUSDT", 5, 50.0, 3_000.0, 3_500.0);
        assert!(matches!(
            validate_decision(&mut btc, &ctx()),
            Err(RuleViolation::SizeBelowMinimum { min, .. }) if min == MIN_POSITION_BTC_ETH_USD
        ));
        let mut alt = open_long("SOLUSDT", 5, 50.0, 140.0, 160.0);
        assert!(validate_decision(&mut alt, &ctx()).is_ok());

        let mut tiny = open_long("SOLUSDT", 5, 10.0, 140.0, 160.0);
        assert!(matches!(
            validate_decision(&mut tiny, &ctx()),
            Err(RuleViolation::SizeBelowMinimum { .. })
        ));

        let mut zero = open_long("SOLUSDT", 5, 0.0, 140.0, 160.0);
        assert_eq!(
            validate_decision(&mut zero, &ctx()),
            Err(RuleViolation::NonPositiveSize(0.0))
        );
    }

    #[test]
    fn test_max_position_with_tolerance() {
        // Altcoin cap: 1.5 x 1000 = 1500, tolerance up to 1515.
        let mut within = open_long("SOLUSDT", 3, 1_510.0, 140.0, 160.0);
        assert!(validate_decision(&mut within, &ctx()).is_ok());

        let mut over = open_long("SOLUSDT", 3, 1_520.0, 140.0, 160.0);
        assert!(matches!(
            validate_decision(&mut over, &ctx()),
            Err(RuleViolation::SizeAboveMaximum { .. })
        ));

        // BTC cap: 10 x 1000 = 10000.
        let mut btc = open_long("BTCUSDT", 3, 10_050.0, 90_000.0, 99_000.0);
        assert!(validate_decision(&mut btc, &ctx()).is_ok());
        let mut btc_over = open_long("BTCUSDT", 3, 10_200.0, 90_000.0, 99_000.0);
        assert!(validate_decision(&mut btc_over, &ctx()).is_err());
    }

    #[test]
    fn test_stop_ordering() {
        let mut long = open_long("BTCUSDT", 5, 500.0, 99_000.0, 90_000.0);
        assert!(matches!(
            validate_decision(&mut long, &ctx()),
            Err(RuleViolation::LongStopsInverted { .. })
        ));
        let mut equal = open_long("BTCUSDT", 5, 500.0, 95_000.0, 95_000.0);
        assert!(matches!(
            validate_decision(&mut equal, &ctx()),
            Err(RuleViolation::LongStopsInverted { .. })
        ));
        let mut short = open_short("BTCUSDT", 5, 500.0, 90_000.0, 99_000.0);
        assert!(matches!(
            validate_decision(&mut short, &ctx()),
            Err(RuleViolation::ShortStopsInverted { .. })
        ));
        let mut missing = open_long("BTCUSDT", 5, 500.0, 0.0, 99_000.0);
        assert!(matches!(
            validate_decision(&mut missing, &ctx()),
            Err(RuleViolation::NonPositiveStops { .. })
        ));
    }

    #[test]
    fn test_heuristic_entry_is_twenty_percent_from_stop() {
        // Behavior under test: the 20% entry makes every well-ordered pair
        // land on a 4:1 estimate.
        let long = risk_reward(true, 90_000.0, 99_000.0);
        assert!((long.entry_price - 91_800.0).abs() < 1e-9);
        assert!((long.risk_pct - 1_800.0 / 91_800.0 * 100.0).abs() < 1e-9);
        assert!((long.reward_pct - 7_200.0 / 91_800.0 * 100.0).abs() < 1e-9);
        assert!((long.ratio - 4.0).abs() < 1e-9);

        let short = risk_reward(false, 110.0, 100.0);
        assert!((short.entry_price - 108.0).abs() < 1e-9);
        assert!((short.ratio - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_reward_below_floor_reports_percentages() {
        let strict = ctx().with_min_risk_reward(5.0);
        let mut d = open_long("BTCUSDT", 5, 500.0, 90_000.0, 99_000.0);
        match validate_decision(&mut d, &strict) {
            Err(RuleViolation::RiskRewardTooLow {
                ratio,
                min,
                risk_pct,
                reward_pct,
                stop_loss,
                take_profit,
            }) => {
                assert!((ratio - 4.0).abs() < 1e-9);
                assert_eq!(min, 5.0);
                assert!(risk_pct > 1.9 && risk_pct < 2.0);
                assert!(reward_pct > 7.8 && reward_pct < 7.9);
                assert_eq!(stop_loss, 90_000.0);
                assert_eq!(take_profit, 99_000.0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let msg = validate_decision(&mut d, &strict).unwrap_err().to_string();
        assert!(msg.contains("risk: 1.96%"));
        assert!(msg.contains("reward: 7.84%"));
    }

    #[test]
    fn test_risk_reward_floor_cannot_be_lowered() {
        let lax = ctx().with_min_risk_reward(1.0);
        assert_eq!(lax.risk_reward_floor(), MIN_RISK_REWARD);
    }

    #[test]
    fn test_degenerate_range_has_zero_ratio() {
        // The spread is below one ulp at this magnitude, so the heuristic
        // entry collapses onto the stop and risk is zero.
        let rr = risk_reward(true, 1e17, 1e17 + 16.0);
        assert_eq!(rr.risk_pct, 0.0);
        assert_eq!(rr.ratio, 0.0);
    }

    #[test]
    fn test_non_open_actions_skip_numeric_checks() {
        let ctx = ctx();
        for action in [Action::Hold, Action::Wait, Action::CloseLong, Action::CloseShort] {
            let mut d = Decision {
                action,
                ..open_long("BTCUSDT", -1, -1.0, -1.0, -1.0)
            };
            assert!(validate_decision(&mut d, &ctx).is_ok());
        }
    }

    #[test]
    fn test_batch_stops_at_first_failure() {
        let mut batch = vec![
            open_long("BTCUSDT", 40, 500.0, 90_000.0, 99_000.0),
            Decision {
                action: Action::Unknown("yolo".into()),
                ..open_long("ETHUSDT", 40, 500.0, 3_000.0, 3_500.0)
            },
            open_long("SOLUSDT", 40, 100.0, 140.0, 160.0),
        ];
        let err = validate_decisions(&mut batch, &ctx()).unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(err.symbol, "ETHUSDT");
        assert_eq!(err.reason, RuleViolation::InvalidAction("yolo".into()));
        // First decision was corrected, the third was never reached.
        assert_eq!(batch[0].leverage, 10);
        assert_eq!(batch[2].leverage, 40);
    }

    #[test]
    fn test_non_positive_ceiling_rejects_open_unchanged() {
        for ceiling in [0, -3] {
            let ctx = ValidationContext::new(1_000.0, 10, ceiling);
            let mut d = open_long("SOLUSDT", 5, 100.0, 140.0, 160.0);
            let before = d.clone();
            assert_eq!(
                validate_decision(&mut d, &ctx),
                Err(RuleViolation::InvalidLeverageCeiling(ceiling))
            );
            assert_eq!(d, before);
        }

        // Non-open actions never consult the ceiling.
        let ctx = ValidationContext::new(1_000.0, 0, 0);
        let mut hold = Decision::wait_all("flat");
        assert!(validate_decision(&mut hold, &ctx).is_ok());
    }
}
