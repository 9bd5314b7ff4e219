use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque unique identifier of a signal. Signals reference each other only
/// through this id; the engine never hands out pointers into its store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(String);

impl SignalId {
    pub fn generate() -> Self {
        SignalId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SignalId {
    fn from(s: &str) -> Self {
        SignalId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Long,
    Short,
}

impl Position {
    /// +1 for long, -1 for short; multiplies price distances so the same
    /// arithmetic covers both directions.
    pub fn sign(&self) -> Decimal {
        match self {
            Position::Long => Decimal::ONE,
            Position::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Long => write!(f, "LONG"),
            Position::Short => write!(f, "SHORT"),
        }
    }
}

/// Lifecycle state of a signal. Transitions form a DAG with no backward
/// edges: scheduled -> {pending, cancelled}, pending -> {active, cancelled},
/// active -> closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    Scheduled,
    Pending,
    Active,
    Closed,
    Cancelled,
}

impl SignalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalState::Closed | SignalState::Cancelled)
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Running-PnL milestone level: one of 10, 20, ..., 100.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartialLevel(u8);

impl PartialLevel {
    pub fn new(value: u8) -> Option<Self> {
        if value >= 10 && value <= 100 && value % 10 == 0 {
            Some(PartialLevel(value))
        } else {
            None
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Fraction of the entry-to-barrier distance this level represents.
    pub fn fraction(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(100)
    }

    pub fn all() -> Vec<PartialLevel> {
        (1..=10).map(|i| PartialLevel(i * 10)).collect()
    }
}

impl fmt::Display for PartialLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneKind {
    Profit,
    Loss,
}

/// Why an active signal closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TimeExpiry,
}

/// A concrete trade intent owned by the SignalEngine for its lifetime.
///
/// `original_*` barriers are frozen at entry; `effective_*` barriers move
/// only through breakeven and trailing commits, and only in the tightening
/// direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub symbol: String,
    pub position: Position,
    pub price_open: Decimal,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    pub minute_estimated_time: i64,
    pub note: Option<String>,
    pub scheduled_at: i64,
    pub pending_at: Option<i64>,
    pub closed_at: Option<i64>,
    pub effective_price_stop_loss: Decimal,
    pub effective_price_take_profit: Decimal,
    pub original_price_stop_loss: Decimal,
    pub original_price_take_profit: Decimal,
    pub state: SignalState,
    pub emitted_profit_levels: BTreeSet<PartialLevel>,
    pub emitted_loss_levels: BTreeSet<PartialLevel>,
    pub breakeven_available: bool,
    pub breakeven_done: bool,
}

impl Signal {
    /// Entry price ordering must hold at creation: for a long,
    /// `sl < open < tp`; inverted for a short.
    pub fn barriers_ordered(
        position: Position,
        price_open: Decimal,
        price_take_profit: Decimal,
        price_stop_loss: Decimal,
    ) -> bool {
        match position {
            Position::Long => price_stop_loss < price_open && price_open < price_take_profit,
            Position::Short => price_take_profit < price_open && price_open < price_stop_loss,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Price at which milestone `level` of `kind` sits: `level`% of the way
    /// from the original entry toward the original barrier. Milestones are
    /// frozen against the original references and do not move with trailing
    /// or breakeven adjustments.
    pub fn milestone_price(&self, kind: MilestoneKind, level: PartialLevel) -> Decimal {
        let barrier = match kind {
            MilestoneKind::Profit => self.original_price_take_profit,
            MilestoneKind::Loss => self.original_price_stop_loss,
        };
        self.price_open + (barrier - self.price_open) * level.fraction()
    }

    pub fn milestone_emitted(&self, kind: MilestoneKind, level: PartialLevel) -> bool {
        match kind {
            MilestoneKind::Profit => self.emitted_profit_levels.contains(&level),
            MilestoneKind::Loss => self.emitted_loss_levels.contains(&level),
        }
    }

    /// Breakeven trigger price for a configured trigger distance (percent
    /// of the entry price in the favorable direction).
    pub fn breakeven_trigger_price(&self, trigger_percent: Decimal) -> Decimal {
        self.price_open
            * (Decimal::ONE + self.position.sign() * trigger_percent / Decimal::from(100))
    }

    /// Net PnL percentage for an exit at `price_close`, after symmetric
    /// slippage on entry and exit and the fee doubled across the round trip.
    pub fn pnl_percentage(
        &self,
        price_close: Decimal,
        slippage_percent: Decimal,
        fee_percent: Decimal,
    ) -> Decimal {
        let slip = slippage_percent / Decimal::from(100);
        let (entry_eff, exit_eff) = match self.position {
            Position::Long => (
                self.price_open * (Decimal::ONE + slip),
                price_close * (Decimal::ONE - slip),
            ),
            Position::Short => (
                self.price_open * (Decimal::ONE - slip),
                price_close * (Decimal::ONE + slip),
            ),
        };
        if entry_eff.is_zero() {
            return Decimal::ZERO;
        }
        let gross = match self.position {
            Position::Long => (exit_eff - entry_eff) / entry_eff,
            Position::Short => (entry_eff - exit_eff) / entry_eff,
        } * Decimal::from(100);
        gross - fee_percent * Decimal::from(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_signal() -> Signal {
        Signal {
            id: SignalId::from("s-1"),
            symbol: "BTCUSDT".to_string(),
            position: Position::Long,
            price_open: dec!(100),
            price_take_profit: dec!(110),
            price_stop_loss: dec!(90),
            minute_estimated_time: 60,
            note: None,
            scheduled_at: 0,
            pending_at: Some(0),
            closed_at: None,
            effective_price_stop_loss: dec!(90),
            effective_price_take_profit: dec!(110),
            original_price_stop_loss: dec!(90),
            original_price_take_profit: dec!(110),
            state: SignalState::Active,
            emitted_profit_levels: BTreeSet::new(),
            emitted_loss_levels: BTreeSet::new(),
            breakeven_available: false,
            breakeven_done: false,
        }
    }

    #[test]
    fn test_partial_level_validation() {
        assert!(PartialLevel::new(10).is_some());
        assert!(PartialLevel::new(100).is_some());
        assert!(PartialLevel::new(15).is_none());
        assert!(PartialLevel::new(0).is_none());
        assert!(PartialLevel::new(110).is_none());
        assert_eq!(PartialLevel::all().len(), 10);
    }

    #[test]
    fn test_barriers_ordered() {
        assert!(Signal::barriers_ordered(
            Position::Long,
            dec!(100),
            dec!(110),
            dec!(90)
        ));
        assert!(!Signal::barriers_ordered(
            Position::Long,
            dec!(100),
            dec!(90),
            dec!(110)
        ));
        assert!(Signal::barriers_ordered(
            Position::Short,
            dec!(100),
            dec!(90),
            dec!(110)
        ));
    }

    #[test]
    fn test_milestone_prices_sit_between_entry_and_barrier() {
        let s = long_signal();
        assert_eq!(
            s.milestone_price(MilestoneKind::Loss, PartialLevel::new(10).unwrap()),
            dec!(99)
        );
        assert_eq!(
            s.milestone_price(MilestoneKind::Loss, PartialLevel::new(100).unwrap()),
            dec!(90)
        );
        assert_eq!(
            s.milestone_price(MilestoneKind::Profit, PartialLevel::new(50).unwrap()),
            dec!(105)
        );
    }

    #[test]
    fn test_breakeven_trigger_price() {
        let s = long_signal();
        assert_eq!(s.breakeven_trigger_price(dec!(5)), dec!(105));

        let mut short = long_signal();
        short.position = Position::Short;
        assert_eq!(short.breakeven_trigger_price(dec!(5)), dec!(95));
    }

    #[test]
    fn test_pnl_net_of_costs() {
        let s = long_signal();
        // No costs: TP exit is exactly +10%.
        assert_eq!(s.pnl_percentage(dec!(110), dec!(0), dec!(0)), dec!(10));

        // Fees come off twice, slippage hits both sides.
        let net = s.pnl_percentage(dec!(110), dec!(0.1), dec!(0.1));
        assert!(net < dec!(10));
        assert!(net > dec!(9.3));
    }

    #[test]
    fn test_pnl_short_direction() {
        let mut s = long_signal();
        s.position = Position::Short;
        s.price_take_profit = dec!(90);
        s.price_stop_loss = dec!(110);
        assert_eq!(s.pnl_percentage(dec!(90), dec!(0), dec!(0)), dec!(10));
        assert_eq!(s.pnl_percentage(dec!(110), dec!(0), dec!(0)), dec!(-10));
    }
}
