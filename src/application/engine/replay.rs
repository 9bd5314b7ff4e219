use crate::application::engine::EngineSettings;
use crate::domain::candle::{Candle, Interval};
use crate::domain::commit::CommitPayload;
use crate::domain::signal::{MilestoneKind, Position, Signal, SignalId, SignalState};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Deterministic reconstruction of a plausible OHLC path through one
/// candle, walked as monotone price sweeps.
///
/// Green candle: open -> low -> high -> close. Red: open -> high -> low ->
/// close. Doji: the smaller shadow first (upper shadow on a tie). Crossing
/// timestamps interpolate linearly over cumulative path distance between
/// the candle's open and close times.
pub struct CandlePath {
    pivots: [Decimal; 4],
    total_len: Decimal,
    open_time: i64,
    duration_ms: i64,
}

/// One monotone sweep of the path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathSegment {
    pub from: Decimal,
    pub to: Decimal,
    /// Cumulative path distance at the segment start.
    pub start_distance: Decimal,
}

impl CandlePath {
    pub fn new(candle: &Candle, interval: Interval) -> Self {
        let pivots = if candle.is_doji() {
            let upper = candle.high - candle.open;
            let lower = candle.open - candle.low;
            if upper <= lower {
                [candle.open, candle.high, candle.low, candle.close]
            } else {
                [candle.open, candle.low, candle.high, candle.close]
            }
        } else if candle.is_green() {
            [candle.open, candle.low, candle.high, candle.close]
        } else {
            [candle.open, candle.high, candle.low, candle.close]
        };

        let total_len = (pivots[1] - pivots[0]).abs()
            + (pivots[2] - pivots[1]).abs()
            + (pivots[3] - pivots[2]).abs();

        Self {
            pivots,
            total_len,
            open_time: candle.open_time,
            duration_ms: interval.as_millis(),
        }
    }

    /// The path's monotone sweeps, zero-length sweeps elided.
    pub fn segments(&self) -> Vec<PathSegment> {
        let mut out = Vec::with_capacity(3);
        let mut cumulative = Decimal::ZERO;
        for pair in self.pivots.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            if from != to {
                out.push(PathSegment {
                    from,
                    to,
                    start_distance: cumulative,
                });
                cumulative += (to - from).abs();
            }
        }
        out
    }

    /// Timestamp of a point at `cumulative` distance along the path.
    pub fn timestamp_at(&self, cumulative: Decimal) -> i64 {
        if self.total_len.is_zero() {
            return self.open_time;
        }
        let fraction = cumulative / self.total_len;
        let offset = (fraction * Decimal::from(self.duration_ms))
            .to_i64()
            .unwrap_or(0);
        self.open_time + offset.clamp(0, self.duration_ms)
    }
}

/// The earliest crossing found within one sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Crossing {
    pub signal_id: SignalId,
    pub price: Decimal,
    pub payload: CommitPayload,
}

/// Scan `signals` for the first crossing along the sweep `from -> to`.
///
/// Barrier touches (entry, effective SL, effective TP) count on either
/// sweep direction; milestone and breakeven thresholds only while the
/// sweep moves toward them. Exact-price ties resolve by payload priority
/// (terminal close first), then by signal insertion order.
pub fn find_first_crossing<'a>(
    signals: impl Iterator<Item = &'a Signal>,
    settings: &EngineSettings,
    from: Decimal,
    to: Decimal,
) -> Option<Crossing> {
    if from == to {
        return None;
    }
    let upward = to > from;
    let lo = from.min(to);
    let hi = from.max(to);
    let in_range = |p: Decimal| p >= lo && p <= hi;

    let mut best: Option<(Decimal, u8, Crossing)> = None;
    let mut consider = |price: Decimal, payload: CommitPayload, signal_id: &SignalId| {
        let distance = (price - from).abs();
        let priority = payload.tie_priority();
        let better = match &best {
            None => true,
            Some((d, p, _)) => distance < *d || (distance == *d && priority < *p),
        };
        if better {
            best = Some((
                distance,
                priority,
                Crossing {
                    signal_id: signal_id.clone(),
                    price,
                    payload,
                },
            ));
        }
    };

    for signal in signals {
        match signal.state {
            SignalState::Scheduled => {
                if in_range(signal.price_open) {
                    consider(
                        signal.price_open,
                        CommitPayload::EntryTouched {
                            price: signal.price_open,
                        },
                        &signal.id,
                    );
                }
            }
            SignalState::Active => {
                if in_range(signal.effective_price_stop_loss) {
                    consider(
                        signal.effective_price_stop_loss,
                        CommitPayload::StopLossTouched,
                        &signal.id,
                    );
                }
                if in_range(signal.effective_price_take_profit) {
                    consider(
                        signal.effective_price_take_profit,
                        CommitPayload::TakeProfitTouched,
                        &signal.id,
                    );
                }

                // Favorable direction: toward TP for this position.
                let favorable = match signal.position {
                    Position::Long => upward,
                    Position::Short => !upward,
                };
                let milestone = if favorable {
                    MilestoneKind::Profit
                } else {
                    MilestoneKind::Loss
                };
                for &level in &settings.partial_levels {
                    if signal.milestone_emitted(milestone, level) {
                        continue;
                    }
                    let price = signal.milestone_price(milestone, level);
                    if in_range(price) {
                        consider(
                            price,
                            CommitPayload::MilestoneReached {
                                milestone,
                                level,
                                price,
                            },
                            &signal.id,
                        );
                    }
                }

                if favorable && !signal.breakeven_available {
                    if let Some(trigger) = settings.breakeven_trigger_percent {
                        let price = signal.breakeven_trigger_price(trigger);
                        if in_range(price) {
                            consider(
                                price,
                                CommitPayload::BreakevenTriggered { price },
                                &signal.id,
                            );
                        }
                    }
                }
            }
            // Pending is transient: an entry touch activates in the same
            // drain. Terminal states no longer participate.
            SignalState::Pending | SignalState::Closed | SignalState::Cancelled => {}
        }
    }

    best.map(|(_, _, crossing)| crossing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            open_time: 0,
            open,
            high,
            low,
            close,
            volume: dec!(1),
        }
    }

    fn active_long() -> Signal {
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

    fn settings() -> EngineSettings {
        EngineSettings {
            slippage_percent: Decimal::ZERO,
            fee_percent: Decimal::ZERO,
            schedule_await_minutes: 30,
            partial_levels: BTreeSet::new(),
            breakeven_trigger_percent: None,
            grace_minutes: 1,
        }
    }

    #[test]
    fn test_green_candle_visits_low_first() {
        let path = CandlePath::new(&candle(dec!(100), dec!(110), dec!(99), dec!(108)), Interval::OneMin);
        let segs = path.segments();
        assert_eq!(segs.len(), 3);
        assert_eq!((segs[0].from, segs[0].to), (dec!(100), dec!(99)));
        assert_eq!((segs[1].from, segs[1].to), (dec!(99), dec!(110)));
        assert_eq!((segs[2].from, segs[2].to), (dec!(110), dec!(108)));
    }

    #[test]
    fn test_red_candle_visits_high_first() {
        let path = CandlePath::new(&candle(dec!(100), dec!(101), dec!(88), dec!(89)), Interval::OneMin);
        let segs = path.segments();
        assert_eq!((segs[0].from, segs[0].to), (dec!(100), dec!(101)));
        assert_eq!((segs[1].from, segs[1].to), (dec!(101), dec!(88)));
    }

    #[test]
    fn test_doji_visits_smaller_shadow_first() {
        // Upper shadow 1, lower shadow 3.
        let path = CandlePath::new(&candle(dec!(100), dec!(101), dec!(97), dec!(100)), Interval::OneMin);
        let segs = path.segments();
        assert_eq!((segs[0].from, segs[0].to), (dec!(100), dec!(101)));

        // Equal shadows resolve upper-first.
        let path = CandlePath::new(&candle(dec!(100), dec!(102), dec!(98), dec!(100)), Interval::OneMin);
        assert_eq!(path.segments()[0].to, dec!(102));
    }

    #[test]
    fn test_timestamps_follow_path_distance() {
        // Path 100 -> 99 -> 110 -> 108, total length 14.
        let path = CandlePath::new(&candle(dec!(100), dec!(110), dec!(99), dec!(108)), Interval::OneMin);
        assert_eq!(path.timestamp_at(dec!(0)), 0);
        assert_eq!(path.timestamp_at(dec!(7)), 30_000);
        assert_eq!(path.timestamp_at(dec!(14)), 60_000);
    }

    #[test]
    fn test_flat_candle_has_no_segments() {
        let path = CandlePath::new(&candle(dec!(100), dec!(100), dec!(100), dec!(100)), Interval::OneMin);
        assert!(path.segments().is_empty());
        assert_eq!(path.timestamp_at(dec!(0)), 0);
    }

    #[test]
    fn test_sl_found_on_downward_sweep() {
        let s = active_long();
        let hit = find_first_crossing([&s].into_iter(), &settings(), dec!(101), dec!(88)).unwrap();
        assert_eq!(hit.payload, CommitPayload::StopLossTouched);
        assert_eq!(hit.price, dec!(90));
    }

    #[test]
    fn test_milestones_precede_sl_along_sweep() {
        let s = active_long();
        let mut cfg = settings();
        cfg.partial_levels =
            [10u8, 20].iter().filter_map(|&v| crate::domain::signal::PartialLevel::new(v)).collect();

        // Sweep 101 -> 88: loss level 10 at 99 comes before SL at 90.
        let hit = find_first_crossing([&s].into_iter(), &cfg, dec!(101), dec!(88)).unwrap();
        match hit.payload {
            CommitPayload::MilestoneReached { level, price, .. } => {
                assert_eq!(level.value(), 10);
                assert_eq!(price, dec!(99));
            }
            other => panic!("expected milestone, got {:?}", other),
        }
    }

    #[test]
    fn test_close_wins_exact_tie_with_milestone() {
        let s = active_long();
        let mut cfg = settings();
        cfg.partial_levels = crate::domain::signal::PartialLevel::all().into_iter().collect();

        // Level 100 profit milestone sits exactly on TP at 110; the close
        // must win the tie.
        let hit = find_first_crossing([&s].into_iter(), &cfg, dec!(109.5), dec!(110)).unwrap();
        assert_eq!(hit.payload, CommitPayload::TakeProfitTouched);
    }

    #[test]
    fn test_entry_touch_for_scheduled() {
        let mut s = active_long();
        s.state = SignalState::Scheduled;
        s.price_open = dec!(105);
        let hit = find_first_crossing([&s].into_iter(), &settings(), dec!(104), dec!(106)).unwrap();
        assert_eq!(
            hit.payload,
            CommitPayload::EntryTouched { price: dec!(105) }
        );
    }

    #[test]
    fn test_breakeven_trigger_only_on_favorable_sweep() {
        let s = active_long();
        let mut cfg = settings();
        cfg.breakeven_trigger_percent = Some(dec!(5));

        let up = find_first_crossing([&s].into_iter(), &cfg, dec!(104), dec!(106)).unwrap();
        assert_eq!(
            up.payload,
            CommitPayload::BreakevenTriggered { price: dec!(105) }
        );

        // Downward through the same price: no trigger.
        assert!(find_first_crossing([&s].into_iter(), &cfg, dec!(106), dec!(104)).is_none());
    }

    #[test]
    fn test_short_symmetry_no_events_inside_barriers() {
        let mut s = active_long();
        s.position = Position::Short;
        s.price_take_profit = dec!(90);
        s.price_stop_loss = dec!(105);
        s.effective_price_take_profit = dec!(90);
        s.effective_price_stop_loss = dec!(105);
        s.original_price_take_profit = dec!(90);
        s.original_price_stop_loss = dec!(105);

        assert!(find_first_crossing([&s].into_iter(), &settings(), dec!(100), dec!(102)).is_none());
        assert!(find_first_crossing([&s].into_iter(), &settings(), dec!(102), dec!(98)).is_none());
    }
}
