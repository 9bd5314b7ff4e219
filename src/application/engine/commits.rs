use crate::application::engine::{EngineSettings, arena::SignalArena};
use crate::domain::commit::{CommitEvent, CommitPayload};
use crate::domain::errors::EngineError;
use crate::domain::events::{EngineEvent, EventMeta};
use crate::domain::frame::RunContext;
use crate::domain::signal::{
    CloseReason, MilestoneKind, Position, Signal, SignalState,
};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Applies commit events to the signal store and produces the resulting
/// wire events.
///
/// This is the single mutation path for signals: the live engine and the
/// commit-log replayer both route through [`apply`], so replaying a
/// persisted `commits.ndjson` reproduces the original emissions bit for
/// bit. Event ids derive from the commit sequence number, never from a
/// random source.
///
/// [`apply`]: CommitApplier::apply
pub struct CommitApplier {
    ctx: RunContext,
    settings: EngineSettings,
    commit_seq: u64,
}

impl CommitApplier {
    pub fn new(ctx: RunContext, settings: EngineSettings) -> Self {
        Self {
            ctx,
            settings,
            commit_seq: 0,
        }
    }

    fn meta(&self, timestamp: i64, sub_index: usize) -> EventMeta {
        EventMeta {
            id: format!("c{:06}-{}", self.commit_seq, sub_index),
            timestamp,
            backtest: self.ctx.backtest(),
            symbol: self.ctx.symbol.clone(),
            strategy_name: self.ctx.strategy_name.clone(),
            exchange_name: self.ctx.exchange_name.clone(),
        }
    }

    /// Apply one commit, mutating the arena and returning the events to
    /// publish, in order. Stale commits (their signal already left the
    /// required state) apply to nothing and return no events; a transition
    /// that could only come from engine corruption fails fast.
    pub fn apply(
        &mut self,
        arena: &mut SignalArena,
        commit: &CommitEvent,
    ) -> Result<Vec<EngineEvent>, EngineError> {
        self.commit_seq += 1;
        let ts = commit.timestamp;
        let mut events: Vec<EngineEvent> = Vec::new();

        match &commit.payload {
            CommitPayload::OpenAccepted { request, immediate } => {
                if arena.contains(&commit.signal_id) {
                    return Err(EngineError::invariant(format!(
                        "signal {} created twice",
                        commit.signal_id
                    )));
                }
                let state = if *immediate {
                    SignalState::Pending
                } else {
                    SignalState::Scheduled
                };
                let signal = Signal {
                    id: commit.signal_id.clone(),
                    symbol: self.ctx.symbol.clone(),
                    position: request.position,
                    price_open: request.price_open,
                    price_take_profit: request.price_take_profit,
                    price_stop_loss: request.price_stop_loss,
                    minute_estimated_time: request.minute_estimated_time,
                    note: request.note.clone(),
                    scheduled_at: ts,
                    pending_at: None,
                    closed_at: None,
                    effective_price_stop_loss: request.price_stop_loss,
                    effective_price_take_profit: request.price_take_profit,
                    original_price_stop_loss: request.price_stop_loss,
                    original_price_take_profit: request.price_take_profit,
                    state,
                    emitted_profit_levels: BTreeSet::new(),
                    emitted_loss_levels: BTreeSet::new(),
                    breakeven_available: false,
                    breakeven_done: false,
                };
                if !*immediate {
                    events.push(EngineEvent::SignalScheduled {
                        meta: self.meta(ts, 0),
                        signal: signal.clone(),
                    });
                }
                arena.insert(signal);
            }

            CommitPayload::EntryTouched { price } => {
                let Some(signal) = arena.get_mut(&commit.signal_id) else {
                    self.unknown_signal(&mut events, commit, ts);
                    return Ok(events);
                };
                match signal.state {
                    SignalState::Scheduled | SignalState::Pending => {
                        signal.pending_at = Some(ts);
                        signal.state = SignalState::Active;
                        debug!(
                            "SignalEngine [{}]: signal {} entered at {}",
                            signal.symbol, signal.id, price
                        );
                        events.push(EngineEvent::SignalOpened {
                            meta: self.meta(ts, 0),
                            signal: signal.clone(),
                        });
                    }
                    _ => self.skip_stale(commit, signal.state),
                }
            }

            CommitPayload::StopLossTouched => {
                let price = arena
                    .get(&commit.signal_id)
                    .map(|s| s.effective_price_stop_loss);
                if let Some(price) = price {
                    self.close(arena, commit, price, CloseReason::StopLoss, &mut events)?;
                } else {
                    self.unknown_signal(&mut events, commit, ts);
                }
            }

            CommitPayload::TakeProfitTouched => {
                let price = arena
                    .get(&commit.signal_id)
                    .map(|s| s.effective_price_take_profit);
                if let Some(price) = price {
                    self.close(arena, commit, price, CloseReason::TakeProfit, &mut events)?;
                } else {
                    self.unknown_signal(&mut events, commit, ts);
                }
            }

            CommitPayload::TimeExpired { price } => {
                if arena.contains(&commit.signal_id) {
                    self.close(arena, commit, *price, CloseReason::TimeExpiry, &mut events)?;
                } else {
                    self.unknown_signal(&mut events, commit, ts);
                }
            }

            CommitPayload::MilestoneReached {
                milestone,
                level,
                price,
            } => {
                let Some(signal) = arena.get_mut(&commit.signal_id) else {
                    self.unknown_signal(&mut events, commit, ts);
                    return Ok(events);
                };
                if signal.state != SignalState::Active
                    || signal.milestone_emitted(*milestone, *level)
                {
                    self.skip_stale(commit, signal.state);
                } else {
                    let meta = self.meta(ts, 0);
                    match milestone {
                        MilestoneKind::Profit => {
                            signal.emitted_profit_levels.insert(*level);
                            events.push(EngineEvent::PartialProfitAvailable {
                                meta,
                                signal_id: signal.id.clone(),
                                level: *level,
                                price: *price,
                            });
                        }
                        MilestoneKind::Loss => {
                            signal.emitted_loss_levels.insert(*level);
                            events.push(EngineEvent::PartialLossAvailable {
                                meta,
                                signal_id: signal.id.clone(),
                                level: *level,
                                price: *price,
                            });
                        }
                    }
                }
            }

            CommitPayload::BreakevenTriggered { price } => {
                let Some(signal) = arena.get_mut(&commit.signal_id) else {
                    self.unknown_signal(&mut events, commit, ts);
                    return Ok(events);
                };
                if signal.state != SignalState::Active {
                    self.skip_stale(commit, signal.state);
                } else {
                    let mut sub = 0;
                    if !signal.breakeven_available {
                        signal.breakeven_available = true;
                        events.push(EngineEvent::BreakevenAvailable {
                            meta: self.meta(ts, sub),
                            signal_id: signal.id.clone(),
                            price: *price,
                        });
                        sub += 1;
                    }
                    if !signal.breakeven_done {
                        signal.breakeven_done = true;
                        signal.effective_price_stop_loss = signal.price_open;
                        events.push(EngineEvent::BreakevenCommit {
                            meta: self.meta(ts, sub),
                            signal_id: signal.id.clone(),
                            effective_price_stop_loss: signal.effective_price_stop_loss,
                        });
                    }
                }
            }

            CommitPayload::Breakeven { price: _ } => {
                let Some(signal) = arena.get_mut(&commit.signal_id) else {
                    self.unknown_signal(&mut events, commit, ts);
                    return Ok(events);
                };
                if signal.state != SignalState::Active || signal.breakeven_done {
                    self.skip_stale(commit, signal.state);
                } else {
                    signal.breakeven_available = true;
                    signal.breakeven_done = true;
                    signal.effective_price_stop_loss = signal.price_open;
                    events.push(EngineEvent::BreakevenCommit {
                        meta: self.meta(ts, 0),
                        signal_id: signal.id.clone(),
                        effective_price_stop_loss: signal.effective_price_stop_loss,
                    });
                }
            }

            CommitPayload::ScheduleExpired => {
                self.cancel(arena, commit, "timeout", &mut events, SignalState::Scheduled);
            }

            CommitPayload::CancelScheduled => {
                self.cancel(arena, commit, "user", &mut events, SignalState::Scheduled);
            }

            CommitPayload::ClosePending => {
                self.cancel(
                    arena,
                    commit,
                    "close-pending",
                    &mut events,
                    SignalState::Pending,
                );
            }

            CommitPayload::PartialProfitCommit { level, price } => {
                let Some(signal) = arena.get(&commit.signal_id) else {
                    self.unknown_signal(&mut events, commit, ts);
                    return Ok(events);
                };
                if signal.state != SignalState::Active {
                    self.skip_stale(commit, signal.state);
                } else {
                    events.push(EngineEvent::PartialProfitCommit {
                        meta: self.meta(ts, 0),
                        signal_id: signal.id.clone(),
                        level: *level,
                        price: *price,
                    });
                }
            }

            CommitPayload::PartialLossCommit { level, price } => {
                let Some(signal) = arena.get(&commit.signal_id) else {
                    self.unknown_signal(&mut events, commit, ts);
                    return Ok(events);
                };
                if signal.state != SignalState::Active {
                    self.skip_stale(commit, signal.state);
                } else {
                    events.push(EngineEvent::PartialLossCommit {
                        meta: self.meta(ts, 0),
                        signal_id: signal.id.clone(),
                        level: *level,
                        price: *price,
                    });
                }
            }

            CommitPayload::TrailingStop { percent } => {
                let Some(signal) = arena.get_mut(&commit.signal_id) else {
                    self.unknown_signal(&mut events, commit, ts);
                    return Ok(events);
                };
                if signal.state != SignalState::Active {
                    self.skip_stale(commit, signal.state);
                } else {
                    let shift = signal.effective_price_stop_loss * *percent
                        / Decimal::from(100)
                        * signal.position.sign();
                    let proposed = signal.effective_price_stop_loss + shift;
                    if trailing_stop_tightens(signal, proposed) {
                        signal.effective_price_stop_loss = proposed;
                        events.push(EngineEvent::TrailingStopCommit {
                            meta: self.meta(ts, 0),
                            signal_id: signal.id.clone(),
                            effective_price_stop_loss: proposed,
                        });
                    } else {
                        // Observability only; never emitted on the bus.
                        debug!(
                            "SignalEngine [{}]: trailing.noop stop {} -> {} for {}",
                            signal.symbol, signal.effective_price_stop_loss, proposed, signal.id
                        );
                    }
                }
            }

            CommitPayload::TrailingTake { percent } => {
                let Some(signal) = arena.get_mut(&commit.signal_id) else {
                    self.unknown_signal(&mut events, commit, ts);
                    return Ok(events);
                };
                if signal.state != SignalState::Active {
                    self.skip_stale(commit, signal.state);
                } else {
                    let shift = signal.effective_price_take_profit * *percent
                        / Decimal::from(100)
                        * signal.position.sign();
                    let proposed = signal.effective_price_take_profit - shift;
                    if trailing_take_tightens(signal, proposed) {
                        signal.effective_price_take_profit = proposed;
                        events.push(EngineEvent::TrailingTakeCommit {
                            meta: self.meta(ts, 0),
                            signal_id: signal.id.clone(),
                            effective_price_take_profit: proposed,
                        });
                    } else {
                        debug!(
                            "SignalEngine [{}]: trailing.noop take {} -> {} for {}",
                            signal.symbol, signal.effective_price_take_profit, proposed, signal.id
                        );
                    }
                }
            }

            CommitPayload::ActivateScheduled { price } => {
                let Some(signal) = arena.get_mut(&commit.signal_id) else {
                    self.unknown_signal(&mut events, commit, ts);
                    return Ok(events);
                };
                if signal.state != SignalState::Scheduled {
                    self.skip_stale(commit, signal.state);
                } else {
                    signal.pending_at = Some(ts);
                    signal.state = SignalState::Active;
                    debug!(
                        "SignalEngine [{}]: signal {} force-activated at {}",
                        signal.symbol, signal.id, price
                    );
                    events.push(EngineEvent::SignalOpened {
                        meta: self.meta(ts, 0),
                        signal: signal.clone(),
                    });
                }
            }
        }

        Ok(events)
    }

    fn close(
        &mut self,
        arena: &mut SignalArena,
        commit: &CommitEvent,
        price_close: Decimal,
        reason: CloseReason,
        events: &mut Vec<EngineEvent>,
    ) -> Result<(), EngineError> {
        let Some(signal) = arena.get_mut(&commit.signal_id) else {
            self.unknown_signal(events, commit, commit.timestamp);
            return Ok(());
        };
        match signal.state {
            SignalState::Active => {
                if signal.closed_at.is_some() {
                    return Err(EngineError::invariant(format!(
                        "signal {} closed twice",
                        signal.id
                    )));
                }
                signal.state = SignalState::Closed;
                signal.closed_at = Some(commit.timestamp);
                let pnl = signal.pnl_percentage(
                    price_close,
                    self.settings.slippage_percent,
                    self.settings.fee_percent,
                );
                events.push(EngineEvent::SignalClosed {
                    meta: self.meta(commit.timestamp, 0),
                    signal: signal.clone(),
                    price_close,
                    pnl_percentage: pnl,
                    close_reason: reason,
                });
            }
            _ => self.skip_stale(commit, signal.state),
        }
        Ok(())
    }

    fn cancel(
        &mut self,
        arena: &mut SignalArena,
        commit: &CommitEvent,
        reason: &str,
        events: &mut Vec<EngineEvent>,
        required: SignalState,
    ) {
        let Some(signal) = arena.get_mut(&commit.signal_id) else {
            self.unknown_signal(events, commit, commit.timestamp);
            return;
        };
        if signal.state != required {
            self.skip_stale(commit, signal.state);
            return;
        }
        signal.state = SignalState::Cancelled;
        signal.closed_at = Some(commit.timestamp);
        events.push(EngineEvent::SignalCancelled {
            meta: self.meta(commit.timestamp, 0),
            signal: signal.clone(),
            cancel_reason: reason.to_string(),
        });
    }

    fn unknown_signal(&self, events: &mut Vec<EngineEvent>, commit: &CommitEvent, ts: i64) {
        warn!(
            "SignalEngine [{}]: commit references unknown signal {}",
            self.ctx.symbol, commit.signal_id
        );
        events.push(EngineEvent::ErrorValidation {
            meta: self.meta(ts, 0),
            message: format!("unknown signal id {}", commit.signal_id),
        });
    }

    fn skip_stale(&self, commit: &CommitEvent, state: SignalState) {
        debug!(
            "SignalEngine [{}]: skipped stale commit for {} in state {}",
            self.ctx.symbol, commit.signal_id, state
        );
    }
}

/// A stop may only move toward the price action and never cross the take.
fn trailing_stop_tightens(signal: &Signal, proposed: Decimal) -> bool {
    match signal.position {
        Position::Long => {
            proposed > signal.effective_price_stop_loss
                && proposed < signal.effective_price_take_profit
        }
        Position::Short => {
            proposed < signal.effective_price_stop_loss
                && proposed > signal.effective_price_take_profit
        }
    }
}

fn trailing_take_tightens(signal: &Signal, proposed: Decimal) -> bool {
    match signal.position {
        Position::Long => {
            proposed < signal.effective_price_take_profit
                && proposed > signal.effective_price_stop_loss
        }
        Position::Short => {
            proposed > signal.effective_price_take_profit
                && proposed < signal.effective_price_stop_loss
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::OpenRequest;
    use crate::domain::frame::{RunContext, RunMode};
    use crate::domain::signal::{PartialLevel, SignalId};
    use rust_decimal_macros::dec;

    fn ctx() -> RunContext {
        RunContext {
            mode: RunMode::Backtest,
            symbol: "BTCUSDT".to_string(),
            strategy_name: "hold".to_string(),
            exchange_name: "mock".to_string(),
            frame_name: None,
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

    fn open_request() -> OpenRequest {
        OpenRequest {
            position: Position::Long,
            price_open: dec!(100),
            price_take_profit: dec!(110),
            price_stop_loss: dec!(90),
            minute_estimated_time: 60,
            note: None,
        }
    }

    fn commit(id: &str, ts: i64, payload: CommitPayload) -> CommitEvent {
        CommitEvent {
            signal_id: SignalId::from(id),
            timestamp: ts,
            payload,
        }
    }

    fn open_active(applier: &mut CommitApplier, arena: &mut SignalArena, id: &str) {
        applier
            .apply(
                arena,
                &commit(
                    id,
                    0,
                    CommitPayload::OpenAccepted {
                        request: open_request(),
                        immediate: true,
                    },
                ),
            )
            .unwrap();
        applier
            .apply(
                arena,
                &commit(id, 0, CommitPayload::EntryTouched { price: dec!(100) }),
            )
            .unwrap();
    }

    #[test]
    fn test_scheduled_open_emits_scheduled_event() {
        let mut applier = CommitApplier::new(ctx(), settings());
        let mut arena = SignalArena::new(60_000);
        let events = applier
            .apply(
                &mut arena,
                &commit(
                    "s-1",
                    5,
                    CommitPayload::OpenAccepted {
                        request: open_request(),
                        immediate: false,
                    },
                ),
            )
            .unwrap();
        assert!(matches!(events[0], EngineEvent::SignalScheduled { .. }));
        assert_eq!(
            arena.get(&SignalId::from("s-1")).unwrap().state,
            SignalState::Scheduled
        );
    }

    #[test]
    fn test_immediate_open_then_entry_emits_opened_only() {
        let mut applier = CommitApplier::new(ctx(), settings());
        let mut arena = SignalArena::new(60_000);
        let created = applier
            .apply(
                &mut arena,
                &commit(
                    "s-1",
                    0,
                    CommitPayload::OpenAccepted {
                        request: open_request(),
                        immediate: true,
                    },
                ),
            )
            .unwrap();
        assert!(created.is_empty());

        let opened = applier
            .apply(
                &mut arena,
                &commit("s-1", 0, CommitPayload::EntryTouched { price: dec!(100) }),
            )
            .unwrap();
        assert!(matches!(opened[0], EngineEvent::SignalOpened { .. }));
        let signal = arena.get(&SignalId::from("s-1")).unwrap();
        assert_eq!(signal.state, SignalState::Active);
        assert_eq!(signal.pending_at, Some(0));
    }

    #[test]
    fn test_take_profit_close_carries_pnl() {
        let mut applier = CommitApplier::new(ctx(), settings());
        let mut arena = SignalArena::new(60_000);
        open_active(&mut applier, &mut arena, "s-1");

        let events = applier
            .apply(&mut arena, &commit("s-1", 10, CommitPayload::TakeProfitTouched))
            .unwrap();
        match &events[0] {
            EngineEvent::SignalClosed {
                price_close,
                pnl_percentage,
                close_reason,
                ..
            } => {
                assert_eq!(*price_close, dec!(110));
                assert_eq!(*pnl_percentage, dec!(10));
                assert_eq!(*close_reason, CloseReason::TakeProfit);
            }
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[test]
    fn test_milestone_dedup() {
        let mut applier = CommitApplier::new(ctx(), settings());
        let mut arena = SignalArena::new(60_000);
        open_active(&mut applier, &mut arena, "s-1");

        let level = PartialLevel::new(10).unwrap();
        let payload = CommitPayload::MilestoneReached {
            milestone: MilestoneKind::Loss,
            level,
            price: dec!(99),
        };
        let first = applier
            .apply(&mut arena, &commit("s-1", 1, payload.clone()))
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = applier
            .apply(&mut arena, &commit("s-1", 2, payload))
            .unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_breakeven_idempotent() {
        let mut applier = CommitApplier::new(ctx(), settings());
        let mut arena = SignalArena::new(60_000);
        open_active(&mut applier, &mut arena, "s-1");

        let first = applier
            .apply(
                &mut arena,
                &commit("s-1", 1, CommitPayload::BreakevenTriggered { price: dec!(105) }),
            )
            .unwrap();
        assert_eq!(first.len(), 2);
        assert!(matches!(first[0], EngineEvent::BreakevenAvailable { .. }));
        assert!(matches!(first[1], EngineEvent::BreakevenCommit { .. }));
        assert_eq!(
            arena
                .get(&SignalId::from("s-1"))
                .unwrap()
                .effective_price_stop_loss,
            dec!(100)
        );

        // Second trigger changes nothing and emits nothing.
        let second = applier
            .apply(
                &mut arena,
                &commit("s-1", 2, CommitPayload::BreakevenTriggered { price: dec!(105) }),
            )
            .unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_trailing_stop_tightens_only() {
        let mut applier = CommitApplier::new(ctx(), settings());
        let mut arena = SignalArena::new(60_000);
        open_active(&mut applier, &mut arena, "s-1");

        // +2% raises the stop for a long.
        let events = applier
            .apply(
                &mut arena,
                &commit("s-1", 1, CommitPayload::TrailingStop { percent: dec!(2) }),
            )
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            arena
                .get(&SignalId::from("s-1"))
                .unwrap()
                .effective_price_stop_loss,
            dec!(91.80)
        );

        // A negative shift would loosen: ignored, nothing emitted.
        let noop = applier
            .apply(
                &mut arena,
                &commit("s-1", 2, CommitPayload::TrailingStop { percent: dec!(-2) }),
            )
            .unwrap();
        assert!(noop.is_empty());
        assert_eq!(
            arena
                .get(&SignalId::from("s-1"))
                .unwrap()
                .effective_price_stop_loss,
            dec!(91.80)
        );
    }

    #[test]
    fn test_schedule_timeout_cancels() {
        let mut applier = CommitApplier::new(ctx(), settings());
        let mut arena = SignalArena::new(60_000);
        applier
            .apply(
                &mut arena,
                &commit(
                    "s-1",
                    0,
                    CommitPayload::OpenAccepted {
                        request: open_request(),
                        immediate: false,
                    },
                ),
            )
            .unwrap();

        let events = applier
            .apply(&mut arena, &commit("s-1", 1_800_000, CommitPayload::ScheduleExpired))
            .unwrap();
        match &events[0] {
            EngineEvent::SignalCancelled { cancel_reason, .. } => {
                assert_eq!(cancel_reason, "timeout");
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_signal_is_validation_error() {
        let mut applier = CommitApplier::new(ctx(), settings());
        let mut arena = SignalArena::new(60_000);
        let events = applier
            .apply(&mut arena, &commit("ghost", 0, CommitPayload::TakeProfitTouched))
            .unwrap();
        assert!(matches!(events[0], EngineEvent::ErrorValidation { .. }));
    }

    #[test]
    fn test_duplicate_creation_is_invariant_violation() {
        let mut applier = CommitApplier::new(ctx(), settings());
        let mut arena = SignalArena::new(60_000);
        let create = commit(
            "s-1",
            0,
            CommitPayload::OpenAccepted {
                request: open_request(),
                immediate: false,
            },
        );
        applier.apply(&mut arena, &create).unwrap();
        let err = applier.apply(&mut arena, &create).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
