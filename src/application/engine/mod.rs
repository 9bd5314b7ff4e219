pub mod arena;
pub mod commits;
pub mod driver;
pub mod replay;

use crate::application::clock::{Clock, ClockDriver};
use crate::application::risk_gate::{GateOutcome, RiskGate};
use crate::domain::candle::{Candle, Interval};
use crate::domain::commit::{CommitEvent, CommitPayload};
use crate::domain::decision::{Decision, ManagementAction};
use crate::domain::errors::EngineError;
use crate::domain::events::{EngineEvent, EventMeta};
use crate::domain::frame::RunContext;
use crate::domain::risk::RiskCheckContext;
use crate::domain::signal::{PartialLevel, Signal, SignalId, SignalState};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::RunLog;
use arena::SignalArena;
use commits::CommitApplier;
use replay::{CandlePath, find_first_crossing};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, info};

/// Engine knobs resolved from configuration at composition time.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub slippage_percent: Decimal,
    pub fee_percent: Decimal,
    pub schedule_await_minutes: i64,
    /// Milestone levels armed for this run; empty arms none.
    pub partial_levels: BTreeSet<PartialLevel>,
    pub breakeven_trigger_percent: Option<Decimal>,
    /// How long a terminal signal stays visible to late subscribers.
    pub grace_minutes: i64,
}

/// Aggregate counters reported when a run finishes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub signals_opened: usize,
    pub signals_closed: usize,
    pub signals_cancelled: usize,
    pub risk_rejections: usize,
    pub wins: usize,
    pub losses: usize,
    pub cumulative_pnl_percent: Decimal,
    pub aborted: bool,
}

/// The per-(symbol, run) signal lifecycle engine.
///
/// Owns the signal arena, the FIFO commit queue and the intra-candle
/// replay. Everything runs on one logical execution stream: decisions come
/// in through [`submit_decision`], candles through [`begin_candle`] and
/// [`replay_candle`], and every resulting transition is drained through
/// the commit queue in causal order.
///
/// [`submit_decision`]: SignalEngine::submit_decision
/// [`begin_candle`]: SignalEngine::begin_candle
/// [`replay_candle`]: SignalEngine::replay_candle
pub struct SignalEngine {
    ctx: RunContext,
    settings: EngineSettings,
    clock: Clock,
    clock_driver: Option<ClockDriver>,
    gate: RiskGate,
    arena: SignalArena,
    queue: VecDeque<CommitEvent>,
    applier: CommitApplier,
    bus: EventBus,
    log: Option<RunLog>,
    run_seq: u64,
    summary: RunSummary,
}

impl SignalEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: RunContext,
        settings: EngineSettings,
        clock: Clock,
        clock_driver: Option<ClockDriver>,
        gate: RiskGate,
        bus: EventBus,
        log: Option<RunLog>,
    ) -> Self {
        let applier = CommitApplier::new(ctx.clone(), settings.clone());
        let arena = SignalArena::new(settings.grace_minutes * 60_000);
        Self {
            ctx,
            settings,
            clock,
            clock_driver,
            gate,
            arena,
            queue: VecDeque::new(),
            applier,
            bus,
            log,
            run_seq: 0,
            summary: RunSummary::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.ctx.symbol
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }

    fn now(&self) -> i64 {
        self.clock.now()
    }

    fn advance_clock(&self, timestamp: i64) {
        if let Some(driver) = &self.clock_driver {
            driver.advance_to(timestamp);
        }
    }

    fn run_meta(&mut self) -> EventMeta {
        self.run_seq += 1;
        EventMeta {
            id: format!("r{:06}", self.run_seq),
            timestamp: self.now(),
            backtest: self.ctx.backtest(),
            symbol: self.ctx.symbol.clone(),
            strategy_name: self.ctx.strategy_name.clone(),
            exchange_name: self.ctx.exchange_name.clone(),
        }
    }

    fn emit(&mut self, event: EngineEvent) -> Result<(), EngineError> {
        self.track(&event);
        if let Some(log) = &mut self.log {
            match &event {
                EngineEvent::SignalScheduled { signal, .. }
                | EngineEvent::SignalOpened { signal, .. }
                | EngineEvent::SignalClosed { signal, .. }
                | EngineEvent::SignalCancelled { signal, .. } => log.append_signal(signal)?,
                _ => {}
            }
        }
        self.bus.publish(event);
        Ok(())
    }

    fn track(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::SignalOpened { .. } => self.summary.signals_opened += 1,
            EngineEvent::SignalClosed { pnl_percentage, .. } => {
                self.summary.signals_closed += 1;
                self.summary.cumulative_pnl_percent += *pnl_percentage;
                if pnl_percentage.is_sign_positive() && !pnl_percentage.is_zero() {
                    self.summary.wins += 1;
                } else {
                    self.summary.losses += 1;
                }
            }
            EngineEvent::SignalCancelled { .. } => self.summary.signals_cancelled += 1,
            EngineEvent::RiskRejection { .. } => self.summary.risk_rejections += 1,
            _ => {}
        }
    }

    fn enqueue(&mut self, commit: CommitEvent) -> Result<(), EngineError> {
        if let Some(log) = &mut self.log {
            log.append_commit(&commit)?;
        }
        self.queue.push_back(commit);
        Ok(())
    }

    /// Drain the commit queue, applying transitions and publishing events
    /// in FIFO order.
    fn drain(&mut self) -> Result<(), EngineError> {
        while let Some(commit) = self.queue.pop_front() {
            let events = self.applier.apply(&mut self.arena, &commit)?;
            for event in events {
                self.emit(event)?;
            }
        }
        Ok(())
    }

    /// Feed one strategy decision into the lifecycle. `current_price` is
    /// the market price at the evaluating tick.
    pub fn submit_decision(
        &mut self,
        decision: Decision,
        current_price: Decimal,
    ) -> Result<(), EngineError> {
        match decision {
            Decision::Wait => Ok(()),

            Decision::Open(request) => {
                if !Signal::barriers_ordered(
                    request.position,
                    request.price_open,
                    request.price_take_profit,
                    request.price_stop_loss,
                ) {
                    let meta = self.run_meta();
                    return self.emit(EngineEvent::ErrorValidation {
                        meta,
                        message: format!(
                            "rejected {} proposal: barriers out of order (open={}, tp={}, sl={})",
                            request.position,
                            request.price_open,
                            request.price_take_profit,
                            request.price_stop_loss
                        ),
                    });
                }

                let outcome = {
                    let active = self.arena.active_snapshot();
                    let ctx = RiskCheckContext {
                        proposal: &request,
                        symbol: &self.ctx.symbol,
                        current_price,
                        active_positions: &active,
                    };
                    self.gate.evaluate(&ctx)
                };

                match outcome {
                    GateOutcome::Accepted => {
                        let id = SignalId::generate();
                        let immediate = request.price_open == current_price;
                        let now = self.now();
                        let entry_price = request.price_open;
                        self.enqueue(CommitEvent {
                            signal_id: id.clone(),
                            timestamp: now,
                            payload: CommitPayload::OpenAccepted { request, immediate },
                        })?;
                        if immediate {
                            self.enqueue(CommitEvent {
                                signal_id: id,
                                timestamp: now,
                                payload: CommitPayload::EntryTouched { price: entry_price },
                            })?;
                        }
                        self.drain()
                    }
                    GateOutcome::Rejected { note } => {
                        let meta = self.run_meta();
                        self.emit(EngineEvent::RiskRejection {
                            meta,
                            rejection_note: note,
                            proposal: request,
                        })
                    }
                    GateOutcome::Faulted { message } => {
                        let meta = self.run_meta();
                        self.emit(EngineEvent::ErrorValidation { meta, message })
                    }
                }
            }

            Decision::CancelScheduled { signal_id } => {
                let now = self.now();
                self.enqueue(CommitEvent {
                    signal_id,
                    timestamp: now,
                    payload: CommitPayload::CancelScheduled,
                })?;
                self.drain()
            }

            Decision::ClosePending { signal_id } => {
                let now = self.now();
                self.enqueue(CommitEvent {
                    signal_id,
                    timestamp: now,
                    payload: CommitPayload::ClosePending,
                })?;
                self.drain()
            }

            Decision::Manage { signal_id, action } => {
                let payload = match action {
                    ManagementAction::PartialProfit { level } => CommitPayload::PartialProfitCommit {
                        level,
                        price: current_price,
                    },
                    ManagementAction::PartialLoss { level } => CommitPayload::PartialLossCommit {
                        level,
                        price: current_price,
                    },
                    ManagementAction::TrailingStop { percent } => {
                        CommitPayload::TrailingStop { percent }
                    }
                    ManagementAction::TrailingTake { percent } => {
                        CommitPayload::TrailingTake { percent }
                    }
                    ManagementAction::Breakeven => CommitPayload::Breakeven {
                        price: current_price,
                    },
                    ManagementAction::ActivateScheduled => CommitPayload::ActivateScheduled {
                        price: current_price,
                    },
                };
                let now = self.now();
                self.enqueue(CommitEvent {
                    signal_id,
                    timestamp: now,
                    payload,
                })?;
                self.drain()
            }
        }
    }

    /// Open a candle: set the clock to its open time, inject expiries whose
    /// deadline the replayed clock has now crossed, and reclaim lapsed
    /// terminal slots.
    pub fn begin_candle(&mut self, candle: &Candle) -> Result<(), EngineError> {
        self.advance_clock(candle.open_time);

        let await_millis = self.settings.schedule_await_minutes * 60_000;
        let mut due: Vec<CommitEvent> = Vec::new();
        for signal in self.arena.live() {
            match signal.state {
                SignalState::Scheduled => {
                    let expiry = signal.scheduled_at + await_millis;
                    if candle.open_time >= expiry {
                        due.push(CommitEvent {
                            signal_id: signal.id.clone(),
                            timestamp: expiry,
                            payload: CommitPayload::ScheduleExpired,
                        });
                    }
                }
                SignalState::Active => {
                    let entered_at = signal.pending_at.unwrap_or(signal.scheduled_at);
                    let expiry = entered_at + signal.minute_estimated_time * 60_000;
                    if candle.open_time >= expiry {
                        due.push(CommitEvent {
                            signal_id: signal.id.clone(),
                            timestamp: expiry,
                            payload: CommitPayload::TimeExpired {
                                price: candle.open,
                            },
                        });
                    }
                }
                _ => {}
            }
        }
        for commit in due {
            self.enqueue(commit)?;
        }
        self.drain()?;

        self.arena.reclaim(candle.open_time);
        Ok(())
    }

    /// Walk the candle's reconstructed path, committing each crossing in
    /// causal order. The queue is drained after every crossing so updated
    /// effective levels take effect for the rest of the candle.
    pub fn replay_candle(&mut self, candle: &Candle, interval: Interval) -> Result<(), EngineError> {
        let path = CandlePath::new(candle, interval);
        for segment in path.segments() {
            let mut sweep_from = segment.from;
            loop {
                let hit = find_first_crossing(
                    self.arena.live(),
                    &self.settings,
                    sweep_from,
                    segment.to,
                );
                let Some(hit) = hit else { break };
                let distance = segment.start_distance + (hit.price - segment.from).abs();
                let timestamp = path.timestamp_at(distance);
                self.advance_clock(timestamp);
                debug!(
                    "SignalEngine [{}]: crossing {:?} at {} (t={})",
                    self.ctx.symbol, hit.payload, hit.price, timestamp
                );
                sweep_from = hit.price;
                self.enqueue(CommitEvent {
                    signal_id: hit.signal_id,
                    timestamp,
                    payload: hit.payload,
                })?;
                self.drain()?;
            }
        }
        self.advance_clock(candle.close_time(interval));
        Ok(())
    }

    pub fn emit_progress(&mut self, processed: usize, total: usize) -> Result<(), EngineError> {
        let meta = self.run_meta();
        self.emit(EngineEvent::BacktestProgress {
            meta,
            processed,
            total,
        })
    }

    pub fn emit_done(&mut self, aborted: bool) -> Result<(), EngineError> {
        self.summary.aborted = aborted;
        info!(
            "SignalEngine [{}]: done (aborted={}, opened={}, closed={}, cancelled={})",
            self.ctx.symbol,
            aborted,
            self.summary.signals_opened,
            self.summary.signals_closed,
            self.summary.signals_cancelled
        );
        let meta = self.run_meta();
        self.emit(EngineEvent::Done { meta, aborted })
    }

    pub fn emit_error_info(&mut self, message: String) -> Result<(), EngineError> {
        let meta = self.run_meta();
        self.emit(EngineEvent::ErrorInfo { meta, message })
    }

    pub fn emit_error_critical(&mut self, message: String) -> Result<(), EngineError> {
        let meta = self.run_meta();
        self.emit(EngineEvent::ErrorCritical { meta, message })
    }
}

/// Re-apply a persisted commit log against a fresh store, returning the
/// emissions it produces. With the same settings and context this is
/// bit-identical to the original run's lifecycle events.
pub fn replay_commit_log(
    ctx: RunContext,
    settings: EngineSettings,
    commits: &[CommitEvent],
) -> Result<Vec<EngineEvent>, EngineError> {
    let mut applier = CommitApplier::new(ctx, settings.clone());
    let mut arena = SignalArena::new(settings.grace_minutes * 60_000);
    let mut out = Vec::new();
    for commit in commits {
        out.extend(applier.apply(&mut arena, commit)?);
    }
    Ok(out)
}
