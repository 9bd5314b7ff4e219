use async_trait::async_trait;
use candlecast::application::clock::Clock;
use candlecast::application::engine::{EngineSettings, SignalEngine};
use candlecast::application::risk_gate::RiskGate;
use candlecast::application::strategy_runner::{Strategy, StrategyContext};
use candlecast::application::system::Run;
use candlecast::config::EngineConfig;
use candlecast::domain::candle::{Candle, Interval};
use candlecast::domain::decision::{Decision, ManagementAction, OpenRequest};
use candlecast::domain::events::EngineEvent;
use candlecast::domain::frame::{FrameSchema, RunContext, RunMode};
use candlecast::domain::ports::ExchangeAdapter;
use candlecast::domain::risk::RiskProfile;
use candlecast::domain::signal::{Position, SignalId};
use candlecast::infrastructure::event_bus::EventBus;
use candlecast::infrastructure::exchange::MockExchange;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn candle(index: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
    Candle {
        open_time: index * 60_000,
        open,
        high,
        low,
        close,
        volume: dec!(10),
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        slippage_percent: Decimal::ZERO,
        fee_percent: Decimal::ZERO,
        schedule_await_minutes: 30,
        partial_levels: BTreeSet::new(),
        breakeven_trigger_percent: None,
        grace_minutes: 5,
    }
}

fn run_context() -> RunContext {
    RunContext {
        mode: RunMode::Backtest,
        symbol: "BTCUSDT".to_string(),
        strategy_name: "scripted".to_string(),
        exchange_name: "mock".to_string(),
        frame_name: Some("test".to_string()),
    }
}

fn long_open(price_open: Decimal, tp: Decimal, sl: Decimal) -> Decision {
    Decision::Open(OpenRequest {
        position: Position::Long,
        price_open,
        price_take_profit: tp,
        price_stop_loss: sl,
        minute_estimated_time: 240,
        note: None,
    })
}

fn engine_with_bus() -> (SignalEngine, EventBus) {
    let bus = EventBus::new();
    let (clock, driver) = Clock::backtest(0);
    let engine = SignalEngine::new(
        run_context(),
        settings(),
        clock,
        Some(driver),
        RiskGate::new(RiskProfile::none()),
        bus.clone(),
        None,
    );
    (engine, bus)
}

fn opened_id(stream: &mut candlecast::infrastructure::event_bus::EventStream) -> SignalId {
    while let Some(event) = stream.try_next() {
        if let EngineEvent::SignalOpened { signal, .. } = event {
            return signal.id;
        }
    }
    panic!("no signal.opened event seen");
}

#[tokio::test]
async fn trailing_intents_tighten_and_noop() {
    let (mut engine, bus) = engine_with_bus();
    let mut stream = bus.subscribe();

    engine
        .submit_decision(long_open(dec!(100), dec!(120), dec!(90)), dec!(100))
        .unwrap();
    let id = opened_id(&mut stream);

    // +2% raises the long stop from 90 to 91.8.
    engine
        .submit_decision(
            Decision::Manage {
                signal_id: id.clone(),
                action: ManagementAction::TrailingStop { percent: dec!(2) },
            },
            dec!(104),
        )
        .unwrap();
    match stream.try_next().expect("trailing event") {
        EngineEvent::TrailingStopCommit {
            effective_price_stop_loss,
            ..
        } => assert_eq!(effective_price_stop_loss, dec!(91.80)),
        other => panic!("expected trailing_stop.commit, got {:?}", other),
    }

    // A loosening shift is ignored and emits nothing.
    engine
        .submit_decision(
            Decision::Manage {
                signal_id: id,
                action: ManagementAction::TrailingStop { percent: dec!(-5) },
            },
            dec!(104),
        )
        .unwrap();
    assert!(stream.try_next().is_none());
}

#[tokio::test]
async fn manual_breakeven_is_idempotent() {
    let (mut engine, bus) = engine_with_bus();
    let mut stream = bus.subscribe();

    engine
        .submit_decision(long_open(dec!(100), dec!(120), dec!(90)), dec!(100))
        .unwrap();
    let id = opened_id(&mut stream);

    for _ in 0..2 {
        engine
            .submit_decision(
                Decision::Manage {
                    signal_id: id.clone(),
                    action: ManagementAction::Breakeven,
                },
                dec!(106),
            )
            .unwrap();
    }

    let mut commits = 0;
    while let Some(event) = stream.try_next() {
        if let EngineEvent::BreakevenCommit {
            effective_price_stop_loss,
            ..
        } = event
        {
            assert_eq!(effective_price_stop_loss, dec!(100));
            commits += 1;
        }
    }
    assert_eq!(commits, 1, "breakeven must apply exactly once");
}

#[tokio::test]
async fn cancel_scheduled_intent_cancels() {
    let (mut engine, bus) = engine_with_bus();
    let mut stream = bus.subscribe();

    // Entry away from the market: the signal schedules.
    engine
        .submit_decision(long_open(dec!(105), dec!(120), dec!(95)), dec!(100))
        .unwrap();
    let id = match stream.try_next().expect("scheduled event") {
        EngineEvent::SignalScheduled { signal, .. } => signal.id,
        other => panic!("expected signal.scheduled, got {:?}", other),
    };

    engine
        .submit_decision(Decision::CancelScheduled { signal_id: id }, dec!(100))
        .unwrap();
    match stream.try_next().expect("cancelled event") {
        EngineEvent::SignalCancelled { cancel_reason, .. } => {
            assert_eq!(cancel_reason, "user");
        }
        other => panic!("expected signal.cancelled, got {:?}", other),
    }
}

#[tokio::test]
async fn entry_touch_activates_scheduled_signal_mid_candle() {
    let (mut engine, bus) = engine_with_bus();
    let mut stream = bus.subscribe();

    engine
        .submit_decision(long_open(dec!(105), dec!(120), dec!(95)), dec!(100))
        .unwrap();
    assert!(matches!(
        stream.try_next(),
        Some(EngineEvent::SignalScheduled { .. })
    ));

    // The candle rallies through the entry price.
    let c = candle(0, dec!(100), dec!(106), dec!(99), dec!(104));
    engine.begin_candle(&c).unwrap();
    engine.replay_candle(&c, Interval::OneMin).unwrap();

    match stream.try_next().expect("opened event") {
        EngineEvent::SignalOpened { signal, meta } => {
            assert_eq!(signal.price_open, dec!(105));
            assert!(meta.timestamp > 0 && meta.timestamp < 60_000);
        }
        other => panic!("expected signal.opened, got {:?}", other),
    }
}

// --- Run-level behaviors ---

struct FailingStrategy;

#[async_trait]
impl Strategy for FailingStrategy {
    fn name(&self) -> &str {
        "failing"
    }

    fn tick_interval(&self) -> Interval {
        Interval::OneMin
    }

    async fn get_signal(&self, _ctx: &StrategyContext) -> anyhow::Result<Decision> {
        Err(anyhow::anyhow!("indicator feed broken"))
    }
}

fn test_config(runs_dir: &Path) -> EngineConfig {
    EngineConfig {
        percent_slippage: Decimal::ZERO,
        percent_fee: Decimal::ZERO,
        schedule_await_minutes: 30,
        max_retries: 2,
        partial_levels: BTreeSet::new(),
        breakeven_trigger_percent: None,
        strategy_timeout_ms: 2_000,
        signal_grace_minutes: 5,
        cache_max_pages: 16,
        runs_dir: runs_dir.to_path_buf(),
        tick_interval: Interval::OneMin,
        risk_name: "none".to_string(),
        frames_path: PathBuf::from("frames.toml"),
    }
}

fn temp_runs_dir() -> PathBuf {
    std::env::temp_dir().join(format!("candlecast-lifecycle-{}", uuid::Uuid::new_v4()))
}

fn build_run(dir: &Path, strategy: Arc<dyn Strategy>, candle_count: i64) -> Run {
    let mock = Arc::new(MockExchange::new());
    mock.set_candles(
        "BTCUSDT",
        Interval::OneMin,
        (0..candle_count)
            .map(|i| candle(i, dec!(100), dec!(101), dec!(99), dec!(100)))
            .collect(),
    );
    let adapter: Arc<dyn ExchangeAdapter> = mock;
    Run::build(
        &test_config(dir),
        run_context(),
        adapter,
        strategy,
        RiskProfile::none(),
        Some(FrameSchema {
            name: "test".to_string(),
            interval: Interval::OneMin,
            start_time: 0,
            end_time: candle_count * 60_000,
        }),
    )
    .unwrap()
}

#[tokio::test]
async fn strategy_fault_surfaces_as_error_info_and_run_continues() {
    let dir = temp_runs_dir();
    let run = build_run(&dir, Arc::new(FailingStrategy), 3);
    let handle = run.handle();
    let mut stream = handle.subscribe();

    let summary = run.execute().await.unwrap();
    assert!(!summary.aborted);

    let mut saw_error_info = false;
    let mut saw_done = false;
    while let Some(event) = stream.try_next() {
        match event {
            EngineEvent::ErrorInfo { message, .. } => {
                assert!(message.contains("failing"));
                saw_error_info = true;
            }
            EngineEvent::Done { aborted, .. } => {
                assert!(!aborted);
                saw_done = true;
            }
            _ => {}
        }
    }
    assert!(saw_error_info);
    assert!(saw_done);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn stop_before_execute_drains_and_emits_done() {
    let dir = temp_runs_dir();
    let run = build_run(&dir, Arc::new(FailingStrategy), 50);
    let handle = run.handle();
    let mut stream = handle.subscribe();

    handle.stop();
    let summary = run.execute().await.unwrap();
    assert!(!summary.aborted);

    let mut progress_events = 0;
    let mut saw_done = false;
    while let Some(event) = stream.try_next() {
        match event {
            EngineEvent::BacktestProgress { .. } => progress_events += 1,
            EngineEvent::Done { .. } => saw_done = true,
            _ => {}
        }
    }
    assert_eq!(progress_events, 0);
    assert!(saw_done);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn run_persists_signals_and_commits_ndjson() {
    struct OpenOnceStrategy;

    #[async_trait]
    impl Strategy for OpenOnceStrategy {
        fn name(&self) -> &str {
            "open-once"
        }

        fn tick_interval(&self) -> Interval {
            Interval::OneMin
        }

        async fn get_signal(&self, ctx: &StrategyContext) -> anyhow::Result<Decision> {
            if ctx.now() == 0 {
                Ok(long_open(dec!(100), dec!(101), dec!(95)))
            } else {
                Ok(Decision::Wait)
            }
        }
    }

    let dir = temp_runs_dir();
    let run = build_run(&dir, Arc::new(OpenOnceStrategy), 3);
    let summary = run.execute().await.unwrap();
    assert_eq!(summary.signals_closed, 1);

    let run_dir = std::fs::read_dir(&dir)
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let signals = std::fs::read_to_string(run_dir.join("signals.ndjson")).unwrap();
    let commits = std::fs::read_to_string(run_dir.join("commits.ndjson")).unwrap();

    // Opened and closed snapshots; creation, entry and close commits.
    assert_eq!(signals.lines().count(), 2);
    assert!(commits.lines().count() >= 3);
    assert!(commits.contains("open_accepted"));
    assert!(commits.contains("take_profit_touched"));

    std::fs::remove_dir_all(&dir).unwrap();
}
