//! System orchestrator (SPEC_FULL §A), built and started the way
//! `rustrade::application::system::Application` wires its own agents:
//! `build()` constructs every adapter/repository/worker, `start()` spawns
//! the long-running tasks and returns a handle for graceful shutdown.

use crate::application::complex_cache::ComplexAlertCache;
use crate::application::fast_price_loop::FastPriceLoop;
use crate::application::klines_sweep::KlinesSweep;
use crate::application::lease_coordinator::{LeaseCoordinator, ShutdownGate};
use crate::application::price_fanin::{recv_tick, FanInSource, PriceFanIn};
use crate::application::ring_buffer::RingBufferStore;
use crate::application::safety_net_sweeper::SafetyNetSweeper;
use crate::application::tick_evaluator::TickEvaluator;
use crate::application::trigger_sink::TriggerSink;
use crate::config::Config;
use crate::domain::ports::{AdapterRegistry, ExchangePriceAdapter};
use crate::domain::repositories::{AlertRepository, LeaseRepository, UserDirectory};
use crate::domain::types::Market;
use crate::infrastructure::exchanges::binance::BinanceAdapter;
use crate::infrastructure::observability::reporter::EngineStats;
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::{SqliteAlertRepository, SqliteLeaseRepository, SqliteUserDirectory};
use crate::infrastructure::{RealtimeSink, TelegramMessenger};
use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Handle returned by `Engine::start`, kept by `main` for graceful shutdown
/// and for wiring a future HTTP surface onto the realtime feed.
pub struct EngineHandle {
    pub realtime: RealtimeSink,
    pub metrics: Arc<Metrics>,
    lease_coordinator: Arc<LeaseCoordinator>,
}

impl EngineHandle {
    /// Releases the lease (§4.I) so a standby instance doesn't wait out the
    /// full TTL before taking over.
    pub async fn shutdown(&self) {
        info!(scope = "alertEngine", "engine.shutdown.start");
        self.lease_coordinator.shutdown().await;
        info!(scope = "alertEngine", "engine.shutdown.done");
    }
}

pub struct Engine {
    config: Config,
    alerts: Arc<dyn AlertRepository>,
    adapters: AdapterRegistry,
    fanin: Arc<PriceFanIn>,
    ring_buffer: Arc<RingBufferStore>,
    complex_cache: Arc<ComplexAlertCache>,
    realtime: RealtimeSink,
    trigger_sink: Arc<TriggerSink>,
    tick_evaluator: Arc<TickEvaluator>,
    safety_net: Arc<SafetyNetSweeper>,
    fast_loop: Arc<FastPriceLoop>,
    klines_sweep: Arc<KlinesSweep>,
    lease_coordinator: Arc<LeaseCoordinator>,
    metrics: Arc<Metrics>,
    stats: Arc<RwLock<EngineStats>>,
}

impl Engine {
    pub async fn build(config: Config) -> Result<Self> {
        info!(scope = "alertEngine", "engine.build.start");

        // 1. Persistence.
        let db = Database::new(&config.database_url).await?;

        let alerts: Arc<dyn AlertRepository> = Arc::new(SqliteAlertRepository::new(db.pool.clone()));
        let users: Arc<dyn UserDirectory> = Arc::new(SqliteUserDirectory::new(db.pool.clone()));
        let leases: Arc<dyn LeaseRepository> = Arc::new(SqliteLeaseRepository::new(db.pool.clone()));

        // 2. Exchange adapters, keyed by exchange id (§9 dynamic dispatch).
        let binance: Arc<dyn ExchangePriceAdapter> = Arc::new(BinanceAdapter::new(
            config.binance_api_key.clone(),
            config.binance_spot_base_url.clone(),
            config.binance_futures_base_url.clone(),
        ));
        let mut adapters: AdapterRegistry = AdapterRegistry::new();
        adapters.insert("binance".to_string(), binance);

        // 3. Observability.
        let metrics = Arc::new(Metrics::new()?);
        let stats = Arc::new(RwLock::new(EngineStats::default()));

        // 4. Fan-in, ring buffer, complex alert cache (§4.B-D). These run
        // regardless of lease ownership.
        let fanin = Arc::new(PriceFanIn::new(Some(metrics.clone())));
        let ring_buffer = Arc::new(RingBufferStore::new(Some(metrics.clone())));
        let complex_cache = Arc::new(ComplexAlertCache::new(alerts.clone()));
        complex_cache.refresh().await?;

        // 5. Lease Coordinator (§4.I) gates the workers built below and
        // hands out the shutdown gate its own fire/cycle tasks register
        // with (§5).
        let lease_coordinator = Arc::new(LeaseCoordinator::new(
            leases,
            config.lease_owner_id.clone(),
            config.lease_ttl_secs,
        ));
        let shutdown_gate = lease_coordinator.shutdown_gate();

        // 6. Trigger Sink (§4.J) and the evaluators/sweepers that call it.
        let realtime = RealtimeSink::new();
        let messenger = Arc::new(TelegramMessenger::new(config.telegram_bot_token.clone()));
        let trigger_sink = Arc::new(TriggerSink::new(
            alerts.clone(),
            users,
            realtime.clone(),
            messenger,
            Some(metrics.clone()),
        ));

        let tick_evaluator = Arc::new(TickEvaluator::new(
            ring_buffer.clone(),
            complex_cache.clone(),
            trigger_sink.clone(),
            config.cooldown_secs,
            Some(metrics.clone()),
            Some(shutdown_gate.clone()),
        ));

        let safety_net = Arc::new(SafetyNetSweeper::new(
            tick_evaluator.clone(),
            config.sweep_interval_secs,
        ));

        let fast_loop = Arc::new(FastPriceLoop::new(
            alerts.clone(),
            adapters.clone(),
            trigger_sink.clone(),
            config.fast_price_interval_ms,
            Some(metrics.clone()),
        ));

        let klines_sweep = Arc::new(KlinesSweep::new(
            alerts.clone(),
            adapters.clone(),
            trigger_sink.clone(),
            config.klines_lookback_secs,
            config.klines_sweep_interval_secs,
            Some(metrics.clone()),
        ));

        info!(scope = "alertEngine", "engine.build.done");

        Ok(Self {
            config,
            alerts,
            adapters,
            fanin,
            ring_buffer,
            complex_cache,
            realtime,
            trigger_sink,
            tick_evaluator,
            safety_net,
            fast_loop,
            klines_sweep,
            lease_coordinator,
            metrics,
            stats,
        })
    }

    pub async fn start(self) -> Result<EngineHandle> {
        info!(scope = "alertEngine", "engine.start");

        // Fan-in producers: one per active (exchange, market) pair this
        // engine knows an adapter for. Both markets are polled so whichever
        // alerts exist get covered.
        for (exchange, adapter) in self.adapters.iter() {
            for market in [Market::Spot, Market::Futures] {
                self.fanin.spawn_producer(
                    exchange.clone(),
                    FanInSource {
                        adapter: adapter.clone(),
                        market,
                        poll_interval: Duration::from_millis(self.config.sample_interval_ms as u64),
                    },
                );
            }
        }

        // Complex Alert Cache periodic refresh (§4.D) — runs regardless of
        // lease ownership, same as the Fan-In above.
        {
            let cache = self.complex_cache.clone();
            let interval_secs = self.config.complex_cache_refresh_secs;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
                loop {
                    ticker.tick().await;
                    if let Err(err) = cache.refresh().await {
                        error!(scope = "alertEngine", "complex_cache.refresh_failed: {err}");
                    }
                }
            });
        }

        // Lease Coordinator background loop.
        tokio::spawn(Arc::clone(&self.lease_coordinator).run());

        // Tick consumer: drains every subscribed fan-in stream and hands
        // ticks to the Tick Evaluator (§4.E), gated on lease ownership (§5).
        for (exchange, _) in self.adapters.iter() {
            for market in [Market::Spot, Market::Futures] {
                let mut rx = self.fanin.subscribe();
                let exchange_market = format!("{exchange}|{market}");
                let evaluator = self.tick_evaluator.clone();
                let owned = self.lease_coordinator.owned_flag();
                let metrics = self.metrics.clone();
                tokio::spawn(async move {
                    while let Some(tick) = recv_tick(&mut rx, &exchange_market, Some(&*metrics)).await {
                        if owned.load(Ordering::SeqCst) {
                            evaluator.handle_tick(&tick).await;
                        }
                    }
                });
            }
        }

        // Safety-Net Sweeper (§4.F), Fast Price Alert Loop (§4.G), Klines
        // Sweep (§4.H): every worker owns its own interval, all gated on
        // lease ownership and on the shutdown gate (§5) — no new cycle
        // starts once shutdown is signalled, so `shutdown()` can wait for
        // whichever cycle is already running.
        let shutdown_gate = self.lease_coordinator.shutdown_gate();
        spawn_gated_interval(
            Duration::from_secs(self.config.sweep_interval_secs),
            self.lease_coordinator.owned_flag(),
            shutdown_gate.clone(),
            {
                let sweeper = self.safety_net.clone();
                move || {
                    let sweeper = sweeper.clone();
                    async move {
                        if let Err(err) = sweeper.sweep_once().await {
                            error!(scope = "alertEngine", "safety_net.sweep_failed: {err}");
                        }
                    }
                }
            },
        );

        spawn_gated_interval(
            Duration::from_millis(self.fast_loop_interval_ms()),
            self.lease_coordinator.owned_flag(),
            shutdown_gate.clone(),
            {
                let fast_loop = self.fast_loop.clone();
                move || {
                    let fast_loop = fast_loop.clone();
                    async move {
                        if let Err(err) = fast_loop.run_once().await {
                            error!(scope = "alertEngine", "fast_price_loop.run_failed: {err}");
                        }
                    }
                }
            },
        );

        {
            let klines_sweep = self.klines_sweep.clone();
            let owned = self.lease_coordinator.owned_flag();
            let shutdown_gate = shutdown_gate.clone();
            let interval_secs = self.config.klines_sweep_interval_secs;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(
                    crate::application::klines_sweep::KLINES_INITIAL_DELAY_SECS,
                ))
                .await;
                let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
                loop {
                    ticker.tick().await;
                    if !owned.load(Ordering::SeqCst) {
                        continue;
                    }
                    if !shutdown_gate.begin_cycle() {
                        break;
                    }
                    if let Err(err) = klines_sweep.sweep_once().await {
                        error!(scope = "alertEngine", "klines_sweep.sweep_failed: {err}");
                    }
                    shutdown_gate.end_cycle();
                }
            });
        }

        // Metrics reporter: periodic JSON-to-stdout snapshot.
        {
            let reporter = MetricsReporter::new(
                self.stats.clone(),
                (*self.metrics).clone(),
                self.config.metrics_report_interval_secs,
            );
            tokio::spawn(reporter.run());
        }

        // Stats refresh: keeps `EngineStats` current for the reporter.
        {
            let alerts = self.alerts.clone();
            let stats = self.stats.clone();
            let owned = self.lease_coordinator.owned_flag();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(30));
                loop {
                    ticker.tick().await;
                    let price_count = alerts.find_active_price_alerts().await.map(|a| a.len()).unwrap_or(0);
                    let complex_count = alerts.find_active_complex_alerts().await.map(|a| a.len()).unwrap_or(0);
                    let mut stats = stats.write().await;
                    stats.lease_owned = owned.load(Ordering::SeqCst);
                    stats.active_price_alerts = price_count;
                    stats.active_complex_alerts = complex_count;
                }
            });
        }

        Ok(EngineHandle {
            realtime: self.realtime,
            metrics: self.metrics,
            lease_coordinator: self.lease_coordinator,
        })
    }

    fn fast_loop_interval_ms(&self) -> u64 {
        self.config
            .fast_price_interval_ms
            .max(crate::application::fast_price_loop::FAST_PRICE_INTERVAL_MS_FLOOR)
    }
}

/// Spawns a long-running interval loop that only invokes `action` while
/// `owned` is true, otherwise idles through the tick (§5 lease gating).
/// Stops admitting new cycles once `shutdown_gate` is signalled, so a
/// cycle already running is the last one this loop starts.
fn spawn_gated_interval<F, Fut>(
    interval: Duration,
    owned: Arc<std::sync::atomic::AtomicBool>,
    shutdown_gate: Arc<ShutdownGate>,
    action: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if !owned.load(Ordering::SeqCst) {
                continue;
            }
            if !shutdown_gate.begin_cycle() {
                break;
            }
            action().await;
            shutdown_gate.end_cycle();
        }
    });
}
