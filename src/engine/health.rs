//! Background health monitoring.
//!
//! The monitor runs on its own schedule and only ever alerts through logs
//! and the health report; it never blocks the detection or execution path.

use crate::connectors::{Exchange, HealthProvider, HealthReport, HealthStatus, PerformanceMetrics};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// An exchange stops counting as alive after this long without a heartbeat
const HEARTBEAT_TIMEOUT_SECS: i64 = 60;

/// Error budget per hour before an exchange is flagged unhealthy
const MAX_ERRORS_PER_HOUR: usize = 10;

/// API responses slower than this raise an alert, milliseconds
const SLOW_RESPONSE_MS: u64 = 5000;

/// Rolling scan-cycle timing statistics
#[derive(Debug, Default)]
pub struct CycleStats {
    durations: Mutex<VecDeque<f64>>,
}

impl CycleStats {
    const WINDOW: usize = 60;

    /// Record one cycle duration
    pub fn record(&self, duration: Duration) {
        let mut durations = self.durations.lock().expect("cycle stats lock poisoned");
        if durations.len() == Self::WINDOW {
            durations.pop_front();
        }
        durations.push_back(duration.as_secs_f64());
    }

    /// (std dev, mean) of the recorded window, zeros until enough samples
    pub fn jitter(&self) -> (f64, f64) {
        let durations = self.durations.lock().expect("cycle stats lock poisoned");
        if durations.len() < 2 {
            return (0.0, 0.0);
        }
        let samples: Vec<f64> = durations.iter().copied().collect();
        let mean = samples.iter().copied().mean();
        let std_dev = samples.iter().copied().std_dev();
        (std_dev, mean)
    }
}

/// Liveness bookkeeping for one exchange
#[derive(Debug, Clone)]
struct ExchangeHealth {
    last_heartbeat: DateTime<Utc>,
    response_time_ms: u64,
    error_times: Vec<DateTime<Utc>>,
}

impl ExchangeHealth {
    fn is_alive(&self, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat < ChronoDuration::seconds(HEARTBEAT_TIMEOUT_SECS)
    }

    fn errors_last_hour(&self, now: DateTime<Utc>) -> usize {
        self.error_times
            .iter()
            .filter(|t| now - **t < ChronoDuration::hours(1))
            .count()
    }
}

/// Shared health state: heartbeats, error rates and cycle jitter.
///
/// Cloned handles all point at the same state; the scan loop records into
/// it and the threshold policy reads from it.
#[derive(Debug, Clone, Default)]
pub struct EngineHealth {
    exchanges: Arc<DashMap<Exchange, ExchangeHealth>>,
    cycle_stats: Arc<CycleStats>,
}

impl EngineHealth {
    /// Create empty health state
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful round-trip to an exchange
    pub fn record_heartbeat(&self, exchange: Exchange, response_time_ms: u64) {
        let mut entry = self
            .exchanges
            .entry(exchange)
            .or_insert_with(|| ExchangeHealth {
                last_heartbeat: Utc::now(),
                response_time_ms,
                error_times: Vec::new(),
            });
        entry.last_heartbeat = Utc::now();
        entry.response_time_ms = response_time_ms;
    }

    /// Record a failed call against an exchange's error budget
    pub fn record_error(&self, exchange: Exchange) {
        let now = Utc::now();
        let mut entry = self
            .exchanges
            .entry(exchange)
            .or_insert_with(|| ExchangeHealth {
                last_heartbeat: now,
                response_time_ms: 0,
                error_times: Vec::new(),
            });
        entry.error_times.push(now);
        entry
            .error_times
            .retain(|t| now - *t < ChronoDuration::hours(1));
    }

    /// Record one scan cycle duration
    pub fn record_cycle(&self, duration: Duration) {
        self.cycle_stats.record(duration);
    }

    fn classify(&self) -> HealthStatus {
        let now = Utc::now();
        let total = self.exchanges.len();
        if total == 0 {
            return HealthStatus::Healthy;
        }
        let mut dead = 0usize;
        let mut degraded = 0usize;
        for entry in self.exchanges.iter() {
            let health = entry.value();
            if !health.is_alive(now) {
                dead += 1;
            } else if health.errors_last_hour(now) >= MAX_ERRORS_PER_HOUR
                || health.response_time_ms > SLOW_RESPONSE_MS
            {
                degraded += 1;
            }
        }
        if dead * 2 >= total {
            HealthStatus::Critical
        } else if dead > 0 || degraded > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl HealthProvider for EngineHealth {
    fn get_health_status(&self) -> HealthReport {
        let (std_cycle_time, mean_cycle_time) = self.cycle_stats.jitter();
        HealthReport {
            overall: self.classify(),
            performance: PerformanceMetrics {
                std_cycle_time,
                mean_cycle_time,
            },
        }
    }
}

/// Periodic checker that surfaces health problems as log alerts
pub struct HealthMonitor {
    health: EngineHealth,
    check_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl HealthMonitor {
    /// Create a monitor over shared health state
    pub fn new(health: EngineHealth, check_interval: Duration) -> Self {
        Self {
            health,
            check_interval,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle used to stop the monitor
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the check loop until stopped. Spawn this on its own task; it
    /// only alerts and never touches the hot path.
    pub async fn run(self) {
        info!(
            interval_secs = self.check_interval.as_secs(),
            "health monitor started"
        );
        while !self.stop.load(Ordering::Relaxed) {
            self.check_all();
            tokio::time::sleep(self.check_interval).await;
        }
        info!("health monitor stopped");
    }

    fn check_all(&self) {
        let now = Utc::now();
        for entry in self.health.exchanges.iter() {
            let (exchange, health) = (entry.key(), entry.value());
            if !health.is_alive(now) {
                error!(
                    exchange = %exchange,
                    "exchange not responding for 60+ seconds"
                );
            } else {
                if health.response_time_ms > SLOW_RESPONSE_MS {
                    warn!(
                        exchange = %exchange,
                        response_ms = health.response_time_ms,
                        "slow API responses"
                    );
                }
                let errors = health.errors_last_hour(now);
                if errors >= MAX_ERRORS_PER_HOUR {
                    warn!(
                        exchange = %exchange,
                        errors_last_hour = errors,
                        "error budget exceeded"
                    );
                }
            }
        }
        let report = self.health.get_health_status();
        if report.overall != HealthStatus::Healthy {
            warn!(status = ?report.overall, "system health degraded");
        }
    }
}
