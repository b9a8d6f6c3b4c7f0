//! Configuration management module

pub mod settings;

pub use settings::*;

use crate::{
    capital::AllocationTarget,
    connectors::{fees::FeeSchedule, Exchange, TradingMode},
    data::{Asset, Pair},
    strategy::ThresholdPolicy,
    EngineError, Result,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Main configuration structure for the arbitrage engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scanner configuration
    pub scanner: ScannerConfig,
    /// Dynamic threshold policy
    pub threshold: ThresholdPolicy,
    /// Capital allocation configuration
    pub capital: CapitalConfig,
    /// Execution configuration
    pub execution: ExecutionConfig,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
    /// Exchange configuration
    pub exchanges: ExchangeListConfig,
}

/// Scanner-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Pairs scanned for cross-exchange spreads, "BASE/QUOTE" form
    pub pairs: Vec<String>,
    /// Curated triangular cycles as currency triples
    pub triangular_paths: Vec<[String; 3]>,
    /// Also derive triangular paths from the live pair universe
    pub derive_triangular_paths: bool,
    /// Hard cap on quote value per trade
    pub max_trade_usd: Decimal,
    /// Required depth as a multiple of trade value
    pub depth_multiplier: Decimal,
    /// Slippage allowance fed to the profit model
    pub slippage_pct: Decimal,
    /// Books older than this are excluded from a cycle's view
    pub max_book_age_secs: i64,
    /// Levels requested from adapters
    pub book_depth: usize,
}

/// Latency profile the deployment runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    /// High-latency (residential) profile
    Laptop,
    /// Low-latency (colocated) profile
    Server,
}

/// Capital allocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    /// Latency profile; the low-latency profile tightens the drift threshold
    pub latency_mode: LatencyMode,
    /// Allocation drift threshold (overrides the profile default when set)
    pub drift_threshold: Option<Decimal>,
    /// Deviation at which a transfer is forced regardless of cost
    pub critical_drift_threshold: Decimal,
    /// Estimated loss rate of a triangular conversion
    pub conversion_loss_rate: Decimal,
    /// Minimum net rate a conversion route must clear
    pub min_conversion_profit_pct: Decimal,
    /// Stable reserves below this flip the capital mode to bottlenecked
    pub bottleneck_floor: Decimal,
    /// Per-asset target allocation percentages
    pub target_allocations: HashMap<String, Decimal>,
    /// Bucket split while in BTC mode
    pub btc_mode: AllocationTarget,
    /// Bucket split while in GOLD mode
    pub gold_mode: AllocationTarget,
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Order timeout in milliseconds
    pub order_timeout_ms: u64,
    /// Book fetch timeout in milliseconds
    pub book_fetch_timeout_ms: u64,
    /// Base scan cycle interval in milliseconds (doubles when degraded)
    pub cycle_interval_ms: u64,
    /// Per-cycle scan time budget in milliseconds; remaining work is
    /// abandoned when exceeded
    pub scan_budget_ms: u64,
    /// Scan cycles between allocation (balance/drift) cycles
    pub allocation_every_n_cycles: u64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,
    /// Prometheus exporter port when metrics are enabled
    pub metrics_port: u16,
    /// Health check interval in seconds
    pub health_check_interval_secs: u64,
}

/// Exchange list configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeListConfig {
    /// Enabled exchanges
    pub enabled: Vec<String>,
    /// Per-exchange fee schedules
    pub fees: HashMap<String, FeeSchedule>,
}

impl EngineConfig {
    /// Load configuration from a TOML file, expanding ${VAR} references
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;
        let content = EnvExpander::expand(&content)?;

        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate the configuration. Failures here are fatal at startup;
    /// nothing in this structure is re-validated mid-cycle.
    pub fn validate(&self) -> Result<()> {
        if self.tradable_pairs()?.is_empty() {
            return Err(EngineError::Config("At least one pair is required".to_string()).into());
        }

        ConfigValidator::validate_positive(self.scanner.max_trade_usd, "max_trade_usd")?;
        ConfigValidator::validate_positive(self.scanner.depth_multiplier, "depth_multiplier")?;
        ConfigValidator::validate_rate(self.scanner.slippage_pct, "slippage_pct")?;

        if self.threshold.floor > self.threshold.ceiling {
            return Err(EngineError::Config(
                "threshold floor must not exceed ceiling".to_string(),
            )
            .into());
        }

        let drift = self.drift_threshold();
        ConfigValidator::validate_rate(drift, "drift_threshold")?;
        ConfigValidator::validate_rate(
            self.capital.critical_drift_threshold,
            "critical_drift_threshold",
        )?;
        if drift >= self.capital.critical_drift_threshold {
            return Err(EngineError::Config(
                "drift_threshold must be below critical_drift_threshold".to_string(),
            )
            .into());
        }
        self.capital.btc_mode.validate()?;
        self.capital.gold_mode.validate()?;
        self.target_allocations()?;

        if self.execution.order_timeout_ms == 0 || self.execution.book_fetch_timeout_ms == 0 {
            return Err(
                EngineError::Config("timeouts must be greater than 0".to_string()).into(),
            );
        }

        let enabled = self.enabled_exchanges()?;
        if enabled.len() < 2 {
            return Err(EngineError::Config(
                "At least two exchanges required for arbitrage".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// The effective drift threshold for the configured latency profile
    pub fn drift_threshold(&self) -> Decimal {
        self.capital.drift_threshold.unwrap_or(match self.capital.latency_mode {
            LatencyMode::Laptop => ConfigDefaults::DRIFT_THRESHOLD,
            LatencyMode::Server => ConfigDefaults::DRIFT_THRESHOLD_LOW_LATENCY,
        })
    }

    /// Parsed pair list
    pub fn tradable_pairs(&self) -> Result<Vec<Pair>> {
        self.scanner.pairs.iter().map(|s| Ok(s.parse()?)).collect()
    }

    /// Parsed curated triangular paths
    pub fn triangular_paths(&self) -> Result<Vec<[Asset; 3]>> {
        self.scanner
            .triangular_paths
            .iter()
            .map(|[a, b, c]| Ok([a.parse()?, b.parse()?, c.parse()?]))
            .collect()
    }

    /// Parsed per-asset target allocations
    pub fn target_allocations(&self) -> Result<BTreeMap<Asset, Decimal>> {
        let mut targets = BTreeMap::new();
        let mut sum = Decimal::ZERO;
        for (asset, pct) in &self.capital.target_allocations {
            ConfigValidator::validate_rate(*pct, "target allocation")?;
            targets.insert(asset.parse::<Asset>()?, *pct);
            sum += *pct;
        }
        if !targets.is_empty() && (sum - Decimal::ONE).abs() > crate::capital::SPLIT_EPSILON {
            return Err(EngineError::Config(format!(
                "target allocations must sum to 1.0, got {}",
                sum
            ))
            .into());
        }
        Ok(targets)
    }

    /// Parsed enabled exchange list
    pub fn enabled_exchanges(&self) -> Result<Vec<Exchange>> {
        self.exchanges.enabled.iter().map(|s| Ok(s.parse()?)).collect()
    }

    /// Fee schedules keyed by exchange
    pub fn fee_schedules(&self) -> Result<HashMap<Exchange, FeeSchedule>> {
        let mut schedules = HashMap::new();
        for (name, schedule) in &self.exchanges.fees {
            schedules.insert(name.parse::<Exchange>()?, *schedule);
        }
        Ok(schedules)
    }

    /// Bucket split for a trading mode
    pub fn allocation_target(&self, mode: TradingMode) -> AllocationTarget {
        match mode {
            TradingMode::BtcMode => self.capital.btc_mode,
            TradingMode::GoldMode => self.capital.gold_mode,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut fees = HashMap::new();
        for name in ["binance", "bybit", "kraken", "coinbase"] {
            fees.insert(name.to_string(), FeeSchedule::default());
        }
        let mut target_allocations = HashMap::new();
        target_allocations.insert("BTC".to_string(), rust_decimal_macros::dec!(0.50));
        target_allocations.insert("USDT".to_string(), rust_decimal_macros::dec!(0.25));
        target_allocations.insert("USDC".to_string(), rust_decimal_macros::dec!(0.25));

        Self {
            scanner: ScannerConfig {
                pairs: vec![
                    "BTC/USDT".to_string(),
                    "BTC/USDC".to_string(),
                    "ETH/USDT".to_string(),
                    "ETH/USDC".to_string(),
                    "SOL/USDT".to_string(),
                    "SOL/USDC".to_string(),
                ],
                triangular_paths: vec![
                    [
                        "USDT".to_string(),
                        "BTC".to_string(),
                        "ETH".to_string(),
                    ],
                    [
                        "USDT".to_string(),
                        "ETH".to_string(),
                        "SOL".to_string(),
                    ],
                ],
                derive_triangular_paths: true,
                max_trade_usd: ConfigDefaults::MAX_TRADE_USD,
                depth_multiplier: ConfigDefaults::DEPTH_MULTIPLIER,
                slippage_pct: ConfigDefaults::SLIPPAGE_PCT,
                max_book_age_secs: 30,
                book_depth: 10,
            },
            threshold: ThresholdPolicy::default(),
            capital: CapitalConfig {
                latency_mode: LatencyMode::Laptop,
                drift_threshold: None,
                critical_drift_threshold: ConfigDefaults::CRITICAL_DRIFT_THRESHOLD,
                conversion_loss_rate: ConfigDefaults::CONVERSION_LOSS_RATE,
                min_conversion_profit_pct: rust_decimal_macros::dec!(-0.002),
                bottleneck_floor: ConfigDefaults::BOTTLENECK_FLOOR,
                target_allocations,
                btc_mode: AllocationTarget::for_mode(TradingMode::BtcMode),
                gold_mode: AllocationTarget::for_mode(TradingMode::GoldMode),
            },
            execution: ExecutionConfig {
                order_timeout_ms: ConfigDefaults::ORDER_TIMEOUT_MS,
                book_fetch_timeout_ms: ConfigDefaults::BOOK_FETCH_TIMEOUT_MS,
                cycle_interval_ms: ConfigDefaults::CYCLE_INTERVAL_MS,
                scan_budget_ms: ConfigDefaults::SCAN_BUDGET_MS,
                allocation_every_n_cycles: 10,
            },
            monitoring: MonitoringConfig {
                enable_metrics: false,
                metrics_port: 9090,
                health_check_interval_secs: ConfigDefaults::HEALTH_CHECK_INTERVAL_SECS,
            },
            exchanges: ExchangeListConfig {
                enabled: vec![
                    "binance".to_string(),
                    "kraken".to_string(),
                    "coinbase".to_string(),
                ],
                fees,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_validation() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_exchange_rejected() {
        let mut config = EngineConfig::default();
        config.exchanges.enabled = vec!["binance".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_split_rejected() {
        let mut config = EngineConfig::default();
        config.capital.btc_mode.arbitrage_pct = dec!(0.9);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_drift_must_stay_below_critical() {
        let mut config = EngineConfig::default();
        config.capital.drift_threshold = Some(dec!(0.40));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_latency_profile_drives_drift_threshold() {
        let mut config = EngineConfig::default();
        assert_eq!(config.drift_threshold(), dec!(0.15));
        config.capital.latency_mode = LatencyMode::Server;
        assert_eq!(config.drift_threshold(), dec!(0.10));
        config.capital.drift_threshold = Some(dec!(0.12));
        assert_eq!(config.drift_threshold(), dec!(0.12));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(!toml_str.is_empty());

        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.scanner.pairs, parsed.scanner.pairs);
        assert_eq!(config.scanner.max_trade_usd, parsed.scanner.max_trade_usd);
    }

    #[test]
    fn test_config_from_file() {
        let config = EngineConfig::default();
        let toml_content = toml::to_string(&config).unwrap();

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let loaded = EngineConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.scanner.pairs, loaded.scanner.pairs);
    }

    #[test]
    fn test_pair_parsing() {
        let config = EngineConfig::default();
        let pairs = config.tradable_pairs().unwrap();
        assert!(pairs.contains(&Pair::new(Asset::BTC, Asset::USDT).unwrap()));
    }

    #[test]
    fn test_target_allocations_must_sum_to_one() {
        let mut config = EngineConfig::default();
        config
            .capital
            .target_allocations
            .insert("ETH".to_string(), dec!(0.10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_pair_string_rejected() {
        let mut config = EngineConfig::default();
        config.scanner.pairs.push("NOTAPAIR".to_string());
        assert!(config.validate().is_err());
    }
}
