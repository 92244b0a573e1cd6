//! Exchange configuration: JSON file plus environment overrides.
//!
//! `EXCHANGE_CONFIG` names a JSON file; `RECONCILIATION_MODE`,
//! `IMPEDIMENT_FACTOR` and `BATCH_TIMEOUT_MS` override single fields.
//! Everything is checked by [`ExchangeConfig::validate`] before use.

use crate::error::{Error, Result};
use crate::funds::{Asset, AssetPair};
use crate::ghost::{check_factor, FixedImpediment, ImpedimentModel, RandomImpediment, ReconciliationMode, SequenceImpediment};
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum ImpedimentConfig {
    Fixed { factor: Decimal },
    Sequence { values: Vec<Decimal>, fallback: Decimal },
    Random { seed: u64, min: Decimal, max: Decimal },
}

impl ImpedimentConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            ImpedimentConfig::Fixed { factor } => check_factor(*factor),
            ImpedimentConfig::Sequence { values, fallback } => {
                values.iter().try_for_each(|v| check_factor(*v))?;
                check_factor(*fallback)
            }
            ImpedimentConfig::Random { min, max, .. } => {
                check_factor(*min)?;
                check_factor(*max)?;
                if min > max {
                    return Err(Error::Configuration(format!("impediment range min {} exceeds max {}", min, max)));
                }
                Ok(())
            }
        }
    }

    pub fn build(&self) -> Result<Box<dyn ImpedimentModel>> {
        self.validate()?;
        Ok(match self {
            ImpedimentConfig::Fixed { factor } => Box::new(FixedImpediment(*factor)),
            ImpedimentConfig::Sequence { values, fallback } => {
                Box::new(SequenceImpediment::new(values.iter().copied(), *fallback))
            }
            ImpedimentConfig::Random { seed, min, max } => Box::new(RandomImpediment::new(*seed, *min, *max)?),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base: Asset,
    pub quote: Asset,
    pub reconciliation: ReconciliationMode,
    pub impediment: ImpedimentConfig,
    /// `None` batches trade prints by sweep boundary only.
    pub batch_timeout_ms: Option<i64>,
    /// Levels per side shown in book snapshots.
    pub snapshot_depth: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base: Asset::Btc,
            quote: Asset::Usd,
            reconciliation: ReconciliationMode::Reluctant,
            impediment: ImpedimentConfig::Fixed {
                factor: Decimal::new(5, 1),
            },
            batch_timeout_ms: None,
            snapshot_depth: 10,
        }
    }
}

impl ExchangeConfig {
    pub fn pair(&self) -> AssetPair {
        AssetPair::new(self.base, self.quote)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Configuration(format!("invalid config json: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the `EXCHANGE_CONFIG` file, then single-field overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("EXCHANGE_CONFIG") {
            Ok(path) => {
                let json = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Configuration(format!("cannot read {}: {}", path, e)))?;
                info!("config loaded path={}", path);
                serde_json::from_str(&json).map_err(|e| Error::Configuration(format!("invalid config json in {}: {}", path, e)))?
            }
            Err(_) => ExchangeConfig::default(),
        };
        if let Ok(mode) = std::env::var("RECONCILIATION_MODE") {
            config.reconciliation = mode.parse()?;
        }
        if let Ok(factor) = std::env::var("IMPEDIMENT_FACTOR") {
            let factor: Decimal = factor
                .trim()
                .parse()
                .map_err(|_| Error::Configuration(format!("IMPEDIMENT_FACTOR is not a number: {:?}", factor)))?;
            config.impediment = ImpedimentConfig::Fixed { factor };
        }
        if let Ok(ms) = std::env::var("BATCH_TIMEOUT_MS") {
            let ms: i64 = ms
                .trim()
                .parse()
                .map_err(|_| Error::Configuration(format!("BATCH_TIMEOUT_MS is not an integer: {:?}", ms)))?;
            config.batch_timeout_ms = Some(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base == self.quote {
            return Err(Error::Configuration(format!("base and quote are both {}", self.base)));
        }
        if !self.reconciliation.is_supported() {
            return Err(Error::Configuration(format!(
                "reconciliation mode {} is not implemented",
                self.reconciliation
            )));
        }
        if let Some(ms) = self.batch_timeout_ms {
            if ms <= 0 {
                return Err(Error::Configuration(format!("batch timeout must be positive, got {}ms", ms)));
            }
        }
        self.impediment.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        ExchangeConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_json_with_defaults_for_missing_fields() {
        let config = ExchangeConfig::from_json(
            r#"{
                "reconciliation": "aggressive_limited",
                "impediment": { "model": "sequence", "values": ["0.25", "1.0"], "fallback": "0" },
                "batch_timeout_ms": 250
            }"#,
        )
        .unwrap();
        assert_eq!(config.reconciliation, ReconciliationMode::AggressiveLimited);
        assert_eq!(config.batch_timeout_ms, Some(250));
        assert_eq!(config.pair(), AssetPair::default());
        assert_eq!(config.snapshot_depth, 10);
    }

    #[test]
    fn rejects_unimplemented_mode() {
        let err = ExchangeConfig::from_json(r#"{ "reconciliation": "midpoint_bounded" }"#).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let err = ExchangeConfig::from_json(r#"{ "batch_timeout_ms": 0 }"#).unwrap_err();
        assert!(err.is_configuration());
        let err = ExchangeConfig::from_json(r#"{ "batch_timeout_ms": -10 }"#).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn rejects_bad_impediment() {
        let config = ExchangeConfig {
            impediment: ImpedimentConfig::Random {
                seed: 1,
                min: Decimal::new(8, 1),
                max: Decimal::new(2, 1),
            },
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_configuration());
        let config = ExchangeConfig {
            impediment: ImpedimentConfig::Fixed { factor: Decimal::from(2) },
            ..Default::default()
        };
        assert!(config.impediment.build().is_err());
    }

    #[test]
    fn rejects_same_base_and_quote() {
        let config = ExchangeConfig {
            quote: Asset::Btc,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_configuration_error() {
        assert!(ExchangeConfig::from_json("{").unwrap_err().is_configuration());
    }
}
