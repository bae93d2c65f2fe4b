use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use tracing::{debug, warn};

use crate::errors::ConfigError;

const MICROS_PER_UNIT: f64 = 1_000_000.0;

/// Monetary amount with exactly six fractional digits.
///
/// Stored as whole micro-units so that summing many small charges never
/// accumulates floating-point drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cost(i64);

impl Cost {
    pub const ZERO: Cost = Cost(0);

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn micros(self) -> i64 {
        self.0
    }

    /// Rounds half away from zero to six decimals.
    pub fn from_f64(value: f64) -> Self {
        Self((value * MICROS_PER_UNIT).round() as i64)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_UNIT
    }

    /// `tokens / 1000 * rate_per_1k`, rounded to six decimals.
    pub fn for_tokens(tokens: u32, rate_per_1k: f64) -> Self {
        // tokens / 1000 * rate * 1e6 == tokens * rate * 1000
        Self((f64::from(tokens) * rate_per_1k * 1000.0).round() as i64)
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Cost {
        iter.fold(Cost::ZERO, Add::add)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:06}", sign, abs / 1_000_000, abs % 1_000_000)
    }
}

impl Serialize for Cost {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Cost {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Cost::from_f64)
    }
}

/// Price per 1K tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input: f64,
    pub output: f64,
}

impl ModelRate {
    pub fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }
}

/// Wildcard model key consulted when a provider has no exact entry.
pub const ANY_MODEL: &str = "*";

/// `{provider: {model: {input, output}}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable {
    rates: HashMap<String, HashMap<String, ModelRate>>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, provider: &str, model: &str, rate: ModelRate) -> Self {
        self.insert(provider, model, rate);
        self
    }

    pub fn insert(&mut self, provider: &str, model: &str, rate: ModelRate) {
        self.rates
            .entry(provider.to_string())
            .or_default()
            .insert(model.to_string(), rate);
    }

    pub fn get(&self, provider: &str, model: &str) -> Option<ModelRate> {
        let models = self.rates.get(provider)?;
        models.get(model).or_else(|| models.get(ANY_MODEL)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (provider, models) in &self.rates {
            for (model, rate) in models {
                for (side, value) in [("input", rate.input), ("output", rate.output)] {
                    if !value.is_finite() || value < 0.0 {
                        return Err(ConfigError::invalid(
                            format!("rates.{provider}.{model}.{side}"),
                            format!("rate must be a finite non-negative number, got {value}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: Cost,
    pub output_cost: Cost,
    pub total_cost: Cost,
}

impl CostBreakdown {
    pub const ZERO: CostBreakdown = CostBreakdown {
        input_cost: Cost::ZERO,
        output_cost: Cost::ZERO,
        total_cost: Cost::ZERO,
    };
}

/// Prices completed calls from the configured rate table.
#[derive(Debug, Clone, Default)]
pub struct CostCalculator {
    rates: RateTable,
}

impl CostCalculator {
    pub fn new(rates: RateTable) -> Self {
        Self { rates }
    }

    /// Unknown `(provider, model)` pairs price at zero with a warning; cost
    /// lookup never fails a request.
    pub fn calculate(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
    ) -> CostBreakdown {
        let Some(rate) = self.rates.get(provider, model) else {
            warn!(
                provider = %provider,
                model = %model,
                "no rate configured, recording zero cost"
            );
            return CostBreakdown::ZERO;
        };

        let input_cost = Cost::for_tokens(input_tokens, rate.input);
        let output_cost = Cost::for_tokens(output_tokens, rate.output);
        let breakdown = CostBreakdown {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        };

        debug!(
            provider = %provider,
            model = %model,
            input_tokens,
            output_tokens,
            total_cost = %breakdown.total_cost,
            "💰 priced call"
        );
        breakdown
    }
}
