//! Token, cost and call-count accounting.
//!
//! Everything here merges by field-wise addition so that task, course and run
//! totals are pure sums of their parts.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Raw token counts reported by a backend for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Thinking tokens, for backends that report them separately.
    #[serde(default)]
    pub reasoning_tokens: u64,
    /// Prompt tokens served from the backend's cache.
    #[serde(default)]
    pub cached_tokens: u64,
}

/// Per-million-token prices in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Known list prices; unknown models fall back to the cheapest tier.
    pub fn for_model(model: &str) -> Self {
        match model {
            "gemini-2.0-flash" => Self::new(0.10, 0.40),
            "gemini-2.5-flash" => Self::new(0.30, 2.50),
            "gemini-3-pro-preview" => Self::new(2.00, 12.00),
            "gemini-3-flash-preview" => Self::new(0.50, 3.00),
            _ => Self::default(),
        }
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::new(0.10, 0.40)
    }
}

/// Derived cost in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost {
            input: self.input + rhs.input,
            output: self.output + rhs.output,
            total: self.total + rhs.total,
        }
    }
}

/// Token counts plus their priced cost.
///
/// Cost can only be produced from counts and a [`Pricing`], so it never
/// drifts from the tokens it claims to price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetrics {
    input_tokens: u64,
    output_tokens: u64,
    reasoning_tokens: u64,
    cached_tokens: u64,
    cost: Cost,
}

impl TokenMetrics {
    /// Price one call's usage. Reasoning tokens bill at the output rate.
    pub fn from_usage(usage: TokenUsage, pricing: &Pricing) -> Self {
        let input = usage.input_tokens as f64 / 1_000_000.0 * pricing.input_per_million;
        let output = (usage.output_tokens + usage.reasoning_tokens) as f64 / 1_000_000.0
            * pricing.output_per_million;
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            cached_tokens: usage.cached_tokens,
            cost: Cost {
                input,
                output,
                total: input + output,
            },
        }
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn reasoning_tokens(&self) -> u64 {
        self.reasoning_tokens
    }

    pub fn cached_tokens(&self) -> u64 {
        self.cached_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.reasoning_tokens
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }
}

impl Add for TokenMetrics {
    type Output = TokenMetrics;

    fn add(self, rhs: TokenMetrics) -> TokenMetrics {
        TokenMetrics {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            reasoning_tokens: self.reasoning_tokens + rhs.reasoning_tokens,
            cached_tokens: self.cached_tokens + rhs.cached_tokens,
            cost: self.cost + rhs.cost,
        }
    }
}

impl AddAssign for TokenMetrics {
    fn add_assign(&mut self, rhs: TokenMetrics) {
        *self = *self + rhs;
    }
}

impl Sum for TokenMetrics {
    fn sum<I: Iterator<Item = TokenMetrics>>(iter: I) -> Self {
        iter.fold(TokenMetrics::default(), Add::add)
    }
}

impl<'a> Sum<&'a TokenMetrics> for TokenMetrics {
    fn sum<I: Iterator<Item = &'a TokenMetrics>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Backend call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmCallStats {
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
}

impl LlmCallStats {
    pub fn record_success(&mut self) {
        self.total += 1;
        self.successful += 1;
    }

    pub fn record_failure(&mut self) {
        self.total += 1;
        self.failed += 1;
    }
}

impl Add for LlmCallStats {
    type Output = LlmCallStats;

    fn add(self, rhs: LlmCallStats) -> LlmCallStats {
        LlmCallStats {
            total: self.total + rhs.total,
            successful: self.successful + rhs.successful,
            failed: self.failed + rhs.failed,
        }
    }
}

impl AddAssign for LlmCallStats {
    fn add_assign(&mut self, rhs: LlmCallStats) {
        *self = *self + rhs;
    }
}

impl Sum for LlmCallStats {
    fn sum<I: Iterator<Item = LlmCallStats>>(iter: I) -> Self {
        iter.fold(LlmCallStats::default(), Add::add)
    }
}
