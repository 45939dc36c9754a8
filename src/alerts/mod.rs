pub mod debounce;
pub mod engine;
pub mod evaluator;

use crate::market::price::{format_price_input, parse_price_input};
use serde::{Deserialize, Serialize};

/// User alert thresholds, stored verbatim under the alert settings key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertConfig {
    pub buy_enabled: bool,
    pub buy_target: Option<i64>,
    pub sell_enabled: bool,
    pub sell_target: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertDirection {
    Buy,
    Sell,
}

impl AlertDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum AlertEdit {
    SetBuyEnabled(bool),
    ToggleBuy,
    SetBuyTarget(Option<i64>),
    BuyTargetText(String),
    SetSellEnabled(bool),
    ToggleSell,
    SetSellTarget(Option<i64>),
    SellTargetText(String),
}

impl AlertEdit {
    pub fn apply(&self, config: &AlertConfig) -> AlertConfig {
        let mut next = config.clone();
        match self {
            Self::SetBuyEnabled(enabled) => next.buy_enabled = *enabled,
            Self::ToggleBuy => next.buy_enabled = !next.buy_enabled,
            Self::SetBuyTarget(target) => next.buy_target = *target,
            Self::BuyTargetText(text) => next.buy_target = parse_price_input(Some(text)),
            Self::SetSellEnabled(enabled) => next.sell_enabled = *enabled,
            Self::ToggleSell => next.sell_enabled = !next.sell_enabled,
            Self::SetSellTarget(target) => next.sell_target = *target,
            Self::SellTargetText(text) => next.sell_target = parse_price_input(Some(text)),
        }
        next
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertSettingsView {
    pub config: AlertConfig,
    pub buy_input: String,
    pub sell_input: String,
}

impl AlertSettingsView {
    pub fn from_config(config: &AlertConfig) -> Self {
        Self {
            config: config.clone(),
            buy_input: format_price_input(config.buy_target),
            sell_input: format_price_input(config.sell_target),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TargetProgress {
    Reached,
    Waiting { remaining: i64 },
}

/// Distance between the live price and a target. `None` when either side
/// is unknown.
pub fn target_progress(
    direction: AlertDirection,
    current: Option<i64>,
    target: Option<i64>,
) -> Option<TargetProgress> {
    let (current, target) = (current?, target?);
    let progress = match direction {
        AlertDirection::Buy if current <= target => TargetProgress::Reached,
        AlertDirection::Buy => TargetProgress::Waiting {
            remaining: current.saturating_sub(target),
        },
        AlertDirection::Sell if current >= target => TargetProgress::Reached,
        AlertDirection::Sell => TargetProgress::Waiting {
            remaining: target.saturating_sub(current),
        },
    };
    Some(progress)
}
