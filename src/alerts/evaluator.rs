use crate::alerts::{AlertConfig, AlertDirection};
use crate::market::price::format_price_display;
use crate::market::types::PriceSnapshot;
use std::time::Duration;
use tokio::time::Instant;

pub const NOTIFICATION_COOLDOWN: Duration = Duration::from_millis(60_000);
/// Targets at or below this value count as unset.
pub const SANITY_FLOOR: i64 = 1_000;

pub const BUY_ALERT_TAG: &str = "treasury-buy-alert";
pub const SELL_ALERT_TAG: &str = "treasury-sell-alert";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertNotification {
    pub direction: AlertDirection,
    pub title: String,
    pub body: String,
    pub tag: &'static str,
}

impl AlertNotification {
    fn buy(current: i64, target: i64) -> Self {
        Self {
            direction: AlertDirection::Buy,
            title: "📉 Harga Emas Turun!".to_string(),
            body: format!(
                "Harga beli sekarang {}/gram\nTarget Anda: {}",
                format_price_display(Some(current)),
                format_price_display(Some(target))
            ),
            tag: BUY_ALERT_TAG,
        }
    }

    fn sell(current: i64, target: i64) -> Self {
        Self {
            direction: AlertDirection::Sell,
            title: "📈 Harga Emas Naik!".to_string(),
            body: format!(
                "Harga jual sekarang {}/gram\nTarget Anda: {}",
                format_price_display(Some(current)),
                format_price_display(Some(target))
            ),
            tag: SELL_ALERT_TAG,
        }
    }
}

#[derive(Debug)]
pub struct AlertEvaluator {
    cooldown: Duration,
    last_buy_fire_at: Option<Instant>,
    last_sell_fire_at: Option<Instant>,
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::new(NOTIFICATION_COOLDOWN)
    }
}

impl AlertEvaluator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_buy_fire_at: None,
            last_sell_fire_at: None,
        }
    }

    /// Returns the notifications due for this snapshot and stamps their fire
    /// time. Delivery outcome does not affect the cooldown.
    pub fn evaluate(
        &mut self,
        config: &AlertConfig,
        snapshot: &PriceSnapshot,
        now: Instant,
    ) -> Vec<AlertNotification> {
        let (Some(buying_rate), Some(selling_rate)) = (snapshot.buying_rate, snapshot.selling_rate)
        else {
            return Vec::new();
        };

        let mut due = Vec::new();

        if let Some(target) = effective_target(config.buy_enabled, config.buy_target) {
            if buying_rate <= target && self.cooled_down(self.last_buy_fire_at, now) {
                self.last_buy_fire_at = Some(now);
                due.push(AlertNotification::buy(buying_rate, target));
            }
        }

        if let Some(target) = effective_target(config.sell_enabled, config.sell_target) {
            if selling_rate >= target && self.cooled_down(self.last_sell_fire_at, now) {
                self.last_sell_fire_at = Some(now);
                due.push(AlertNotification::sell(selling_rate, target));
            }
        }

        due
    }

    fn cooled_down(&self, last_fire_at: Option<Instant>, now: Instant) -> bool {
        match last_fire_at {
            Some(fired_at) => now.saturating_duration_since(fired_at) > self.cooldown,
            None => true,
        }
    }
}

fn effective_target(enabled: bool, target: Option<i64>) -> Option<i64> {
    target.filter(|target| enabled && *target > SANITY_FLOOR)
}
