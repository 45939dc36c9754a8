use crate::error::AppError;
use crate::market::price::parse_price_wire;
use chrono::{Duration, Local, Months, NaiveDateTime};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_HISTORY_ENDPOINT: &str =
    "https://webv2-api.treasury.id/api/v1/external/wp/gold/price";
const REQUEST_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATETIME_SEPARATOR: &str = " - ";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Timeframe {
    #[default]
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "1W")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1D",
            Self::OneWeek => "1W",
            Self::OneMonth => "1M",
        }
    }

    pub fn start_from(self, now: NaiveDateTime) -> NaiveDateTime {
        let start = match self {
            Self::OneDay => now.checked_sub_signed(Duration::days(1)),
            Self::OneWeek => now.checked_sub_signed(Duration::days(7)),
            Self::OneMonth => now.checked_sub_months(Months::new(1)),
        };
        start.unwrap_or(now)
    }
}

impl FromStr for Timeframe {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "1D" => Ok(Self::OneDay),
            "1W" => Ok(Self::OneWeek),
            "1M" => Ok(Self::OneMonth),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported timeframe: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistoryRequest {
    pub start_date: String,
    pub end_date: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub region: &'static str,
    #[serde(rename = "assetType")]
    pub asset_type: &'static str,
}

impl HistoryRequest {
    pub fn for_timeframe(timeframe: Timeframe, now: NaiveDateTime) -> Self {
        Self {
            start_date: timeframe
                .start_from(now)
                .format(REQUEST_DATE_FORMAT)
                .to_string(),
            end_date: now.format(REQUEST_DATE_FORMAT).to_string(),
            kind: "daily",
            region: "id",
            asset_type: "gold",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalPricePoint {
    pub timestamp: String,
    pub buy: f64,
    pub sell: f64,
}

#[derive(Debug, Deserialize)]
struct HistoryResponseWire {
    data: Option<HistoryDataWire>,
}

#[derive(Debug, Deserialize)]
struct HistoryDataWire {
    attributes: Option<HistoryAttributesWire>,
}

#[derive(Debug, Deserialize)]
struct HistoryAttributesWire {
    prices: Option<Vec<HistoryPriceWire>>,
}

#[derive(Debug, Deserialize)]
struct HistoryPriceWire {
    #[serde(default)]
    datetime: String,
    buy_price: Option<PriceValueWire>,
    sell_price: Option<PriceValueWire>,
}

/// Prices usually arrive as numbers; grouped strings are tolerated.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceValueWire {
    Number(f64),
    Text(String),
}

impl PriceValueWire {
    fn as_f64(&self) -> f64 {
        match self {
            Self::Number(value) => *value,
            Self::Text(text) => parse_price_wire(Some(text)).map_or(0.0, |value| value as f64),
        }
    }
}

impl HistoryResponseWire {
    fn into_points(self) -> Vec<HistoricalPricePoint> {
        let prices = self
            .data
            .and_then(|data| data.attributes)
            .and_then(|attributes| attributes.prices)
            .unwrap_or_default();

        prices
            .into_iter()
            .map(|item| HistoricalPricePoint {
                timestamp: item.datetime,
                buy: item.buy_price.as_ref().map_or(0.0, PriceValueWire::as_f64),
                sell: item.sell_price.as_ref().map_or(0.0, PriceValueWire::as_f64),
            })
            .collect()
    }
}

pub fn resolve_history_endpoint() -> String {
    std::env::var("HISTORY_ENDPOINT")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_HISTORY_ENDPOINT.to_string())
}

pub async fn fetch_history(
    client: &Client,
    endpoint: &str,
    timeframe: Timeframe,
) -> Result<Vec<HistoricalPricePoint>, AppError> {
    let request = HistoryRequest::for_timeframe(timeframe, Local::now().naive_local());
    fetch_history_with_request(client, endpoint, &request).await
}

pub async fn fetch_history_with_request(
    client: &Client,
    endpoint: &str,
    request: &HistoryRequest,
) -> Result<Vec<HistoricalPricePoint>, AppError> {
    let response = client
        .post(endpoint)
        .json(request)
        .send()
        .await?
        .error_for_status()?;
    let payload = response.json::<HistoryResponseWire>().await?;
    let points = payload.into_points();
    tracing::debug!(count = points.len(), "fetched historical prices");
    Ok(points)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub timestamp: String,
    pub label: String,
    pub buy: f64,
    pub sell: f64,
}

pub fn chart_points(points: Vec<HistoricalPricePoint>, timeframe: Timeframe) -> Vec<ChartPoint> {
    points
        .into_iter()
        .map(|point| ChartPoint {
            label: axis_label(&point.timestamp, timeframe),
            timestamp: point.timestamp,
            buy: point.buy,
            sell: point.sell,
        })
        .collect()
}

/// Chart axis label for a `dd/MM/yy - HH:mm` datetime.
pub fn axis_label(datetime: &str, timeframe: Timeframe) -> String {
    if datetime.is_empty() {
        return String::new();
    }

    let (date_part, time_part) = datetime
        .split_once(DATETIME_SEPARATOR)
        .unwrap_or((datetime, ""));

    match timeframe {
        Timeframe::OneDay => time_part.to_string(),
        Timeframe::OneWeek | Timeframe::OneMonth => {
            let mut pieces = date_part.split('/');
            match (pieces.next(), pieces.next()) {
                (Some(day), Some(month)) => format!("{day}/{month}"),
                _ => date_part.to_string(),
            }
        }
    }
}
