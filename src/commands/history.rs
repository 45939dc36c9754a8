use crate::error::AppError;
use crate::market::history::{chart_points, ChartPoint, Timeframe};
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use tauri::State;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryArgs {
    pub timeframe: Option<Timeframe>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryChart {
    pub timeframe: Timeframe,
    pub points: Vec<ChartPoint>,
}

#[tauri::command]
pub async fn history_prices(
    state: State<'_, AppState>,
    args: Option<HistoryArgs>,
) -> Result<HistoryChart, AppError> {
    let timeframe = args.unwrap_or_default().timeframe.unwrap_or_default();
    let points = state.services.history(timeframe).await?;

    Ok(HistoryChart {
        timeframe,
        points: chart_points(points, timeframe),
    })
}
