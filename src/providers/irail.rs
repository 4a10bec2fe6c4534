use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

const IRAIL_BASE_URL: &str = "https://api.irail.be/liveboard/";

#[derive(Debug, Error)]
pub enum IrailError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// iRail API client for fetching liveboard snapshots.
///
/// The liveboard endpoint is anchored to a single date/time rather than a
/// range, so callers that want a window issue repeated point-in-time
/// queries with different `date`/`time` parameters.
pub struct IrailClient {
    client: Client,
}

impl IrailClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, IrailError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| IrailError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Fetch the liveboard for a station at a simulated date and time.
    /// `date` is DDMMYY and `time` is HHMM, both station-local.
    pub async fn get_liveboard(
        &self,
        station: &str,
        date: &str,
        time: &str,
    ) -> Result<LiveboardResponse, IrailError> {
        let url = format!(
            "{}?station={}&format=json&lang=en&date={}&time={}",
            IRAIL_BASE_URL,
            urlencoding::encode(station),
            date,
            time
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| IrailError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IrailError::Api(format!("HTTP error: {}", response.status())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IrailError::Network(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(
                station,
                error = %e,
                body = &body[..body.len().min(500)],
                "Failed to parse liveboard response"
            );
            IrailError::Parse(e.to_string())
        })
    }
}

// Response structures. The API delivers numeric fields as strings, so the
// wire model keeps them as strings and parses in the accessors.

#[derive(Debug, Clone, Deserialize)]
pub struct LiveboardResponse {
    pub departures: Option<DepartureList>,
}

impl LiveboardResponse {
    /// All departures in the response, empty when the block is absent.
    pub fn into_departures(self) -> Vec<RawDeparture> {
        self.departures.map(|list| list.departure).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepartureList {
    #[serde(default)]
    pub departure: Vec<RawDeparture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDeparture {
    /// Destination station name
    pub station: Option<String>,
    /// Departure time as unix seconds
    pub time: Option<String>,
    /// Trip identifier, e.g. "BE.NMBS.IC1515"
    pub vehicle: Option<String>,
    #[serde(rename = "vehicleinfo")]
    pub vehicle_info: Option<VehicleInfo>,
    pub platform: Option<String>,
    /// Delay in seconds
    pub delay: Option<String>,
    /// "1" when the departure is canceled
    pub canceled: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleInfo {
    pub number: Option<String>,
    #[serde(rename = "type")]
    pub vehicle_type: Option<String>,
}

impl RawDeparture {
    /// Departure time as unix seconds, if present and well-formed.
    pub fn departure_unix(&self) -> Option<i64> {
        self.time.as_deref()?.parse().ok()
    }

    pub fn train_number(&self) -> Option<&str> {
        self.vehicle_info.as_ref()?.number.as_deref()
    }

    pub fn train_type(&self) -> Option<&str> {
        self.vehicle_info.as_ref()?.vehicle_type.as_deref()
    }

    /// Delay in seconds, clamped to zero; absent or malformed counts as 0.
    pub fn delay_seconds(&self) -> i32 {
        self.delay
            .as_deref()
            .and_then(|d| d.parse::<i32>().ok())
            .unwrap_or(0)
            .max(0)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.as_deref() == Some("1")
    }
}
