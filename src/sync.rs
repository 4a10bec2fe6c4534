//! Departure synchronization pipeline.
//!
//! One run clears the snapshot table, polls the liveboard across a rolling
//! lookahead window, normalizes and deduplicates the results, and inserts
//! them in the same transaction as the clear.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::providers::irail::{IrailClient, IrailError, LiveboardResponse, RawDeparture};

/// Station whose liveboard is mirrored into the database.
pub const STATION: &str = "Leuven";
/// Time zone used for window comparisons and stored timestamps.
pub const STATION_TZ: Tz = chrono_tz::Europe::Brussels;

/// One row of the departures snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DepartureRecord {
    pub departure_station: String,
    pub vehicle: String,
    pub train_number: String,
    pub train_type: String,
    pub destination: String,
    /// Station-local departure time
    pub departure_time: NaiveDateTime,
    pub platform: Option<String>,
    pub delay_seconds: i32,
    pub canceled: bool,
    /// Station-local timestamp of the sync run
    pub fetched_at: NaiveDateTime,
}

/// Outcome of a single liveboard poll.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub offset_minutes: i64,
    pub result: PollResult,
}

#[derive(Debug, Clone)]
pub enum PollResult {
    /// The call succeeded; `retained` counts entries that survived the
    /// window filter and deduplication.
    Fetched { received: usize, retained: usize },
    /// The call failed and this offset contributed no data.
    Skipped { reason: String },
}

/// Summary of a completed sync run.
#[derive(Debug)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub inserted_rows: u64,
    pub polls: Vec<PollOutcome>,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("database connection error: {0}")]
    Connectivity(String),
    #[error("database write error: {0}")]
    Write(String),
}

/// Runs the fetch/transform/load cycle for the monitored station.
pub struct DeparturesSync {
    pool: PgPool,
    client: IrailClient,
    config: SyncConfig,
}

impl DeparturesSync {
    pub fn new(pool: PgPool, config: SyncConfig) -> Result<Self, IrailError> {
        let client = IrailClient::new(config.connect_timeout, config.request_timeout)?;
        Ok(Self {
            pool,
            client,
            config,
        })
    }

    /// Execute one sync run and return its report.
    ///
    /// The database transaction is opened before any polling so that an
    /// unreachable database fails the run without spending requests on the
    /// remote API. A failed poll only shrinks coverage; clear, insert, or
    /// commit failures abort the run and roll back on drop.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let now_local = Utc::now().with_timezone(&STATION_TZ);
        info!(%run_id, station = STATION, "Starting departure sync");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Connectivity(e.to_string()))?;

        sqlx::query("DELETE FROM departures")
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::Write(e.to_string()))?;

        let batches = self.poll_window(now_local).await;
        let (records, polls) = collect_records(
            batches,
            now_local,
            self.config.window_minutes,
            now_local.naive_local(),
        );

        let inserted = insert_records(&mut tx, &records).await?;

        tx.commit()
            .await
            .map_err(|e| SyncError::Write(e.to_string()))?;

        let report = SyncReport {
            run_id,
            inserted_rows: inserted,
            polls,
        };

        for poll in &report.polls {
            match &poll.result {
                PollResult::Fetched { received, retained } => {
                    debug!(
                        offset_minutes = poll.offset_minutes,
                        received, retained, "Polled liveboard offset"
                    );
                }
                PollResult::Skipped { reason } => {
                    warn!(
                        offset_minutes = poll.offset_minutes,
                        reason = %reason,
                        "Liveboard offset skipped"
                    );
                }
            }
        }
        info!(
            run_id = %report.run_id,
            inserted_rows = report.inserted_rows,
            polls = report.polls.len(),
            "Completed departure sync"
        );

        Ok(report)
    }

    /// Query the liveboard at each window offset, pausing between calls to
    /// respect the remote service. Failures are returned alongside the
    /// offset that produced them.
    async fn poll_window(
        &self,
        now_local: DateTime<Tz>,
    ) -> Vec<(i64, Result<LiveboardResponse, IrailError>)> {
        let offsets = poll_offsets(self.config.window_minutes, self.config.step_minutes);
        let mut batches = Vec::with_capacity(offsets.len());

        for (i, offset) in offsets.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.request_pause).await;
            }
            let (date, time) = poll_params(now_local + Duration::minutes(offset));
            let result = self.client.get_liveboard(STATION, &date, &time).await;
            batches.push((offset, result));
        }

        batches
    }
}

/// Offsets, in minutes, at which the liveboard is queried to cover the
/// lookahead window: 0, step, 2*step, ... up to (but excluding) the window
/// length.
fn poll_offsets(window_minutes: i64, step_minutes: i64) -> Vec<i64> {
    (0..window_minutes)
        .step_by(step_minutes as usize)
        .collect()
}

/// Liveboard query parameters for a target instant: (DDMMYY, HHMM).
fn poll_params(target: DateTime<Tz>) -> (String, String) {
    (
        target.format("%d%m%y").to_string(),
        target.format("%H%M").to_string(),
    )
}

/// Merge all polled batches into deduplicated records plus a per-offset
/// outcome report. Duplicates across overlapping windows collapse on
/// (vehicle, train_number, departure_time), first-seen wins.
fn collect_records(
    batches: Vec<(i64, Result<LiveboardResponse, IrailError>)>,
    now_local: DateTime<Tz>,
    window_minutes: i64,
    fetched_at: NaiveDateTime,
) -> (Vec<DepartureRecord>, Vec<PollOutcome>) {
    let mut seen: HashSet<(String, String, NaiveDateTime)> = HashSet::new();
    let mut records = Vec::new();
    let mut polls = Vec::with_capacity(batches.len());

    for (offset_minutes, result) in batches {
        match result {
            Ok(response) => {
                let departures = response.into_departures();
                let received = departures.len();
                let mut retained = 0;

                for raw in &departures {
                    let Some(record) = normalize(raw, now_local, window_minutes, fetched_at) else {
                        continue;
                    };
                    let key = (
                        record.vehicle.clone(),
                        record.train_number.clone(),
                        record.departure_time,
                    );
                    if seen.insert(key) {
                        records.push(record);
                        retained += 1;
                    }
                }

                polls.push(PollOutcome {
                    offset_minutes,
                    result: PollResult::Fetched { received, retained },
                });
            }
            Err(e) => {
                polls.push(PollOutcome {
                    offset_minutes,
                    result: PollResult::Skipped {
                        reason: e.to_string(),
                    },
                });
            }
        }
    }

    (records, polls)
}

/// Turn a raw liveboard entry into a record, or drop it.
///
/// Entries without a resolvable departure time or vehicle are malformed
/// and skipped. Entries whose departure lies outside
/// `[now, now + window]` (inclusive) are out of scope for this run.
fn normalize(
    raw: &RawDeparture,
    now_local: DateTime<Tz>,
    window_minutes: i64,
    fetched_at: NaiveDateTime,
) -> Option<DepartureRecord> {
    let unix = raw.departure_unix()?;
    let departure_local = DateTime::from_timestamp(unix, 0)?.with_timezone(&STATION_TZ);

    if departure_local < now_local
        || departure_local > now_local + Duration::minutes(window_minutes)
    {
        return None;
    }

    let vehicle = raw.vehicle.clone()?;

    Some(DepartureRecord {
        departure_station: STATION.to_string(),
        vehicle,
        train_number: raw.train_number().unwrap_or_default().to_string(),
        train_type: raw.train_type().unwrap_or_default().to_string(),
        destination: raw.station.clone().unwrap_or_default(),
        departure_time: departure_local.naive_local(),
        platform: raw.platform.clone(),
        delay_seconds: raw.delay_seconds(),
        canceled: raw.is_canceled(),
        fetched_at,
    })
}

/// Insert all records as one multi-row statement within the run's
/// transaction. Returns the number of rows written.
async fn insert_records(
    tx: &mut Transaction<'_, Postgres>,
    records: &[DepartureRecord],
) -> Result<u64, SyncError> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO departures (departure_station, vehicle, train_number, train_type, \
         destination, departure_time, platform, delay_seconds, canceled, fetched_at) ",
    );
    builder.push_values(records, |mut row, record| {
        row.push_bind(&record.departure_station)
            .push_bind(&record.vehicle)
            .push_bind(&record.train_number)
            .push_bind(&record.train_type)
            .push_bind(&record.destination)
            .push_bind(record.departure_time)
            .push_bind(&record.platform)
            .push_bind(record.delay_seconds)
            .push_bind(record.canceled as i16)
            .push_bind(record.fetched_at);
    });

    let result = builder
        .build()
        .execute(&mut **tx)
        .await
        .map_err(|e| SyncError::Write(e.to_string()))?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::irail::{DepartureList, VehicleInfo};
    use chrono::TimeZone;

    fn test_now() -> DateTime<Tz> {
        STATION_TZ.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn make_raw(vehicle: &str, number: &str, time: DateTime<Tz>) -> RawDeparture {
        RawDeparture {
            station: Some("Brussels-South/Brussel-Zuid".to_string()),
            time: Some(time.timestamp().to_string()),
            vehicle: Some(vehicle.to_string()),
            vehicle_info: Some(VehicleInfo {
                number: Some(number.to_string()),
                vehicle_type: Some("IC".to_string()),
            }),
            platform: Some("3".to_string()),
            delay: Some("0".to_string()),
            canceled: Some("0".to_string()),
        }
    }

    fn make_response(departures: Vec<RawDeparture>) -> LiveboardResponse {
        LiveboardResponse {
            departures: Some(DepartureList {
                departure: departures,
            }),
        }
    }

    // --- poll_offsets / poll_params ---

    #[test]
    fn offsets_cover_two_hour_window_in_quarter_hours() {
        assert_eq!(
            poll_offsets(120, 15),
            vec![0, 15, 30, 45, 60, 75, 90, 105]
        );
    }

    #[test]
    fn params_use_ddmmyy_and_hhmm() {
        let target = STATION_TZ.with_ymd_and_hms(2026, 3, 2, 9, 5, 0).unwrap();
        assert_eq!(poll_params(target), ("020326".to_string(), "0905".to_string()));

        let target = STATION_TZ.with_ymd_and_hms(2026, 12, 31, 23, 45, 0).unwrap();
        assert_eq!(poll_params(target), ("311226".to_string(), "2345".to_string()));
    }

    // --- normalize / window filter ---

    #[test]
    fn window_filter_bounds() {
        let now = test_now();
        let fetched_at = now.naive_local();

        let past = make_raw("BE.NMBS.IC100", "100", now - Duration::minutes(1));
        assert!(normalize(&past, now, 120, fetched_at).is_none());

        let soon = make_raw("BE.NMBS.IC101", "101", now + Duration::minutes(1));
        assert!(normalize(&soon, now, 120, fetched_at).is_some());

        let late = make_raw("BE.NMBS.IC102", "102", now + Duration::minutes(119));
        assert!(normalize(&late, now, 120, fetched_at).is_some());

        let beyond = make_raw("BE.NMBS.IC103", "103", now + Duration::minutes(121));
        assert!(normalize(&beyond, now, 120, fetched_at).is_none());
    }

    #[test]
    fn window_filter_spans_dst_transition() {
        // Clocks go forward 02:00 -> 03:00 in Brussels on 2026-03-29; the
        // window is measured in elapsed time, not wall-clock differences.
        let now = STATION_TZ.with_ymd_and_hms(2026, 3, 29, 1, 30, 0).unwrap();
        let fetched_at = now.naive_local();

        let inside = make_raw("BE.NMBS.IC200", "200", now + Duration::minutes(119));
        assert!(normalize(&inside, now, 120, fetched_at).is_some());

        let outside = make_raw("BE.NMBS.IC201", "201", now + Duration::minutes(121));
        assert!(normalize(&outside, now, 120, fetched_at).is_none());
    }

    #[test]
    fn normalize_fills_record_fields() {
        let now = test_now();
        let departure_at = now + Duration::minutes(30);
        let mut raw = make_raw("BE.NMBS.IC1515", "1515", departure_at);
        raw.delay = Some("120".to_string());
        raw.canceled = Some("1".to_string());

        let record = normalize(&raw, now, 120, now.naive_local()).unwrap();
        assert_eq!(record.departure_station, STATION);
        assert_eq!(record.vehicle, "BE.NMBS.IC1515");
        assert_eq!(record.train_number, "1515");
        assert_eq!(record.train_type, "IC");
        assert_eq!(record.destination, "Brussels-South/Brussel-Zuid");
        assert_eq!(record.departure_time, departure_at.naive_local());
        assert_eq!(record.platform.as_deref(), Some("3"));
        assert_eq!(record.delay_seconds, 120);
        assert!(record.canceled);
        assert_eq!(record.fetched_at, now.naive_local());
    }

    #[test]
    fn normalize_drops_entries_without_time_or_vehicle() {
        let now = test_now();
        let fetched_at = now.naive_local();

        let mut no_time = make_raw("BE.NMBS.IC300", "300", now + Duration::minutes(10));
        no_time.time = None;
        assert!(normalize(&no_time, now, 120, fetched_at).is_none());

        let mut no_vehicle = make_raw("BE.NMBS.IC301", "301", now + Duration::minutes(10));
        no_vehicle.vehicle = None;
        assert!(normalize(&no_vehicle, now, 120, fetched_at).is_none());
    }

    // --- collect_records ---

    #[test]
    fn duplicates_across_offsets_collapse_to_one() {
        let now = test_now();
        let departure_at = now + Duration::minutes(20);

        let batches = vec![
            (
                0,
                Ok(make_response(vec![make_raw("BE.NMBS.IC400", "400", departure_at)])),
            ),
            (
                15,
                Ok(make_response(vec![make_raw("BE.NMBS.IC400", "400", departure_at)])),
            ),
        ];

        let (records, polls) = collect_records(batches, now, 120, now.naive_local());
        assert_eq!(records.len(), 1);
        assert!(polls.iter().all(|p| matches!(
            p.result,
            PollResult::Fetched { received: 1, .. }
        )));
    }

    #[test]
    fn first_seen_duplicate_wins() {
        let now = test_now();
        let departure_at = now + Duration::minutes(20);

        let first = make_raw("BE.NMBS.IC500", "500", departure_at);
        let mut second = make_raw("BE.NMBS.IC500", "500", departure_at);
        second.platform = Some("9".to_string());

        let batches = vec![
            (0, Ok(make_response(vec![first]))),
            (15, Ok(make_response(vec![second]))),
        ];

        let (records, _) = collect_records(batches, now, 120, now.naive_local());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].platform.as_deref(), Some("3"));
    }

    #[test]
    fn failed_poll_reduces_coverage_without_aborting() {
        let now = test_now();
        let mut batches = Vec::new();

        for offset in poll_offsets(120, 15) {
            if offset == 45 {
                batches.push((
                    offset,
                    Err(IrailError::Api("HTTP error: 502 Bad Gateway".to_string())),
                ));
            } else {
                let vehicle = format!("BE.NMBS.IC{}", 600 + offset);
                let number = format!("{}", 600 + offset);
                batches.push((
                    offset,
                    Ok(make_response(vec![make_raw(
                        &vehicle,
                        &number,
                        now + Duration::minutes(offset + 5),
                    )])),
                ));
            }
        }

        let (records, polls) = collect_records(batches, now, 120, now.naive_local());
        assert_eq!(records.len(), 7);
        assert_eq!(polls.len(), 8);

        let skipped: Vec<_> = polls
            .iter()
            .filter(|p| matches!(p.result, PollResult::Skipped { .. }))
            .collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].offset_minutes, 45);
    }

    #[test]
    fn overlapping_batches_with_duplicates_and_stragglers_yield_five_rows() {
        // Eight polls, three departures each; the distinct in-window
        // entries are A..E, X lies past the window.
        let now = test_now();
        let at = |m: i64| now + Duration::minutes(m);

        let a = || make_raw("BE.NMBS.IC700", "700", at(10));
        let b = || make_raw("BE.NMBS.IC701", "701", at(25));
        let c = || make_raw("BE.NMBS.IC702", "702", at(40));
        let d = || make_raw("BE.NMBS.IC703", "703", at(55));
        let e = || make_raw("BE.NMBS.IC704", "704", at(70));
        let x = || make_raw("BE.NMBS.IC705", "705", at(180));

        let calls = vec![
            vec![a(), b(), c()],
            vec![a(), b(), c()],
            vec![c(), d(), e()],
            vec![d(), e(), x()],
            vec![a(), c(), e()],
            vec![b(), d(), e()],
            vec![a(), b(), c()],
            vec![c(), d(), e()],
        ];

        let batches: Vec<_> = calls
            .into_iter()
            .zip(poll_offsets(120, 15))
            .map(|(departures, offset)| (offset, Ok(make_response(departures))))
            .collect();

        let (records, polls) = collect_records(batches, now, 120, now.naive_local());
        assert_eq!(records.len(), 5);
        assert_eq!(polls.len(), 8);
    }

    // --- errors ---

    #[test]
    fn sync_error_display() {
        let err = SyncError::Connectivity("pool timed out".to_string());
        assert_eq!(err.to_string(), "database connection error: pool timed out");

        let err = SyncError::Write("relation \"departures\" does not exist".to_string());
        assert_eq!(
            err.to_string(),
            "database write error: relation \"departures\" does not exist"
        );
    }
}
