use chrono::NaiveTime;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::{Error, Result};

const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub date: String,
    pub time: NaiveTime,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApCapture {
    pub time: NaiveTime,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryRow {
    pub date: String,
    pub gps_time: String,
    pub lat: f64,
    pub lon: f64,
    pub ap_count: usize,
}

#[derive(Deserialize)]
struct GpsRecord {
    #[serde(rename = "Date2")]
    date: String,
    #[serde(rename = "Lat")]
    lat: f64,
    #[serde(rename = "Lng")]
    lon: f64,
}

#[derive(Deserialize)]
struct CaptureRecord {
    #[serde(rename = "Time")]
    time: String,
    #[serde(rename = "Source")]
    source: String,
}

/// `HH:MM:SS+tz` -> time of day, ignoring the offset.
fn parse_clock(text: &str) -> Result<NaiveTime> {
    let clock = text.trim().split('+').next().unwrap_or_default();
    NaiveTime::parse_from_str(clock, TIME_FORMAT)
        .map_err(|e| Error::MissingData(format!("bad time {:?}: {}", text, e)))
}

/// Parses `Date2` values of the form `date time+tz`.
fn parse_stamp(stamp: &str) -> Result<(String, NaiveTime)> {
    let (date, time) = stamp
        .trim()
        .split_once(' ')
        .ok_or_else(|| Error::MissingData(format!("bad timestamp {:?}", stamp)))?;
    Ok((date.to_owned(), parse_clock(time)?))
}

pub fn load_gps_fixes<P: AsRef<Path>>(path: P) -> Result<Vec<GpsFix>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let mut fixes = Vec::new();
    for result in rdr.deserialize::<GpsRecord>() {
        let row = result?;
        match parse_stamp(&row.date) {
            Ok((date, time)) => fixes.push(GpsFix {
                date,
                time,
                lat: row.lat,
                lon: row.lon,
            }),
            Err(e) => warn!("Skipping GPS fix: {}", e),
        }
    }
    Ok(fixes)
}

pub fn load_ap_captures<P: AsRef<Path>>(path: P) -> Result<Vec<ApCapture>> {
    let mut rdr = ReaderBuilder::new().from_path(path)?;
    let mut captures = Vec::new();
    for result in rdr.deserialize::<CaptureRecord>() {
        let row = result?;
        match parse_clock(&row.time) {
            Ok(time) => captures.push(ApCapture {
                time,
                source: row.source,
            }),
            Err(e) => warn!("Skipping AP capture: {}", e),
        }
    }
    Ok(captures)
}

/// Walks the fixes in time order and tags every fix after the first with
/// the AP captures made since the previous fix, `(previous, current]`.
pub fn merge(fixes: &[GpsFix], captures: &[ApCapture]) -> Vec<TrajectoryRow> {
    let mut ordered: Vec<&GpsFix> = fixes.iter().collect();
    ordered.sort_by_key(|f| f.time);

    let mut capture_times: Vec<NaiveTime> = captures.iter().map(|c| c.time).collect();
    capture_times.sort();

    ordered
        .windows(2)
        .filter(|pair| pair[0].time < pair[1].time)
        .map(|pair| {
            let (start, end) = (pair[0].time, pair[1].time);
            let lo = capture_times.partition_point(|t| *t <= start);
            let hi = capture_times.partition_point(|t| *t <= end);
            TrajectoryRow {
                date: pair[1].date.clone(),
                gps_time: end.format(TIME_FORMAT).to_string(),
                lat: pair[1].lat,
                lon: pair[1].lon,
                ap_count: hi - lo,
            }
        })
        .collect()
}
