use chrono::{
    DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
};
use serde::Serialize;

use crate::{error::TimeParseError, gtfs_model::StopTimeRow};

#[derive(Debug, Clone, Copy)]
pub struct NormalizeSettings {
    /// How long before the scheduled arrival the prediction is requested.
    pub lead: Duration,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            lead: Duration::minutes(5),
        }
    }
}

/// A stop-time row placed on the wall clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledJob {
    pub row: StopTimeRow,
    pub arrival: DateTime<FixedOffset>,
    pub check_at: DateTime<FixedOffset>,
}

/// Places `row` on `service_date` in `tz`. Hours of 24 and above belong to the next civil day.
/// A local time repeated by a DST change resolves to its earlier instant; one skipped by a DST
/// change is an error.
pub fn normalize<Tz: TimeZone>(
    row: StopTimeRow,
    service_date: NaiveDate,
    tz: &Tz,
    settings: &NormalizeSettings,
) -> Result<ScheduledJob, TimeParseError> {
    let (date, time) = parse_service_time(&row.arrival_time, service_date)?;
    let arrival = match tz.from_local_datetime(&NaiveDateTime::new(date, time)) {
        LocalResult::Single(arrival) => arrival,
        // Repeated hour when clocks fall back.
        LocalResult::Ambiguous(first, second) => first.min(second),
        LocalResult::None => {
            return Err(TimeParseError::NonexistentLocalTime {
                date,
                time: time.to_string(),
            })
        }
    }
    .fixed_offset();
    let check_at = arrival - settings.lead;
    Ok(ScheduledJob {
        row,
        arrival,
        check_at,
    })
}

/// Normalizes every row, logging and dropping rows whose arrival time can't be placed.
pub fn normalize_all<Tz: TimeZone>(
    rows: Vec<StopTimeRow>,
    service_date: NaiveDate,
    tz: &Tz,
    settings: &NormalizeSettings,
) -> Vec<ScheduledJob> {
    let mut jobs = Vec::with_capacity(rows.len());
    for row in rows {
        let context = format!(
            "route {} trip {} stop {}",
            row.route_short_name, row.trip_id, row.stop_code
        );
        match normalize(row, service_date, tz, settings) {
            Ok(job) => {
                log::debug!(
                    "{}, {}, {}, {}, check at {}",
                    job.row.route_short_name,
                    job.row.headsign(),
                    job.row.stop_code,
                    job.arrival,
                    job.check_at
                );
                jobs.push(job);
            }
            Err(err) => log::warn!("Skipping {}: {}", context, err),
        }
    }
    jobs
}

fn parse_service_time(
    raw: &str,
    service_date: NaiveDate,
) -> Result<(NaiveDate, NaiveTime), TimeParseError> {
    let raw = raw.trim();
    let (hour, rest) = raw
        .split_once(':')
        .ok_or_else(|| TimeParseError::Hour(raw.to_string()))?;
    let mut hour: u32 = hour
        .parse()
        .map_err(|_| TimeParseError::Hour(raw.to_string()))?;

    let mut date = service_date;
    if hour > 23 {
        hour -= 24;
        date = date
            .succ_opt()
            .ok_or_else(|| TimeParseError::Time(raw.to_string()))?;
    }

    let time = NaiveTime::parse_from_str(&format!("{:02}:{}", hour, rest), "%H:%M:%S")
        .map_err(|_| TimeParseError::Time(raw.to_string()))?;
    Ok((date, time))
}
