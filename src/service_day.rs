use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeZone};

use crate::{
    error::StoreError,
    gtfs_db::GtfsDatabase,
    gtfs_model::{ExceptionType, ServiceCalendarEntry, ServiceException},
};

/// How calendar rows and exceptions decide whether a service runs on a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CalendarRules {
    /// The target instant must fall strictly inside `[start 00:00:00, end 23:59:59]`, and only
    /// removal exceptions are applied.
    #[default]
    Legacy,
    /// Date ranges are inclusive, added exceptions grant the service and removals revoke it.
    Gtfs,
}

pub async fn active_services<Tz: TimeZone>(
    db: &GtfsDatabase,
    target: &DateTime<Tz>,
    rules: CalendarRules,
) -> Result<BTreeSet<String>, StoreError> {
    let calendar = db.load_calendar().await?;
    let exceptions = db.load_exceptions_on(target.date_naive()).await?;
    let services = resolve_active_services(&calendar, &exceptions, target, rules);
    log::info!(
        "{} of {} services run on {} ({} exceptions)",
        services.len(),
        calendar.len(),
        target.date_naive(),
        exceptions.len()
    );
    Ok(services)
}

pub fn resolve_active_services<Tz: TimeZone>(
    calendar: &[ServiceCalendarEntry],
    exceptions: &[ServiceException],
    target: &DateTime<Tz>,
    rules: CalendarRules,
) -> BTreeSet<String> {
    match rules {
        CalendarRules::Legacy => resolve_legacy(calendar, exceptions, target),
        CalendarRules::Gtfs => resolve_gtfs(calendar, exceptions, target),
    }
}

fn resolve_legacy<Tz: TimeZone>(
    calendar: &[ServiceCalendarEntry],
    exceptions: &[ServiceException],
    target: &DateTime<Tz>,
) -> BTreeSet<String> {
    let local = target.naive_local();
    let weekday = local.weekday();

    let mut services: Vec<&str> = vec![];
    for entry in calendar {
        let start = NaiveDateTime::new(entry.start_date, NaiveTime::MIN);
        let end = NaiveDateTime::new(entry.end_date, last_second_of_day());
        if local > start && local < end && entry.runs_on(weekday) {
            services.push(&entry.service_id);
        }
    }

    for exception in exceptions {
        if exception.date != local.date() || exception.exception_type != ExceptionType::Removed {
            continue;
        }
        if let Some(index) = services.iter().position(|id| *id == exception.service_id) {
            services.remove(index);
        }
    }

    services.into_iter().map(str::to_string).collect()
}

fn resolve_gtfs<Tz: TimeZone>(
    calendar: &[ServiceCalendarEntry],
    exceptions: &[ServiceException],
    target: &DateTime<Tz>,
) -> BTreeSet<String> {
    let date = target.date_naive();
    let mut services: BTreeSet<String> = calendar
        .iter()
        .filter(|entry| entry.covers_date(date))
        .map(|entry| entry.service_id.clone())
        .collect();

    for exception in exceptions.iter().filter(|e| e.date == date) {
        match exception.exception_type {
            ExceptionType::Added => {
                services.insert(exception.service_id.clone());
            }
            ExceptionType::Removed => {
                services.remove(&exception.service_id);
            }
        }
    }
    services
}

fn last_second_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}
