use std::{collections::BTreeSet, path::Path};

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::{
    error::StoreError,
    gtfs_model::{
        format_gtfs_date, parse_gtfs_date, ExceptionType, ServiceCalendarEntry, ServiceException,
        StopTimeRow,
    },
};

/// Tables read by the examiner, all columns stored as text like the GTFS files they come from.
pub const SCHEMA: &[&str] = &[
    "DROP TABLE IF EXISTS calendar",
    "CREATE TABLE calendar (
        service_id TEXT NOT NULL,
        monday TEXT, tuesday TEXT, wednesday TEXT, thursday TEXT,
        friday TEXT, saturday TEXT, sunday TEXT,
        start_date TEXT, end_date TEXT)",
    "DROP TABLE IF EXISTS calendar_dates",
    "CREATE TABLE calendar_dates (service_id TEXT NOT NULL, date TEXT, exception_type TEXT)",
    "DROP TABLE IF EXISTS routes",
    "CREATE TABLE routes (route_id TEXT PRIMARY KEY, route_short_name TEXT, route_long_name TEXT)",
    "DROP TABLE IF EXISTS trips",
    "CREATE TABLE trips (
        trip_id TEXT PRIMARY KEY, route_id TEXT, service_id TEXT,
        trip_headsign TEXT, direction_id TEXT)",
    "DROP TABLE IF EXISTS stops",
    "CREATE TABLE stops (stop_id TEXT PRIMARY KEY, stop_code TEXT, stop_lat TEXT, stop_lon TEXT)",
    "DROP TABLE IF EXISTS stop_times",
    "CREATE TABLE stop_times (
        trip_id TEXT, arrival_time TEXT, departure_time TEXT, stop_id TEXT,
        stop_sequence TEXT, pickup_type TEXT)",
    "CREATE INDEX stop_times_trip_id ON stop_times (trip_id)",
    "CREATE INDEX calendar_dates_date ON calendar_dates (date)",
];

const CALENDAR_QUERY: &str = "
    SELECT CAST(service_id AS TEXT),
           CAST(monday AS TEXT), CAST(tuesday AS TEXT), CAST(wednesday AS TEXT),
           CAST(thursday AS TEXT), CAST(friday AS TEXT), CAST(saturday AS TEXT),
           CAST(sunday AS TEXT),
           CAST(start_date AS TEXT), CAST(end_date AS TEXT)
    FROM calendar";

const EXCEPTIONS_QUERY: &str = "
    SELECT CAST(service_id AS TEXT), CAST(exception_type AS TEXT)
    FROM calendar_dates
    WHERE date = ?";

type CalendarRecord = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// Read access to an SQLite database holding a GTFS feed.
#[derive(Clone)]
pub struct GtfsDatabase {
    pool: SqlitePool,
}

impl GtfsDatabase {
    pub async fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().filename(path).read_only(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    pub async fn open_or_create(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn load_calendar(&self) -> Result<Vec<ServiceCalendarEntry>, StoreError> {
        let records: Vec<CalendarRecord> = sqlx::query_as(CALENDAR_QUERY)
            .fetch_all(&self.pool)
            .await?;
        records.into_iter().map(calendar_entry_from_record).collect()
    }

    /// Exceptions for one date, in table order.
    pub async fn load_exceptions_on(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ServiceException>, StoreError> {
        let records: Vec<(String, Option<String>)> = sqlx::query_as(EXCEPTIONS_QUERY)
            .bind(format_gtfs_date(date))
            .fetch_all(&self.pool)
            .await?;

        let mut exceptions = Vec::with_capacity(records.len());
        for (service_id, code) in records {
            match code.as_deref().and_then(ExceptionType::from_code) {
                Some(exception_type) => exceptions.push(ServiceException {
                    service_id,
                    date,
                    exception_type,
                }),
                None => log::warn!(
                    "Ignoring calendar_dates row for {} on {} with exception type {:?}",
                    service_id,
                    date,
                    code
                ),
            }
        }
        Ok(exceptions)
    }

    /// Arrivals of trips belonging to `service_ids`, without the first stop of each trip and
    /// without stops where pickup is not available.
    pub async fn load_stop_times(
        &self,
        service_ids: &BTreeSet<String>,
    ) -> Result<Vec<StopTimeRow>, StoreError> {
        if service_ids.is_empty() {
            return Ok(vec![]);
        }

        let placeholders = vec!["?"; service_ids.len()].join(", ");
        let sql = format!(
            "SELECT COALESCE(CAST(routes.route_short_name AS TEXT), '') AS route_short_name,
                    COALESCE(CAST(trips.route_id AS TEXT), '') AS route_id,
                    COALESCE(CAST(trips.direction_id AS TEXT), '') AS direction_id,
                    CAST(trips.trip_id AS TEXT) AS trip_id,
                    CAST(trips.trip_headsign AS TEXT) AS trip_headsign,
                    COALESCE(CAST(stop_times.arrival_time AS TEXT), '') AS arrival_time,
                    COALESCE(CAST(stops.stop_code AS TEXT), '') AS stop_code,
                    CAST(NULLIF(stops.stop_lat, '') AS REAL) AS stop_lat,
                    CAST(NULLIF(stops.stop_lon, '') AS REAL) AS stop_lon
             FROM trips
             JOIN stop_times ON stop_times.trip_id = trips.trip_id
             LEFT JOIN routes ON routes.route_id = trips.route_id
             LEFT JOIN stops ON stops.stop_id = stop_times.stop_id
             WHERE CAST(trips.service_id AS TEXT) IN ({placeholders})
               AND CAST(stop_times.stop_sequence AS INTEGER) != 1
               AND CAST(COALESCE(NULLIF(stop_times.pickup_type, ''), '0') AS INTEGER) = 0"
        );

        let mut query = sqlx::query_as::<_, StopTimeRow>(&sql);
        for service_id in service_ids {
            query = query.bind(service_id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

fn calendar_entry_from_record(record: CalendarRecord) -> Result<ServiceCalendarEntry, StoreError> {
    let (service_id, mon, tue, wed, thu, fri, sat, sun, start, end) = record;
    let flag = |value: &Option<String>| value.as_deref().map(str::trim) == Some("1");
    let date = |value: Option<String>, column: &str| {
        let text = value.unwrap_or_default();
        parse_gtfs_date(&text).map_err(|err| StoreError::MalformedRow {
            table: "calendar",
            service_id: service_id.clone(),
            reason: format!("{} {:?}: {}", column, text, err),
        })
    };

    Ok(ServiceCalendarEntry {
        monday: flag(&mon),
        tuesday: flag(&tue),
        wednesday: flag(&wed),
        thursday: flag(&thu),
        friday: flag(&fri),
        saturday: flag(&sat),
        sunday: flag(&sun),
        start_date: date(start, "start_date")?,
        end_date: date(end, "end_date")?,
        service_id,
    })
}
