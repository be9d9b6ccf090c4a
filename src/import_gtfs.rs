use std::path::Path;

use anyhow::Result;
use gtfs_structures::{DirectionType, Exception, PickupDropOffType};
use indicatif::ProgressIterator;
use sqlx::{Sqlite, Transaction};

use crate::{
    gtfs_db::GtfsDatabase,
    gtfs_model::{format_gtfs_date, ExceptionType},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportCounts {
    pub calendars: usize,
    pub calendar_dates: usize,
    pub routes: usize,
    pub trips: usize,
    pub stops: usize,
    pub stop_times: usize,
}

/// Loads the GTFS feed in `gtfs_path` (folder or zip) into the database at `db_path`, replacing
/// any tables from an earlier import.
pub async fn import_gtfs(gtfs_path: &Path, db_path: &Path) -> Result<ImportCounts> {
    log::info!("Loading original GTFS data from {:?}", gtfs_path);
    let gtfs = gtfs_structures::RawGtfs::from_path(gtfs_path)?;

    let db = GtfsDatabase::open_or_create(db_path).await?;
    db.create_schema().await?;

    let style = indicatif::ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}",
    )?;
    let mut counts = ImportCounts::default();
    let mut tx = db.pool().begin().await?;

    log::info!("Preparing calendars.");
    if let Some(calendars) = gtfs.calendar {
        for calendar in calendars? {
            let flag = |value: bool| if value { "1" } else { "0" };
            sqlx::query("INSERT INTO calendar VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)")
                .bind(&calendar.id)
                .bind(flag(calendar.monday))
                .bind(flag(calendar.tuesday))
                .bind(flag(calendar.wednesday))
                .bind(flag(calendar.thursday))
                .bind(flag(calendar.friday))
                .bind(flag(calendar.saturday))
                .bind(flag(calendar.sunday))
                .bind(format_gtfs_date(calendar.start_date))
                .bind(format_gtfs_date(calendar.end_date))
                .execute(&mut *tx)
                .await?;
            counts.calendars += 1;
        }
    }

    log::info!("Preparing calendar dates.");
    if let Some(calendar_dates) = gtfs.calendar_dates {
        for calendar_date in calendar_dates? {
            let exception_type = match calendar_date.exception_type {
                Exception::Added => ExceptionType::Added,
                Exception::Deleted => ExceptionType::Removed,
            };
            sqlx::query("INSERT INTO calendar_dates VALUES (?, ?, ?)")
                .bind(&calendar_date.service_id)
                .bind(format_gtfs_date(calendar_date.date))
                .bind(exception_type.code())
                .execute(&mut *tx)
                .await?;
            counts.calendar_dates += 1;
        }
    }

    log::info!("Preparing routes.");
    for route in gtfs.routes? {
        sqlx::query("INSERT INTO routes VALUES (?, ?, ?)")
            .bind(&route.id)
            .bind(&route.short_name)
            .bind(&route.long_name)
            .execute(&mut *tx)
            .await?;
        counts.routes += 1;
    }

    log::info!("Preparing trips.");
    for trip in gtfs.trips? {
        let direction_id = trip.direction_id.map(|direction| match direction {
            DirectionType::Outbound => "0",
            DirectionType::Inbound => "1",
        });
        sqlx::query("INSERT INTO trips VALUES (?, ?, ?, ?, ?)")
            .bind(&trip.id)
            .bind(&trip.route_id)
            .bind(&trip.service_id)
            .bind(&trip.trip_headsign)
            .bind(direction_id)
            .execute(&mut *tx)
            .await?;
        counts.trips += 1;
    }

    log::info!("Preparing stops.");
    for stop in gtfs.stops? {
        sqlx::query("INSERT INTO stops VALUES (?, ?, ?, ?)")
            .bind(&stop.id)
            .bind(&stop.code)
            .bind(stop.latitude.map(|lat| lat.to_string()))
            .bind(stop.longitude.map(|lon| lon.to_string()))
            .execute(&mut *tx)
            .await?;
        counts.stops += 1;
    }

    let stop_times = gtfs.stop_times?;
    for stop_time in stop_times
        .iter()
        .progress_with_style(style.clone())
        .with_message("Insert stop times.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        insert_stop_time(
            &mut tx,
            &stop_time.trip_id,
            stop_time.arrival_time,
            stop_time.departure_time,
            &stop_time.stop_id,
            u32::from(stop_time.stop_sequence),
            pickup_code(stop_time.pickup_type),
        )
        .await?;
        counts.stop_times += 1;
    }

    tx.commit().await?;
    log::info!("Imported {:?} into {:?}", counts, db_path);
    Ok(counts)
}

async fn insert_stop_time(
    tx: &mut Transaction<'_, Sqlite>,
    trip_id: &str,
    arrival_time: Option<u32>,
    departure_time: Option<u32>,
    stop_id: &str,
    stop_sequence: u32,
    pickup_type: i16,
) -> Result<()> {
    sqlx::query("INSERT INTO stop_times VALUES (?, ?, ?, ?, ?, ?)")
        .bind(trip_id)
        .bind(arrival_time.map(format_service_time))
        .bind(departure_time.map(format_service_time))
        .bind(stop_id)
        .bind(stop_sequence.to_string())
        .bind(pickup_type.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn pickup_code(pickup_type: PickupDropOffType) -> i16 {
    match pickup_type {
        PickupDropOffType::Regular => 0,
        PickupDropOffType::NotAvailable => 1,
        PickupDropOffType::ArrangeByPhone => 2,
        PickupDropOffType::CoordinateWithDriver => 3,
        PickupDropOffType::Unknown(code) => code,
    }
}

/// Seconds since the start of the service day as `HH:MM:SS`, keeping hours past 23.
pub fn format_service_time(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    )
}
