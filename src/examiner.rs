use std::sync::Arc;

use chrono::{DateTime, TimeZone};

use crate::{
    config::{ExaminerConfig, OutputFormat, RunPlan},
    dispatch::{DispatchSummary, Dispatcher, WallClock},
    error::StoreError,
    gtfs_db::GtfsDatabase,
    next_trips::{NextTripsFetcher, OcTranspoClient},
    sampling::Sampler,
    schedule::{self, ScheduledJob},
    service_day,
    sink::{JsonFileSink, ResultSink, TableSink},
};

/// Examines every remaining arrival of the day containing `now` and waits for all calls. Which
/// arrivals remain is decided from the system clock once planning is done.
pub async fn examine_day<F, S, Tz>(
    db: &GtfsDatabase,
    fetcher: Arc<F>,
    sink: Arc<S>,
    plan: &RunPlan,
    now: DateTime<Tz>,
) -> Result<DispatchSummary, StoreError>
where
    F: NextTripsFetcher,
    S: ResultSink,
    Tz: TimeZone,
{
    let jobs = plan_day(db, plan, &now).await?;
    let dispatcher = Dispatcher::new(fetcher, sink, plan.dispatch, WallClock::system());
    Ok(dispatcher.run(jobs).await)
}

/// The jobs for every stop time of the services running on the day of `now`, in sampled order.
pub async fn plan_day<Tz: TimeZone>(
    db: &GtfsDatabase,
    plan: &RunPlan,
    now: &DateTime<Tz>,
) -> Result<Vec<ScheduledJob>, StoreError> {
    let services = service_day::active_services(db, now, plan.calendar_rules).await?;
    let rows = db.load_stop_times(&services).await?;
    log::info!("{} stop times for today's services", rows.len());

    let rows = Sampler::new(plan.seed).sample(rows, plan.sample_size);
    Ok(schedule::normalize_all(
        rows,
        now.date_naive(),
        &now.timezone(),
        &plan.normalize,
    ))
}

/// Runs `examine_day` for today in the local time zone against the live API.
pub async fn examine(config: &ExaminerConfig) -> anyhow::Result<DispatchSummary> {
    let db = GtfsDatabase::open_read_only(&config.db_path).await?;
    let client = Arc::new(OcTranspoClient::new(
        &config.api_url,
        &config.app_id,
        &config.api_key,
    )?);
    let now = chrono::Local::now();
    log::info!("Examining arrivals for {}", now.date_naive());

    let summary = match config.output {
        OutputFormat::Json => {
            let sink = Arc::new(JsonFileSink::new(&config.out_dir)?);
            examine_day(&db, client, sink, &config.plan, now).await?
        }
        OutputFormat::Table => {
            let sink = Arc::new(TableSink::stdout()?);
            examine_day(&db, client, sink, &config.plan, now).await?
        }
    };
    Ok(summary)
}
