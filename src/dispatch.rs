use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tokio::{task::JoinSet, time::Instant};

use crate::{
    error::RemoteCallError,
    next_trips::{NextTripsFetcher, Prediction, Trip},
    schedule::ScheduledJob,
    sink::ResultSink,
};

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Upper bound for a single remote call, counted from the moment it is issued.
    pub call_timeout: Duration,
    /// Jobs admitted into the queue. Jobs after this many admissions are not looked at.
    pub max_jobs: usize,
    /// Remote calls allowed to run at the same time.
    pub max_in_flight: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            max_jobs: 10_000,
            max_in_flight: 64,
        }
    }
}

/// What a finished job hands to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job: ScheduledJob,
    pub prediction: Prediction,
    pub requested_at: DateTime<FixedOffset>,
}

impl JobResult {
    /// The predicted trip on the job's route and headsign arriving closest to the scheduled
    /// arrival, with its predicted arrival time.
    pub fn closest_trip(&self) -> Option<(&Trip, DateTime<FixedOffset>)> {
        self.prediction
            .directions_for(&self.job.row.route_short_name, self.job.row.headsign())
            .flat_map(|direction| direction.trips.iter())
            .filter_map(|trip| {
                let minutes = trip.adjusted_schedule_minutes()?;
                Some((trip, self.requested_at + chrono::Duration::minutes(minutes)))
            })
            .min_by_key(|(_, predicted)| (*predicted - self.job.arrival).num_seconds().abs())
    }

    /// Predicted minus scheduled arrival. Positive when the vehicle runs late.
    pub fn discrepancy(&self) -> Option<chrono::Duration> {
        self.closest_trip()
            .map(|(_, predicted)| predicted - self.job.arrival)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub examined: usize,
    pub scheduled: usize,
    pub skipped_past_due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub sink_failures: usize,
}

impl DispatchSummary {
    fn absorb(&mut self, outcome: Result<JobOutcome, tokio::task::JoinError>) {
        match outcome {
            Ok(JobOutcome::Recorded) => self.succeeded += 1,
            Ok(JobOutcome::CallFailed) => self.failed += 1,
            Ok(JobOutcome::SinkFailed) => self.sink_failures += 1,
            Err(err) => {
                log::error!("Job task ended abnormally: {}", err);
                self.failed += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Recorded,
    CallFailed,
    SinkFailed,
}

struct TriggerEvent {
    time: DateTime<Utc>,
    sequence: usize,
    job: ScheduledJob,
}

impl PartialEq for TriggerEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TriggerEvent {}

impl PartialOrd for TriggerEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TriggerEvent {
    // Reversed so the heap pops the earliest trigger first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.time, other.sequence).cmp(&(self.time, self.sequence))
    }
}

/// Wall-clock time read through the runtime's monotonic clock, so triggers and request times
/// follow the same timeline as `sleep_until`.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl WallClock {
    pub fn system() -> Self {
        Self::starting_at(Utc::now())
    }

    /// A clock reading `origin` right now.
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }

    fn instant_at(&self, time: DateTime<Utc>) -> Instant {
        self.started + (time - self.origin).to_std().unwrap_or_default()
    }
}

pub struct Dispatcher<F, S> {
    fetcher: Arc<F>,
    sink: Arc<S>,
    settings: DispatchSettings,
    clock: WallClock,
}

impl<F: NextTripsFetcher, S: ResultSink> Dispatcher<F, S> {
    pub fn new(
        fetcher: Arc<F>,
        sink: Arc<S>,
        settings: DispatchSettings,
        clock: WallClock,
    ) -> Self {
        Self {
            fetcher,
            sink,
            settings,
            clock,
        }
    }

    /// Runs every job whose check time is still ahead when the queue is filled and returns once
    /// all of them finished.
    pub async fn run(&self, jobs: Vec<ScheduledJob>) -> DispatchSummary {
        let clock = self.clock;
        let now = clock.now();
        let mut summary = DispatchSummary::default();
        let mut queue = BinaryHeap::new();

        for job in jobs {
            if summary.scheduled >= self.settings.max_jobs {
                break;
            }
            summary.examined += 1;
            let time = job.check_at.with_timezone(&Utc);
            if time <= now {
                summary.skipped_past_due += 1;
                continue;
            }
            queue.push(TriggerEvent {
                time,
                sequence: summary.scheduled,
                job,
            });
            summary.scheduled += 1;
        }

        log::info!("{} future API calls added to queue...", summary.scheduled);

        let max_in_flight = self.settings.max_in_flight.max(1);
        let mut in_flight = JoinSet::new();
        while let Some(event) = queue.pop() {
            tokio::time::sleep_until(clock.instant_at(event.time)).await;

            while let Some(outcome) = in_flight.try_join_next() {
                summary.absorb(outcome);
            }
            while in_flight.len() >= max_in_flight {
                if let Some(outcome) = in_flight.join_next().await {
                    summary.absorb(outcome);
                }
            }

            in_flight.spawn(execute_job(
                self.fetcher.clone(),
                self.sink.clone(),
                event.job,
                self.settings.call_timeout,
                clock,
            ));
        }

        while let Some(outcome) = in_flight.join_next().await {
            summary.absorb(outcome);
        }

        log::info!(
            "Examined {} stop times: {} scheduled, {} already due, {} recorded, {} failed, {} not written",
            summary.examined,
            summary.scheduled,
            summary.skipped_past_due,
            summary.succeeded,
            summary.failed,
            summary.sink_failures
        );
        summary
    }
}

async fn execute_job<F: NextTripsFetcher, S: ResultSink>(
    fetcher: Arc<F>,
    sink: Arc<S>,
    job: ScheduledJob,
    call_timeout: Duration,
    clock: WallClock,
) -> JobOutcome {
    let requested_at = clock.now().with_timezone(job.arrival.offset());
    let call = fetcher.fetch_next_trips(&job.row.route_short_name, &job.row.stop_code, call_timeout);
    let response = match tokio::time::timeout(call_timeout, call).await {
        Ok(response) => response,
        Err(_) => Err(RemoteCallError::DeadlineExceeded(call_timeout)),
    };

    let prediction = match response {
        Ok(prediction) => prediction,
        Err(err) => {
            log::error!("Error: {}", err);
            log::error!("Error: StopTime - {:?}", job.row);
            return JobOutcome::CallFailed;
        }
    };

    let result = JobResult {
        job,
        prediction,
        requested_at,
    };
    // Sinks write files and stdout.
    match tokio::task::spawn_blocking(move || sink.record(result)).await {
        Ok(Ok(())) => JobOutcome::Recorded,
        Ok(Err(err)) => {
            log::error!("Error: {}", err);
            JobOutcome::SinkFailed
        }
        Err(err) => {
            log::error!("Error: sink task ended abnormally: {}", err);
            JobOutcome::SinkFailed
        }
    }
}
