use std::{
    fs::File,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, FixedOffset};
use futures::channel::mpsc;
use serde::Serialize;

use crate::{
    dispatch::JobResult, error::SinkError, gtfs_model::StopTimeRow, next_trips::Prediction,
};

/// Receives finished jobs. Called concurrently from many tasks.
pub trait ResultSink: Send + Sync + 'static {
    fn record(&self, result: JobResult) -> Result<(), SinkError>;
}

/// Writes every result to its own pretty-printed JSON file.
pub struct JsonFileSink {
    out_dir: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct JsonExport<'a> {
    routetime: &'a StopTimeRow,
    scheduled_arrival: DateTime<FixedOffset>,
    check_at: DateTime<FixedOffset>,
    requested_at: DateTime<FixedOffset>,
    discrepancy_minutes: Option<f64>,
    next_trips_for_stop: &'a Prediction,
}

impl JsonFileSink {
    pub fn new(out_dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(out_dir)?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn file_name(result: &JobResult) -> String {
        format!("{}.json", Self::file_stem(result))
    }

    fn file_stem(result: &JobResult) -> String {
        format!(
            "{}_{}_{}",
            result.requested_at.format("%Y-%m-%d-%H%M%S%3f"),
            path_safe(&result.job.row.route_short_name),
            path_safe(&result.job.row.stop_code)
        )
    }

    /// Creates a new file for `result`, adding `-1`, `-2`, ... to the name while it is taken.
    fn create_file(&self, result: &JobResult) -> Result<(File, PathBuf), SinkError> {
        let stem = Self::file_stem(result);
        let mut attempt = 0;
        loop {
            let name = match attempt {
                0 => format!("{}.json", stem),
                n => format!("{}-{}.json", stem, n),
            };
            let path = self.out_dir.join(name);
            match File::create_new(&path) {
                Ok(file) => return Ok((file, path)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl ResultSink for JsonFileSink {
    fn record(&self, result: JobResult) -> Result<(), SinkError> {
        let export = JsonExport {
            routetime: &result.job.row,
            scheduled_arrival: result.job.arrival,
            check_at: result.job.check_at,
            requested_at: result.requested_at,
            discrepancy_minutes: discrepancy_minutes(&result),
            next_trips_for_stop: &result.prediction,
        };
        let json = serde_json::to_string_pretty(&export)?;
        let (mut file, path) = self.create_file(&result)?;
        file.write_all(json.as_bytes())?;
        log::debug!("Wrote {:?}", path);
        Ok(())
    }
}

const TABLE_HEADER: &str =
    "route\theadsign\tstop\tscheduled\trequested_at\tpredicted\tdiscrepancy_min\tadjustment_age\trealtime";

/// Appends one tab separated row per result to a shared writer.
pub struct TableSink<W: Write + Send + 'static> {
    out: Mutex<W>,
}

impl TableSink<std::io::Stdout> {
    pub fn stdout() -> Result<Self, SinkError> {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + 'static> TableSink<W> {
    pub fn new(mut out: W) -> Result<Self, SinkError> {
        writeln!(out, "{}", TABLE_HEADER)?;
        out.flush()?;
        Ok(Self {
            out: Mutex::new(out),
        })
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send + 'static> ResultSink for TableSink<W> {
    fn record(&self, result: JobResult) -> Result<(), SinkError> {
        let closest = result.closest_trip();
        let predicted = closest
            .map(|(_, predicted)| predicted.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        let age = closest
            .map(|(trip, _)| trip.adjustment_age.clone())
            .unwrap_or_default();
        let realtime = closest
            .map(|(trip, _)| trip.is_realtime().to_string())
            .unwrap_or_default();
        let discrepancy = discrepancy_minutes(&result)
            .map(|minutes| format!("{:.0}", minutes))
            .unwrap_or_default();
        let row = &result.job.row;
        let line = format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.route_short_name,
            row.headsign(),
            row.stop_code,
            result.job.arrival.format("%H:%M:%S"),
            result.requested_at.format("%H:%M:%S"),
            predicted,
            discrepancy,
            age,
            realtime
        );

        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

/// Forwards results to a stream, in the order the jobs complete.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<JobResult>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobResult>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self { sender }, receiver)
    }
}

impl ResultSink for ChannelSink {
    fn record(&self, result: JobResult) -> Result<(), SinkError> {
        self.sender
            .unbounded_send(result)
            .map_err(|_| SinkError::Closed)
    }
}

fn discrepancy_minutes(result: &JobResult) -> Option<f64> {
    result
        .discrepancy()
        .map(|delta| delta.num_seconds() as f64 / 60.0)
}

fn path_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{next_trips::tests::prediction_with_trip, schedule::ScheduledJob};
    use chrono::TimeZone;
    use futures::StreamExt;

    fn result(route: &str, predicted_in: i64) -> JobResult {
        let tz = FixedOffset::west_opt(4 * 3600).unwrap();
        let requested_at = tz.with_ymd_and_hms(2024, 6, 10, 8, 5, 0).unwrap()
            + chrono::Duration::milliseconds(42);
        let mut row = crate::schedule::tests::row("08:10:00");
        row.route_short_name = route.to_string();
        JobResult {
            job: ScheduledJob {
                row,
                arrival: tz.with_ymd_and_hms(2024, 6, 10, 8, 10, 0).unwrap(),
                check_at: tz.with_ymd_and_hms(2024, 6, 10, 8, 5, 0).unwrap(),
            },
            prediction: prediction_with_trip(route, "Barrhaven Centre", predicted_in),
            requested_at,
        }
    }

    #[test]
    fn json_files_are_named_after_request_time_route_and_stop() {
        assert_eq!(
            JsonFileSink::file_name(&result("95", 7)),
            "2024-06-10-080500042_95_3000.json"
        );
        assert_eq!(
            JsonFileSink::file_name(&result("R/1", 7)),
            "2024-06-10-080500042_R-1_3000.json"
        );
    }

    #[test]
    fn json_sink_writes_one_file_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(&dir.path().join("out")).unwrap();
        sink.record(result("95", 7)).unwrap();
        sink.record(result("44", 3)).unwrap();

        let written = std::fs::read_dir(dir.path().join("out")).unwrap().count();
        assert_eq!(written, 2);

        let path = dir.path().join("out").join("2024-06-10-080500042_95_3000.json");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["Routetime"]["stop_code"], "3000");
        assert_eq!(json["DiscrepancyMinutes"], 2.0);
        assert_eq!(json["NextTripsForStop"]["Route"][0]["RouteNo"], "95");
    }

    #[test]
    fn results_sharing_a_file_name_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path()).unwrap();
        sink.record(result("95", 7)).unwrap();
        sink.record(result("95", 8)).unwrap();
        sink.record(result("95", 9)).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "2024-06-10-080500042_95_3000-1.json",
                "2024-06-10-080500042_95_3000-2.json",
                "2024-06-10-080500042_95_3000.json",
            ]
        );
        let first: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("2024-06-10-080500042_95_3000.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(first["DiscrepancyMinutes"], 2.0);
    }

    #[test]
    fn table_sink_writes_header_and_rows() {
        let sink = TableSink::new(Vec::new()).unwrap();
        sink.record(result("95", 3)).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], TABLE_HEADER);
        assert_eq!(
            lines[1],
            "95\tBarrhaven Centre\t3000\t08:10:00\t08:05:00\t08:08:00\t-2\t0.5\ttrue"
        );
    }

    #[test]
    fn table_sink_leaves_prediction_columns_empty_without_a_match() {
        let sink = TableSink::new(Vec::new()).unwrap();
        let mut unmatched = result("95", 3);
        unmatched.prediction = Prediction::default();
        sink.record(unmatched).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with("\t08:05:00\t\t\t\t"));
    }

    #[tokio::test]
    async fn channel_sink_streams_results() {
        let (sink, receiver) = ChannelSink::new();
        sink.record(result("95", 1)).unwrap();
        sink.record(result("44", 2)).unwrap();
        drop(sink);
        let routes: Vec<String> = receiver
            .map(|result| result.job.row.route_short_name)
            .collect()
            .await;
        assert_eq!(routes, vec!["95", "44"]);
    }

    #[test]
    fn channel_sink_reports_a_closed_receiver() {
        let (sink, receiver) = ChannelSink::new();
        drop(receiver);
        assert!(matches!(sink.record(result("95", 1)), Err(SinkError::Closed)));
    }
}
