use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

pub const GTFS_DATE_FORMAT: &str = "%Y%m%d";

/// One row of `calendar.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCalendarEntry {
    pub service_id: String,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ServiceCalendarEntry {
    pub fn runs_on(&self, weekday: Weekday) -> bool {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date && self.runs_on(date.weekday())
    }
}

/// One row of `calendar_dates.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceException {
    pub service_id: String,
    pub date: NaiveDate,
    pub exception_type: ExceptionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    Added,
    Removed,
}

impl ExceptionType {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(ExceptionType::Added),
            "2" => Some(ExceptionType::Removed),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ExceptionType::Added => "1",
            ExceptionType::Removed => "2",
        }
    }
}

/// A scheduled arrival of one trip at one stop, as returned by the stop-time catalog.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StopTimeRow {
    pub route_short_name: String,
    pub route_id: String,
    pub direction_id: String,
    pub trip_id: String,
    pub trip_headsign: Option<String>,
    pub arrival_time: String,
    pub stop_code: String,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
}

impl StopTimeRow {
    pub fn headsign(&self) -> &str {
        self.trip_headsign.as_deref().unwrap_or("")
    }
}

pub fn parse_gtfs_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value.trim(), GTFS_DATE_FORMAT)
}

pub fn format_gtfs_date(date: NaiveDate) -> String {
    date.format(GTFS_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekday_service() -> ServiceCalendarEntry {
        ServiceCalendarEntry {
            service_id: "WD".to_string(),
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: false,
            sunday: false,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        }
    }

    #[test]
    fn covers_date_is_inclusive_at_both_ends() {
        let service = weekday_service();
        assert!(service.covers_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert!(service.covers_date(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
        assert!(!service.covers_date(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        // 2024-06-08 is a Saturday.
        assert!(!service.covers_date(NaiveDate::from_ymd_opt(2024, 6, 8).unwrap()));
    }

    #[test]
    fn exception_codes() {
        assert_eq!(ExceptionType::from_code("1"), Some(ExceptionType::Added));
        assert_eq!(ExceptionType::from_code(" 2"), Some(ExceptionType::Removed));
        assert_eq!(ExceptionType::from_code("3"), None);
        assert_eq!(ExceptionType::Removed.code(), "2");
    }

    #[test]
    fn gtfs_dates() {
        let date = parse_gtfs_date("20240610").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_eq!(format_gtfs_date(date), "20240610");
        assert!(parse_gtfs_date("2024-06-10").is_err());
    }
}
