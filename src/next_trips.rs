//! Real-time "next trips for stop" predictions and the client that fetches them.
//!
//! The JSON returned by the API is irregular: lists with a single element are sent as a bare
//! object, empty lists sometimes as an empty string, and numbers as strings. The model below
//! accepts all of these shapes.

use std::{future::Future, time::Duration};

use serde::{de::IgnoredAny, Deserialize, Deserializer, Serialize};

use crate::error::RemoteCallError;

pub const DEFAULT_API_URL: &str = "https://api.octranspo1.com/v2.0";

/// Anything able to answer "which trips of `route` arrive next at `stop_code`".
pub trait NextTripsFetcher: Send + Sync + 'static {
    fn fetch_next_trips(
        &self,
        route: &str,
        stop_code: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Prediction, RemoteCallError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NextTripsResponse {
    #[serde(rename = "GetNextTripsForStopResult")]
    pub result: Prediction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Prediction {
    #[serde(default, deserialize_with = "lenient_string")]
    pub stop_no: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub stop_label: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error: String,
    #[serde(default, rename = "Route", deserialize_with = "route_directions")]
    pub directions: Vec<RouteDirection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteDirection {
    #[serde(default, deserialize_with = "lenient_string")]
    pub route_no: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub route_label: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub direction: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub request_processing_time: String,
    #[serde(default, deserialize_with = "trip_list")]
    pub trips: Vec<Trip>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Trip {
    #[serde(default, deserialize_with = "lenient_string")]
    pub trip_destination: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub trip_start_time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub adjusted_schedule_time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub adjustment_age: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_trip_of_schedule: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bus_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub latitude: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub longitude: String,
    #[serde(rename = "GPSSpeed", default, deserialize_with = "lenient_string")]
    pub gps_speed: String,
}

impl Prediction {
    /// Directions of `route` whose label matches `headsign`. An empty headsign matches every
    /// direction of the route.
    pub fn directions_for<'a>(
        &'a self,
        route: &'a str,
        headsign: &'a str,
    ) -> impl Iterator<Item = &'a RouteDirection> + 'a {
        self.directions.iter().filter(move |direction| {
            direction.route_no.trim() == route.trim()
                && (headsign.is_empty()
                    || direction
                        .route_label
                        .trim()
                        .eq_ignore_ascii_case(headsign.trim()))
        })
    }
}

impl Trip {
    /// Minutes from the request until the vehicle is expected.
    pub fn adjusted_schedule_minutes(&self) -> Option<i64> {
        self.adjusted_schedule_time.trim().parse().ok()
    }

    /// Minutes since the vehicle last reported its position. Negative when the time comes from
    /// the schedule only.
    pub fn adjustment_age_minutes(&self) -> Option<f64> {
        self.adjustment_age.trim().parse().ok()
    }

    pub fn is_realtime(&self) -> bool {
        self.adjustment_age_minutes().is_some_and(|age| age >= 0.0)
    }
}

pub struct OcTranspoClient {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    api_key: String,
}

impl OcTranspoClient {
    pub fn new(base_url: &str, app_id: &str, api_key: &str) -> Result<Self, RemoteCallError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("arrival-examiner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn get_next_trips_for_stop(
        &self,
        route: &str,
        stop_code: &str,
        timeout: Duration,
    ) -> Result<Prediction, RemoteCallError> {
        let response = self
            .client
            .get(format!("{}/GetNextTripsForStop", self.base_url))
            .query(&[
                ("appID", self.app_id.as_str()),
                ("apiKey", self.api_key.as_str()),
                ("routeNo", route),
                ("stopNo", stop_code),
                ("format", "json"),
            ])
            .timeout(timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteCallError::Status(response.status()));
        }

        let body = response.bytes().await?;
        parse_next_trips(&body)
    }
}

impl NextTripsFetcher for OcTranspoClient {
    fn fetch_next_trips(
        &self,
        route: &str,
        stop_code: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Prediction, RemoteCallError>> + Send {
        self.get_next_trips_for_stop(route, stop_code, timeout)
    }
}

pub fn parse_next_trips(body: &[u8]) -> Result<Prediction, RemoteCallError> {
    let response: NextTripsResponse = serde_json::from_slice(body)?;
    let prediction = response.result;
    if !prediction.error.trim().is_empty() {
        return Err(RemoteCallError::Api(prediction.error));
    }
    Ok(prediction)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
    Neither(IgnoredAny),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
            OneOrMany::Neither(_) => vec![],
        }
    }
}

#[derive(Deserialize)]
struct RouteWrapper {
    #[serde(rename = "RouteDirection")]
    route_direction: Option<OneOrMany<RouteDirection>>,
}

#[derive(Deserialize)]
struct TripWrapper {
    #[serde(rename = "Trip")]
    trip: Option<OneOrMany<Trip>>,
}

fn route_directions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<RouteDirection>, D::Error> {
    let wrapper: OneOrMany<RouteWrapper> = OneOrMany::deserialize(deserializer)?;
    Ok(wrapper
        .into_vec()
        .into_iter()
        .flat_map(|route| route.route_direction.map(OneOrMany::into_vec).unwrap_or_default())
        .collect())
}

fn trip_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Trip>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Trips {
        Wrapped(TripWrapper),
        Bare(OneOrMany<Trip>),
    }

    Ok(match Trips::deserialize(deserializer)? {
        Trips::Wrapped(wrapper) => wrapper.trip.map(OneOrMany::into_vec).unwrap_or_default(),
        Trips::Bare(trips) => trips.into_vec(),
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const TWO_DIRECTIONS: &str = r#"{
        "GetNextTripsForStopResult": {
            "StopNo": "3017",
            "StopLabel": "HURDMAN",
            "Error": "",
            "Route": {
                "RouteDirection": [
                    {
                        "RouteNo": "95",
                        "RouteLabel": "Barrhaven Centre",
                        "Direction": "Westbound",
                        "Error": "",
                        "RequestProcessingTime": "20240610081000",
                        "Trips": {
                            "Trip": [
                                {"TripDestination": "Barrhaven Centre", "TripStartTime": "07:40",
                                 "AdjustedScheduleTime": "4", "AdjustmentAge": "0.52",
                                 "LastTripOfSchedule": false, "BusType": "6EB - 60",
                                 "Latitude": "45.41", "Longitude": "-75.66", "GPSSpeed": "41.0"},
                                {"TripDestination": "Barrhaven Centre", "TripStartTime": "07:55",
                                 "AdjustedScheduleTime": "19", "AdjustmentAge": "-1",
                                 "LastTripOfSchedule": false}
                            ]
                        }
                    },
                    {
                        "RouteNo": 95,
                        "RouteLabel": "Orleans",
                        "Direction": "Eastbound",
                        "Error": "",
                        "Trips": {"Trip": {"TripDestination": "Orleans", "AdjustedScheduleTime": "7",
                                           "AdjustmentAge": "1.1"}}
                    }
                ]
            }
        }
    }"#;

    const SINGLE_DIRECTION_NO_TRIPS: &str = r#"{
        "GetNextTripsForStopResult": {
            "StopNo": "3000",
            "StopLabel": "SOMEWHERE",
            "Error": "",
            "Route": {
                "RouteDirection": {
                    "RouteNo": "1",
                    "RouteLabel": "Ottawa Rockcliffe",
                    "Direction": "",
                    "Error": "",
                    "Trips": []
                }
            }
        }
    }"#;

    pub(crate) fn prediction_with_trip(route: &str, label: &str, minutes: i64) -> Prediction {
        Prediction {
            stop_no: "3000".to_string(),
            directions: vec![RouteDirection {
                route_no: route.to_string(),
                route_label: label.to_string(),
                trips: vec![Trip {
                    adjusted_schedule_time: minutes.to_string(),
                    adjustment_age: "0.5".to_string(),
                    ..Trip::default()
                }],
                ..RouteDirection::default()
            }],
            ..Prediction::default()
        }
    }

    #[test]
    fn parses_lists_and_single_objects() {
        let prediction = parse_next_trips(TWO_DIRECTIONS.as_bytes()).unwrap();
        assert_eq!(prediction.stop_no, "3017");
        assert_eq!(prediction.directions.len(), 2);
        assert_eq!(prediction.directions[0].trips.len(), 2);
        assert_eq!(prediction.directions[1].route_no, "95");
        assert_eq!(prediction.directions[1].trips.len(), 1);

        let first = &prediction.directions[0].trips[0];
        assert_eq!(first.adjusted_schedule_minutes(), Some(4));
        assert_eq!(first.adjustment_age_minutes(), Some(0.52));
        assert!(first.is_realtime());
        assert_eq!(first.last_trip_of_schedule, "false");
        assert!(!prediction.directions[0].trips[1].is_realtime());
    }

    #[test]
    fn empty_trip_list_is_not_an_error() {
        let prediction = parse_next_trips(SINGLE_DIRECTION_NO_TRIPS.as_bytes()).unwrap();
        assert_eq!(prediction.directions.len(), 1);
        assert!(prediction.directions[0].trips.is_empty());
    }

    #[test]
    fn api_error_codes_are_remote_errors() {
        let body = r#"{"GetNextTripsForStopResult": {"StopNo": "1", "Error": "10", "Route": ""}}"#;
        assert!(matches!(
            parse_next_trips(body.as_bytes()),
            Err(RemoteCallError::Api(code)) if code == "10"
        ));
        assert!(matches!(
            parse_next_trips(b"<html>"),
            Err(RemoteCallError::Decode(_))
        ));
    }

    #[test]
    fn directions_match_route_and_headsign() {
        let prediction = parse_next_trips(TWO_DIRECTIONS.as_bytes()).unwrap();
        let matching: Vec<_> = prediction.directions_for("95", "orleans").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].direction, "Eastbound");
        assert_eq!(prediction.directions_for("95", "").count(), 2);
        assert_eq!(prediction.directions_for("44", "Orleans").count(), 0);
    }
}
