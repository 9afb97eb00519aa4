//! Current-conditions lookup backed by Open-Meteo.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::arguments::ToolArguments;
use super::schema::AgentToolParameters;
use super::tool::{Tool, ToolExecutionContext};
use crate::error::{RelayError, Result};
use crate::provider::http::{shared_client, status_to_error};

pub const WEATHER_TOOL_NAME: &str = "weatherTool";

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Weather tool. Endpoints are overridable for tests and self-hosted mirrors.
#[derive(Debug, Clone)]
pub struct WeatherTool {
    geocoding_url: String,
    forecast_url: String,
    parameters: AgentToolParameters,
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::with_endpoints(GEOCODING_URL, FORECAST_URL)
    }
}

impl WeatherTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(geocoding_url: impl Into<String>, forecast_url: impl Into<String>) -> Self {
        Self {
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
            parameters: AgentToolParameters::object()
                .string("location", "City name", true)
                .build(),
        }
    }

    async fn geocode(&self, location: &str) -> Result<GeoResult> {
        let resp = shared_client()
            .get(&self.geocoding_url)
            .query(&[("name", location), ("count", "1")])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(status_to_error(status, &resp.text().await.unwrap_or_default()));
        }
        let body: GeoResponse = resp.json().await?;
        body.results
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::tool(WEATHER_TOOL_NAME, format!("Location '{location}' not found")))
    }

    async fn current(&self, place: &GeoResult) -> Result<CurrentConditions> {
        let resp = shared_client()
            .get(&self.forecast_url)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                (
                    "current",
                    "temperature_2m,apparent_temperature,relative_humidity_2m,wind_speed_10m,wind_gusts_10m,weather_code"
                        .to_string(),
                ),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(status_to_error(status, &resp.text().await.unwrap_or_default()));
        }
        let body: ForecastResponse = resp.json().await?;
        Ok(body.current)
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        WEATHER_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Get current weather for a location"
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(&self, args: &ToolArguments, _ctx: &ToolExecutionContext) -> Result<Value> {
        let location = args.get_str("location")?.trim();
        if location.is_empty() {
            return Err(RelayError::tool(WEATHER_TOOL_NAME, "location must not be empty"));
        }
        let place = self.geocode(location).await?;
        debug!(location, latitude = place.latitude, longitude = place.longitude, "geocoded");
        let current = self.current(&place).await?;

        let report = WeatherReport {
            temperature: current.temperature_2m,
            feels_like: current.apparent_temperature,
            humidity: current.relative_humidity_2m,
            wind_speed: current.wind_speed_10m,
            wind_gust: current.wind_gusts_10m,
            conditions: describe_weather_code(current.weather_code).to_string(),
            location: place.name,
        };
        Ok(serde_json::to_value(report)?)
    }
}

/// WMO weather interpretation codes.
pub fn describe_weather_code(code: u32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Foggy",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WeatherReport {
    temperature: f64,
    feels_like: f64,
    humidity: f64,
    wind_speed: f64,
    wind_gust: f64,
    conditions: String,
    location: String,
}

#[derive(Deserialize)]
struct GeoResponse {
    #[serde(default)]
    results: Vec<GeoResult>,
}

#[derive(Deserialize)]
struct GeoResult {
    latitude: f64,
    longitude: f64,
    name: String,
}

#[derive(Deserialize)]
struct ForecastResponse {
    current: CurrentConditions,
}

#[derive(Deserialize)]
struct CurrentConditions {
    temperature_2m: f64,
    apparent_temperature: f64,
    relative_humidity_2m: f64,
    wind_speed_10m: f64,
    wind_gusts_10m: f64,
    weather_code: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn tool_for(server: &MockServer) -> WeatherTool {
        WeatherTool::with_endpoints(
            format!("{}/v1/search", server.uri()),
            format!("{}/v1/forecast", server.uri()),
        )
    }

    #[tokio::test]
    async fn reports_current_conditions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .and(query_param("name", "Oslo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "latitude": 59.91, "longitude": 10.75, "name": "Oslo" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "current": {
                    "temperature_2m": 4.5,
                    "apparent_temperature": 1.0,
                    "relative_humidity_2m": 80.0,
                    "wind_speed_10m": 12.0,
                    "wind_gusts_10m": 20.0,
                    "weather_code": 3
                }
            })))
            .mount(&server)
            .await;

        let out = tool_for(&server)
            .await
            .execute(
                &ToolArguments::new(json!({ "location": "Oslo" })),
                &ToolExecutionContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out["conditions"], "Overcast");
        assert_eq!(out["feelsLike"], 1.0);
        assert_eq!(out["location"], "Oslo");
    }

    #[tokio::test]
    async fn unknown_location_is_a_tool_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let err = tool_for(&server)
            .await
            .execute(
                &ToolArguments::new(json!({ "location": "Atlantis" })),
                &ToolExecutionContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ToolExecution { .. }));
        assert!(err.to_string().contains("Atlantis"));
    }

    #[test]
    fn unmapped_codes_are_unknown() {
        assert_eq!(describe_weather_code(0), "Clear sky");
        assert_eq!(describe_weather_code(42), "Unknown");
    }
}
