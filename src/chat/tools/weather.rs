//! `getWeather`: current conditions from an Open-Meteo compatible API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client as ReqwestClient;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::chat::core::config::WeatherConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::tools::{Tool, ToolContext, ToolFuture, parse_params};

const TOOL_NAME: &str = "getWeather";

/// Source of weather data.
pub trait WeatherSource: Send + Sync {
    /// Fetch the forecast payload for a coordinate.
    ///
    /// # Errors
    /// Returns an error if the provider cannot be reached or answers with a failure.
    fn forecast(&self, latitude: f64, longitude: f64) -> ToolFuture<'_>;
}

/// Open-Meteo HTTP client.
pub struct OpenMeteoClient {
    client: ReqwestClient,
    base_url: Url,
}

impl OpenMeteoClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(config: &WeatherConfig) -> ChatResult<Self> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
        })
    }

    fn forecast_url(&self, latitude: f64, longitude: f64) -> ChatResult<Url> {
        let mut url = self.base_url.join("v1/forecast")?;
        url.query_pairs_mut()
            .append_pair("latitude", &latitude.to_string())
            .append_pair("longitude", &longitude.to_string())
            .append_pair("current", "temperature_2m")
            .append_pair("hourly", "temperature_2m")
            .append_pair("daily", "sunrise,sunset")
            .append_pair("timezone", "auto");
        Ok(url)
    }
}

impl WeatherSource for OpenMeteoClient {
    fn forecast(&self, latitude: f64, longitude: f64) -> ToolFuture<'_> {
        Box::pin(async move {
            let url = self.forecast_url(latitude, longitude)?;
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ChatError::tool_failed(
                    TOOL_NAME,
                    format!("weather provider returned status {}", status.as_u16()),
                ));
            }
            Ok(response.json::<Value>().await?)
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WeatherParams {
    latitude: f64,
    longitude: f64,
}

impl WeatherParams {
    fn parse(args: &Value) -> ChatResult<Self> {
        let params: Self = parse_params(TOOL_NAME, args)?;
        if !(-90.0..=90.0).contains(&params.latitude) {
            return Err(invalid("latitude must be between -90 and 90"));
        }
        if !(-180.0..=180.0).contains(&params.longitude) {
            return Err(invalid("longitude must be between -180 and 180"));
        }
        Ok(params)
    }
}

fn invalid(reason: &str) -> ChatError {
    ChatError::InvalidToolParameters {
        tool: TOOL_NAME.to_string(),
        reason: reason.to_string(),
    }
}

/// Current weather at a coordinate.
pub struct GetWeatherTool {
    source: Arc<dyn WeatherSource>,
}

impl GetWeatherTool {
    /// Wrap a weather source.
    #[must_use]
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        Self { source }
    }
}

impl Tool for GetWeatherTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Get the current weather at a location"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "latitude": { "type": "number", "minimum": -90, "maximum": 90 },
                "longitude": { "type": "number", "minimum": -180, "maximum": 180 }
            },
            "required": ["latitude", "longitude"]
        })
    }

    fn validate(&self, args: &Value) -> ChatResult<()> {
        WeatherParams::parse(args).map(|_| ())
    }

    fn execute<'a>(&'a self, _ctx: &'a ToolContext, args: Value) -> ToolFuture<'a> {
        Box::pin(async move {
            let params = WeatherParams::parse(&args)?;
            self.source
                .forecast(params.latitude, params.longitude)
                .await
                .map_err(|err| match err {
                    err @ ChatError::ToolExecution { .. } => err,
                    other => ChatError::tool_failed(TOOL_NAME, other),
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::chat::tools::registry::tests::context;

    #[derive(Default)]
    struct FixedWeather {
        seen: Mutex<Vec<(f64, f64)>>,
    }

    impl WeatherSource for FixedWeather {
        fn forecast(&self, latitude: f64, longitude: f64) -> ToolFuture<'_> {
            self.seen.lock().unwrap().push((latitude, longitude));
            Box::pin(async { Ok(json!({"current": {"temperature_2m": 21.5}})) })
        }
    }

    #[test]
    fn forecast_url_carries_every_query_parameter() {
        let client = OpenMeteoClient::new(&WeatherConfig::default()).unwrap();
        let url = client.forecast_url(37.77, -122.42).unwrap();
        assert_eq!(url.path(), "/v1/forecast");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("latitude".to_string(), "37.77".to_string())));
        assert!(query.contains(&("longitude".to_string(), "-122.42".to_string())));
        assert!(query.contains(&("daily".to_string(), "sunrise,sunset".to_string())));
        assert!(query.contains(&("timezone".to_string(), "auto".to_string())));
    }

    #[test]
    fn out_of_range_coordinates_are_invalid() {
        let tool = GetWeatherTool::new(Arc::new(FixedWeather::default()));
        assert!(tool.validate(&json!({"latitude": 91, "longitude": 0})).is_err());
        assert!(tool.validate(&json!({"latitude": 0, "longitude": -181})).is_err());
        assert!(tool.validate(&json!({"latitude": "north", "longitude": 0})).is_err());
        tool.validate(&json!({"latitude": -90, "longitude": 180})).unwrap();
    }

    #[tokio::test]
    async fn execution_returns_the_provider_payload() {
        let source = Arc::new(FixedWeather::default());
        let tool = GetWeatherTool::new(source.clone());
        let result = tool
            .execute(&context().await, json!({"latitude": 48.85, "longitude": 2.35}))
            .await
            .unwrap();
        assert_eq!(result["current"]["temperature_2m"], 21.5);
        assert_eq!(source.seen.lock().unwrap().as_slice(), &[(48.85, 2.35)]);
    }
}
