use crate::api::error::ApiError;
use crate::api::{ApiLocation, ApiPage, LocationQuery, LocationsResponse, MeasurementApi, RateLimitHint};
use crate::config::PipelineConfig;
use crate::types::fetch_unit::TimeWindow;
use chrono::SecondsFormat;
use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::time::Duration;

const API_KEY_HEADER: &str = "X-API-Key";
/// Wait used when a 429 or a low remaining budget carries no reset information.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// [`MeasurementApi`] backed by the OpenAQ v3 REST API.
pub struct OpenAqClient {
    client: Client,
    base_url: String,
    api_key: String,
    page_limit: u32,
}

impl OpenAqClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        page_limit: u32,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .gzip(true)
            .build()
            .map_err(|e| ApiError::NetworkRequest(base_url.to_string(), e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            page_limit,
        })
    }

    /// Builds a client from the config, reading the API key from the
    /// configured environment variable.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, crate::PipelineError> {
        let api_key = config.api_key()?;
        Ok(Self::new(
            &config.api_base_url,
            api_key,
            config.page_limit,
            config.request_timeout(),
        )?)
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<(serde_json::Value, HeaderMap), ApiError> {
        debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout(url.to_string())
                } else {
                    ApiError::NetworkRequest(url.to_string(), e)
                }
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(&headers);
            warn!("Rate limited on {}, provider asks to wait {:?}", url, retry_after);
            return Err(ApiError::RateLimited {
                url: url.to_string(),
                retry_after: Some(retry_after),
            });
        }
        if !status.is_success() {
            warn!("HTTP error for {}: {}", url, status);
            return Err(ApiError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::NetworkRequest(url.to_string(), e))?;
        let body = serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(url.to_string(), e))?;
        Ok((body, headers))
    }
}

impl MeasurementApi for OpenAqClient {
    async fn locations(&self, query: &LocationQuery) -> Result<Vec<ApiLocation>, ApiError> {
        let url = format!("{}/v3/locations", self.base_url);
        let params = [
            (
                "coordinates",
                format!("{},{}", query.center.latitude(), query.center.longitude()),
            ),
            ("radius", query.radius_m.to_string()),
            ("limit", query.limit.to_string()),
        ];
        let (body, _) = self.get_json(&url, &params).await?;
        let parsed: LocationsResponse =
            serde_json::from_value(body).map_err(|e| ApiError::Decode(url, e))?;
        Ok(parsed.results)
    }

    async fn measurements_page(
        &self,
        sensor_id: u64,
        window: &TimeWindow,
        page: u32,
    ) -> Result<ApiPage, ApiError> {
        let url = format!("{}/v3/sensors/{}/measurements", self.base_url, sensor_id);
        let params = [
            (
                "datetime_from",
                window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "datetime_to",
                window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("limit", self.page_limit.to_string()),
            ("page", page.to_string()),
        ];
        let (body, headers) = self.get_json(&url, &params).await?;
        page_from_body(&url, body, rate_limit_hint(&headers))
    }
}

/// Wraps a decoded body as an [`ApiPage`], insisting on a `results` array.
pub(crate) fn page_from_body(
    url: &str,
    body: serde_json::Value,
    rate_limit: Option<RateLimitHint>,
) -> Result<ApiPage, ApiError> {
    let result_count = body
        .get("results")
        .and_then(serde_json::Value::as_array)
        .map(Vec::len)
        .ok_or_else(|| ApiError::UnexpectedShape {
            url: url.to_string(),
            message: "response has no 'results' array".to_string(),
        })?;
    Ok(ApiPage {
        body,
        result_count,
        rate_limit,
    })
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

pub(crate) fn rate_limit_hint(headers: &HeaderMap) -> Option<RateLimitHint> {
    let remaining = header_number(headers, "x-ratelimit-remaining")?;
    let reset = header_number(headers, "x-ratelimit-reset")
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
    Some(RateLimitHint {
        remaining: remaining as u32,
        reset,
    })
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Duration {
    header_number(headers, "retry-after")
        .or_else(|| header_number(headers, "x-ratelimit-reset"))
        .map(Duration::from_secs_f64)
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
}
