//! Yahoo Finance HTTP client and price provider.
//!
//! Fetches daily bars from Yahoo's v8 chart API. The shared [`YahooClient`]
//! handles retries with exponential backoff, the circuit breaker, and the
//! cookie/crumb pair that the quote summary endpoint requires.
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataSource, FetchResult, PriceProvider, RawBar};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Blocking HTTP client shared by the Yahoo providers.
pub struct YahooClient {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
    crumb: Mutex<Option<String>>,
}

impl YahooClient {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            crumb: Mutex::new(None),
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// GET a JSON document with retry and circuit breaker logic.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str, symbol: &str) -> Result<T, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                tracing::debug!(symbol, attempt, ?delay, "retrying Yahoo request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if let Attempt::Retry(e) = self.on_status(resp.status(), retry_after, symbol)? {
                last_error = Some(e);
                continue;
            }

            let parsed: T = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!(
                    "failed to parse response for {symbol}: {e}"
                ))
            })?;
            self.circuit_breaker.record_success();
            return Ok(parsed);
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }

    /// Delay before retry number `attempt` (1-based): 500ms, 1s, 2s, ...
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt.saturating_sub(1))
    }

    /// Apply a response status to the breaker and crumb. `Err` ends the request.
    fn on_status(
        &self,
        status: StatusCode,
        retry_after: Option<u64>,
        symbol: &str,
    ) -> Result<Attempt, DataError> {
        match classify_status(status) {
            StatusAction::Parse => Ok(Attempt::Parse),
            StatusAction::Blocked => {
                tracing::warn!(symbol, "Yahoo returned 403; tripping circuit breaker");
                self.circuit_breaker.trip();
                Err(DataError::CircuitBreakerTripped)
            }
            StatusAction::RateLimited => {
                self.circuit_breaker.record_failure();
                Ok(Attempt::Retry(DataError::RateLimited {
                    retry_after_secs: retry_after.unwrap_or(60),
                }))
            }
            StatusAction::Unauthorized => {
                // A stale crumb is the usual cause; the next call fetches a new one.
                self.invalidate_crumb();
                Err(DataError::AuthenticationRequired(format!(
                    "Yahoo Finance rejected the request for {symbol}"
                )))
            }
            StatusAction::NotFound => Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            }),
            StatusAction::Retry => {
                self.circuit_breaker.record_failure();
                Ok(Attempt::Retry(DataError::Other(format!(
                    "HTTP {status} for {symbol}"
                ))))
            }
        }
    }

    /// Crumb token for endpoints that need cookie authentication.
    ///
    /// The first call visits `fc.yahoo.com` to receive the session cookie, then
    /// asks for a crumb; the result is cached until a 401 invalidates it.
    pub fn crumb(&self) -> Result<String, DataError> {
        if let Some(crumb) = self.crumb.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Ok(crumb);
        }
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        // fc.yahoo.com answers 404 but sets the cookie; the status is irrelevant.
        let _ = self.client.get("https://fc.yahoo.com").send();

        for endpoint in [
            "https://query2.finance.yahoo.com/v1/test/getcrumb",
            "https://query1.finance.yahoo.com/v1/test/getcrumb",
        ] {
            let resp = match self.client.get(endpoint).send() {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::debug!(endpoint, error = %e, "crumb request failed");
                    continue;
                }
            };
            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                return Err(DataError::RateLimited {
                    retry_after_secs: 60,
                });
            }
            if !resp.status().is_success() {
                continue;
            }
            let body = resp
                .text()
                .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;
            let body = body.trim();
            if !body.is_empty() && body.len() < 64 && !body.contains('<') {
                *self.crumb.lock().unwrap_or_else(|e| e.into_inner()) = Some(body.to_string());
                return Ok(body.to_string());
            }
        }

        Err(DataError::AuthenticationRequired(
            "failed to obtain Yahoo crumb".into(),
        ))
    }

    fn invalidate_crumb(&self) {
        *self.crumb.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// How [`YahooClient::get_json`] treats a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// 2xx: parse the body.
    Parse,
    /// 403: trip the breaker and stop.
    Blocked,
    /// 429: count a breaker failure and retry.
    RateLimited,
    /// 401: drop the crumb and stop.
    Unauthorized,
    /// 404: unknown symbol.
    NotFound,
    /// Any other status: count a breaker failure and retry with backoff.
    Retry,
}

pub fn classify_status(status: StatusCode) -> StatusAction {
    match status {
        s if s.is_success() => StatusAction::Parse,
        StatusCode::FORBIDDEN => StatusAction::Blocked,
        StatusCode::TOO_MANY_REQUESTS => StatusAction::RateLimited,
        StatusCode::UNAUTHORIZED => StatusAction::Unauthorized,
        StatusCode::NOT_FOUND => StatusAction::NotFound,
        _ => StatusAction::Retry,
    }
}

/// Next step of the retry loop after a status has been applied.
#[derive(Debug)]
enum Attempt {
    Parse,
    Retry(DataError),
}

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance daily price provider.
pub struct YahooPriceProvider {
    http: Arc<YahooClient>,
}

impl YahooPriceProvider {
    pub fn new(http: Arc<YahooClient>) -> Self {
        Self { http }
    }

    /// Build the chart API URL for a symbol and date range.
    fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let end_ts = (end + ChronoDuration::days(1))
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp();
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
             ?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true&events=div%2Csplit"
        )
    }

    /// Parse the chart API response into RawBars.
    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<Vec<RawBar>, DataError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Some(err) => {
                DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => DataError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

        // Timestamps mark the exchange open; shift to exchange time before
        // taking the date or NZX sessions land on the previous UTC day.
        let gmt_offset = data.meta.as_ref().and_then(|m| m.gmtoffset).unwrap_or(0);

        let timestamps = data
            .timestamp
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let mut bars: Vec<RawBar> = Vec::with_capacity(timestamps.len());

        for (i, &ts) in timestamps.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(ts + gmt_offset, 0)
                .map(|dt| dt.naive_utc().date())
                .ok_or_else(|| {
                    DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();
            let adj_close = adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten());

            // Skip rows where all OHLCV are None (holidays/non-trading days)
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            // Yahoo occasionally repeats the live session as a second row for today.
            if bars.last().map(|b| b.date) == Some(date) {
                bars.pop();
            }

            bars.push(RawBar {
                date,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume.unwrap_or(0),
                adj_close: adj_close.unwrap_or(f64::NAN),
            });
        }

        if bars.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        Ok(bars)
    }
}

impl PriceProvider for YahooPriceProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let url = Self::chart_url(symbol, start, end);
        let chart: ChartResponse = self.http.get_json(&url, symbol)?;
        let bars = Self::parse_response(symbol, chart)?;
        tracing::debug!(symbol, bars = bars.len(), "fetched chart");
        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars,
            source: DataSource::YahooFinance,
        })
    }

    fn is_available(&self) -> bool {
        self.http.circuit_breaker().is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::circuit_breaker::BreakerState;

    fn client() -> YahooClient {
        let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(60), 3));
        YahooClient::new(breaker).unwrap()
    }

    #[test]
    fn statuses_map_to_actions() {
        assert_eq!(classify_status(StatusCode::OK), StatusAction::Parse);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), StatusAction::Parse);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), StatusAction::Blocked);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusAction::RateLimited
        );
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), StatusAction::Unauthorized);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusAction::NotFound);
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::MOVED_PERMANENTLY,
            StatusCode::BAD_REQUEST,
        ] {
            assert_eq!(classify_status(status), StatusAction::Retry, "{status}");
        }
    }

    #[test]
    fn success_parses_and_leaves_breaker_closed() {
        let http = client();
        assert!(matches!(
            http.on_status(StatusCode::OK, None, "AIR.NZ"),
            Ok(Attempt::Parse)
        ));
        assert_eq!(http.circuit_breaker().state(), BreakerState::Closed);
    }

    #[test]
    fn rate_limit_retries_and_counts_toward_the_breaker() {
        let http = client();
        let first = http.on_status(StatusCode::TOO_MANY_REQUESTS, Some(7), "AIR.NZ");
        assert!(matches!(
            first,
            Ok(Attempt::Retry(DataError::RateLimited { retry_after_secs: 7 }))
        ));
        assert_eq!(http.circuit_breaker().state(), BreakerState::Closed);

        let second = http.on_status(StatusCode::TOO_MANY_REQUESTS, None, "AIR.NZ");
        assert!(matches!(
            second,
            Ok(Attempt::Retry(DataError::RateLimited { retry_after_secs: 60 }))
        ));
        let _ = http.on_status(StatusCode::TOO_MANY_REQUESTS, None, "AIR.NZ");
        assert!(matches!(http.circuit_breaker().state(), BreakerState::Open { .. }));
    }

    #[test]
    fn unauthorized_clears_the_crumb() {
        let http = client();
        *http.crumb.lock().unwrap() = Some("abc".into());

        let result = http.on_status(StatusCode::UNAUTHORIZED, None, "AIR.NZ");

        assert!(matches!(result, Err(DataError::AuthenticationRequired(_))));
        assert!(http.crumb.lock().unwrap().is_none());
        assert_eq!(http.circuit_breaker().state(), BreakerState::Closed);
    }

    #[test]
    fn forbidden_trips_the_breaker_at_once() {
        let http = client();
        let result = http.on_status(StatusCode::FORBIDDEN, None, "AIR.NZ");
        assert!(matches!(result, Err(DataError::CircuitBreakerTripped)));
        assert!(matches!(http.circuit_breaker().state(), BreakerState::Open { .. }));
        assert!(!http.circuit_breaker().is_allowed());
    }

    #[test]
    fn not_found_stops_without_a_breaker_failure() {
        let http = client();
        for _ in 0..3 {
            let result = http.on_status(StatusCode::NOT_FOUND, None, "NOPE.NZ");
            assert!(matches!(result, Err(DataError::SymbolNotFound { ref symbol }) if symbol == "NOPE.NZ"));
        }
        assert_eq!(http.circuit_breaker().state(), BreakerState::Closed);
    }

    #[test]
    fn server_errors_retry_until_the_breaker_opens() {
        let http = client();
        for _ in 0..2 {
            let result = http.on_status(StatusCode::SERVICE_UNAVAILABLE, None, "AIR.NZ");
            assert!(matches!(result, Ok(Attempt::Retry(DataError::Other(ref m))) if m.contains("503")));
        }
        assert_eq!(http.circuit_breaker().state(), BreakerState::Closed);
        let _ = http.on_status(StatusCode::INTERNAL_SERVER_ERROR, None, "AIR.NZ");
        assert!(matches!(http.circuit_breaker().state(), BreakerState::Open { .. }));
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let http = client();
        assert_eq!(http.backoff(1), Duration::from_millis(500));
        assert_eq!(http.backoff(2), Duration::from_secs(1));
        assert_eq!(http.backoff(3), Duration::from_secs(2));
    }

    fn parse(json: &str) -> Result<Vec<RawBar>, DataError> {
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        YahooPriceProvider::parse_response("AIR.NZ", resp)
    }

    #[test]
    fn chart_url_covers_whole_end_day() {
        let url = YahooPriceProvider::chart_url(
            "AIR.NZ",
            NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
        );
        assert!(url.contains("period1=0&"));
        assert!(url.contains("period2=86400&"));
        assert!(url.contains("/chart/AIR.NZ?"));
    }

    #[test]
    fn parses_bars_in_exchange_time() {
        // 2024-01-02 10:00 NZDT is 2024-01-01 21:00 UTC.
        let json = r#"{"chart":{"result":[{
            "meta":{"gmtoffset":46800},
            "timestamp":[1704142800,1704229200],
            "indicators":{
                "quote":[{"open":[1.0,null],"high":[1.1,null],"low":[0.9,null],"close":[1.05,null],"volume":[100,null]}],
                "adjclose":[{"adjclose":[1.0,null]}]
            }}],"error":null}}"#;
        let bars = parse(json).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].adj_close, 1.0);
        assert_eq!(bars[0].close, 1.05);
    }

    #[test]
    fn not_found_error_maps_to_symbol_not_found() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        assert!(matches!(parse(json), Err(DataError::SymbolNotFound { .. })));
    }

    #[test]
    fn missing_adjclose_leaves_nan() {
        let json = r#"{"chart":{"result":[{
            "timestamp":[1704186000],
            "indicators":{"quote":[{"open":[5.0],"high":[5.0],"low":[5.0],"close":[5.0],"volume":[0]}]}
            }],"error":null}}"#;
        let bars = parse(json).unwrap();
        assert!(bars[0].adj_close.is_nan());
        assert_eq!(bars[0].adjusted_price(), Some(5.0));
    }
}
