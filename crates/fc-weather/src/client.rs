use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fc_common::{Clock, RateLimiter, WarningEvent};
use tracing::{info, warn};

use crate::xml::{Response, RESULT_NODATA, RESULT_OK};
use crate::{WeatherClient, WeatherError};

#[derive(Debug, Clone)]
pub struct WeatherClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub page_size: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub retry_count: u32,
    pub retry_base_delay: Duration,
    pub region_names: HashMap<String, String>,
}

/// One worker's view of the weather API: its own [`reqwest::Client`] so
/// concurrent workers never share connection-pool state.
pub struct ReqwestWeatherClient {
    http: reqwest::Client,
    config: WeatherClientConfig,
    rate_limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    cancel: Arc<tokio::sync::Notify>,
}

impl ReqwestWeatherClient {
    pub fn new(
        config: WeatherClientConfig,
        rate_limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        cancel: Arc<tokio::sync::Notify>,
    ) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| WeatherError::Unknown(e.to_string()))?;
        Ok(Self {
            http,
            config,
            rate_limiter,
            clock,
            cancel,
        })
    }

    async fn fetch_page(
        &self,
        region_code: &str,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
        page_no: u32,
    ) -> Result<Response, WeatherError> {
        self.rate_limiter.acquire(&self.cancel).await;

        let response = self
            .http
            .get(&self.config.base_url)
            .query(&[
                ("serviceKey", self.config.api_key.as_str()),
                ("pageNo", &page_no.to_string()),
                ("numOfRows", &self.config.page_size.to_string()),
                ("dataType", "XML"),
                ("fromTmFc", &from_date.format("%Y%m%d%H%M").to_string()),
                ("toTmFc", &to_date.format("%Y%m%d%H%M").to_string()),
                ("areaCode", region_code),
            ])
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Http(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WeatherError::ParseError(e.to_string()))?;

        let parsed = quick_xml::de::from_str::<Response>(&body)
            .map_err(|e| WeatherError::ParseError(e.to_string()))?;

        // Surface non-success, non-NODATA result codes here (not in the
        // caller) so rate-limit code 22 flows through the same retry loop
        // as transport failures instead of being treated as terminal.
        if !RESULT_OK.contains(&parsed.header.result_code.as_str())
            && parsed.header.result_code != RESULT_NODATA
        {
            return Err(WeatherError::ApiResultError {
                code: parsed.header.result_code,
            });
        }

        Ok(parsed)
    }

    async fn fetch_page_with_retry(
        &self,
        region_code: &str,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
        page_no: u32,
    ) -> Result<Response, WeatherError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_page(region_code, from_date, to_date, page_no).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retriable() && attempt < self.config.retry_count => {
                    let delay = self.config.retry_base_delay * 2u32.pow(attempt);
                    warn!(
                        event = "area.fetch.retry",
                        region_code,
                        page_no,
                        attempt,
                        error = %err,
                    );
                    self.clock.sleep(delay, &self.cancel).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn classify_transport_error(err: &reqwest::Error) -> WeatherError {
    if err.is_timeout() {
        WeatherError::Timeout
    } else if err.is_connect() {
        WeatherError::Connection(err.to_string())
    } else {
        WeatherError::Unknown(err.to_string())
    }
}

#[async_trait]
impl WeatherClient for ReqwestWeatherClient {
    async fn fetch(
        &self,
        region_code: &str,
        from_date: DateTime<Utc>,
        to_date: DateTime<Utc>,
    ) -> Result<Vec<WarningEvent>, WeatherError> {
        let mut events = Vec::new();
        let mut page_no = 1u32;

        loop {
            let response = self
                .fetch_page_with_retry(region_code, from_date, to_date, page_no)
                .await?;

            if response.header.result_code == RESULT_NODATA {
                if page_no == 1 {
                    return Ok(Vec::new());
                }
                break;
            }

            let Some(body) = response.body else {
                break;
            };
            let page_items = body.items.map(|i| i.item).unwrap_or_default();
            let page_item_count = page_items.len();
            events.extend(
                page_items
                    .into_iter()
                    .map(|item| item.into_warning_event(&self.config.region_names)),
            );

            info!(
                event = "area.fetch.summary",
                region_code,
                page_no,
                page_item_count,
                total_count = body.total_count,
            );

            if body.num_of_rows == 0 {
                break;
            }
            let total_pages = body.total_count.div_ceil(body.num_of_rows.max(1));
            if page_no >= total_pages {
                break;
            }
            page_no += 1;
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_common::clock::FakeClock;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> WeatherClientConfig {
        WeatherClientConfig {
            base_url,
            api_key: "rawkey".to_string(),
            page_size: 10,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            retry_count: 2,
            retry_base_delay: Duration::from_millis(1),
            region_names: HashMap::new(),
        }
    }

    fn test_client(base_url: String) -> ReqwestWeatherClient {
        let rate_limiter = Arc::new(RateLimiter::new(0));
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(Utc::now()));
        let cancel = Arc::new(tokio::sync::Notify::new());
        ReqwestWeatherClient::new(test_config(base_url), rate_limiter, clock, cancel).unwrap()
    }

    #[tokio::test]
    async fn nodata_on_first_page_yields_empty_list() {
        let server = MockServer::start().await;
        let body = r#"<response><header><resultCode>03</resultCode><resultMsg>NODATA</resultMsg></header></response>"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let events = client
            .fetch("R1", Utc::now(), Utc::now())
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn non_success_code_surfaces_as_api_result_error() {
        let server = MockServer::start().await;
        let body = r#"<response><header><resultCode>99</resultCode><resultMsg>SERVER ERROR</resultMsg></header></response>"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let err = client.fetch("R1", Utc::now(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, WeatherError::ApiResultError { .. }));
    }

    #[tokio::test]
    async fn rate_limit_code_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        let rate_limited = r#"<response><header><resultCode>22</resultCode><resultMsg>LIMITED</resultMsg></header></response>"#;
        let ok = r#"<response><header><resultCode>03</resultCode><resultMsg>NODATA</resultMsg></header></response>"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rate_limited))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let events = client.fetch("R1", Utc::now(), Utc::now()).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn single_page_response_parses_items() {
        let server = MockServer::start().await;
        let body = r#"
            <response>
                <header><resultCode>00</resultCode><resultMsg>OK</resultMsg></header>
                <body>
                    <items><item>
                        <regId>R1</regId><wrnId>W</wrnId><lvl>1</lvl><cmd>1</cmd>
                        <tmFc>202607010000</tmFc><stnId>S1</stnId><tmSeq>1</tmSeq>
                    </item></items>
                    <pageNo>1</pageNo><numOfRows>10</numOfRows><totalCount>1</totalCount>
                </body>
            </response>
        "#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let events = client.fetch("R1", Utc::now(), Utc::now()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].region_code, "R1");
    }
}
