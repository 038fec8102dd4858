use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{AccrualError, AppError, AppResult};
use crate::ledger::models::{is_storable_amount, OrderNumber, ReconciliationUpdate, AMOUNT_SCALE};

/// Wait applied when a 429 carries no usable Retry-After header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Order status as reported by the accrual service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Invalid,
    Processing,
    Processed,
}

/// Body of `GET /api/orders/{number}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccrualResponse {
    #[serde(alias = "order_number")]
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

impl AccrualResponse {
    /// Ledger change this decision calls for
    pub fn to_update(&self, order_number: OrderNumber) -> ReconciliationUpdate {
        match (self.status, self.accrual) {
            (AccrualStatus::Processed, Some(amount)) => {
                ReconciliationUpdate::processed(order_number, amount)
            }
            (AccrualStatus::Invalid, _) => ReconciliationUpdate::invalid(order_number),
            // PROCESSED without an amount is rejected as malformed by the client
            _ => ReconciliationUpdate::processing(order_number),
        }
    }
}

/// Where accrual decisions come from
#[async_trait]
pub trait AccrualSource: Send + Sync {
    async fn fetch(&self, order_number: &OrderNumber) -> Result<AccrualResponse, AccrualError>;
}

/// HTTP client for the external accrual service
pub struct HttpAccrualClient {
    client: Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("accrual http client: {}", e)))?;

        let base_url = base_url.trim_end_matches('/');
        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.to_string()
        } else {
            format!("http://{}", base_url)
        };

        Ok(Self { client, base_url })
    }

    fn order_url(&self, order_number: &OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, order_number)
    }
}

fn retry_after(response: &reqwest::Response) -> Duration {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl AccrualSource for HttpAccrualClient {
    async fn fetch(&self, order_number: &OrderNumber) -> Result<AccrualResponse, AccrualError> {
        let url = self.order_url(order_number);
        debug!("Querying accrual service: {}", url);

        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NO_CONTENT => return Err(AccrualError::NotRegistered),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(AccrualError::RateLimited {
                    retry_after: retry_after(&response),
                })
            }
            other => return Err(AccrualError::UnexpectedStatus(other.as_u16())),
        }

        let body = response.bytes().await?;
        let decision: AccrualResponse = serde_json::from_slice(&body)
            .map_err(|e| AccrualError::Malformed(e.to_string()))?;

        if decision.order != order_number.as_str() {
            return Err(AccrualError::Malformed(format!(
                "asked for order {}, got {}",
                order_number, decision.order
            )));
        }

        match decision.accrual {
            None if decision.status == AccrualStatus::Processed => {
                return Err(AccrualError::Malformed(
                    "PROCESSED without accrual amount".to_string(),
                ))
            }
            Some(amount) if amount < Decimal::ZERO => {
                return Err(AccrualError::Malformed(format!("negative accrual {}", amount)))
            }
            Some(amount) if !is_storable_amount(amount) => {
                return Err(AccrualError::Malformed(format!(
                    "accrual {} exceeds {} decimal places or the ledger range",
                    amount, AMOUNT_SCALE
                )))
            }
            _ => {}
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::OrderStatus;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn order(n: &str) -> OrderNumber {
        OrderNumber::parse(n).unwrap()
    }

    async fn client_for(server: &MockServer) -> HttpAccrualClient {
        HttpAccrualClient::new(&server.uri(), Duration::from_millis(300)).unwrap()
    }

    async fn mount(server: &MockServer, number: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(format!("/api/orders/{}", number)))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_processed_decision() {
        let server = MockServer::start().await;
        mount(
            &server,
            "12345678903",
            ResponseTemplate::new(200).set_body_json(json!({
                "order": "12345678903",
                "status": "PROCESSED",
                "accrual": 729.98
            })),
        )
        .await;

        let decision = client_for(&server).await.fetch(&order("12345678903")).await.unwrap();
        assert_eq!(decision.status, AccrualStatus::Processed);
        assert_eq!(decision.accrual, Some(dec!(729.98)));

        let update = decision.to_update(order("12345678903"));
        assert_eq!(update.status, OrderStatus::Processed);
        assert_eq!(update.accrual, Some(dec!(729.98)));
    }

    #[tokio::test]
    async fn test_order_number_alias_and_registered() {
        let server = MockServer::start().await;
        mount(
            &server,
            "2377225624",
            ResponseTemplate::new(200).set_body_json(json!({
                "order_number": "2377225624",
                "status": "REGISTERED"
            })),
        )
        .await;

        let decision = client_for(&server).await.fetch(&order("2377225624")).await.unwrap();
        assert_eq!(decision.status, AccrualStatus::Registered);
        assert_eq!(decision.to_update(order("2377225624")).status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_soft_failures() {
        let server = MockServer::start().await;
        mount(&server, "12345678903", ResponseTemplate::new(204)).await;
        mount(&server, "2377225624", ResponseTemplate::new(500)).await;
        mount(
            &server,
            "79927398713",
            ResponseTemplate::new(200).set_body_string("{not json"),
        )
        .await;
        mount(
            &server,
            "9278923470",
            ResponseTemplate::new(200).set_body_json(json!({
                "order": "9278923470",
                "status": "PROCESSED"
            })),
        )
        .await;

        let client = client_for(&server).await;
        assert!(matches!(
            client.fetch(&order("12345678903")).await,
            Err(AccrualError::NotRegistered)
        ));
        assert!(matches!(
            client.fetch(&order("2377225624")).await,
            Err(AccrualError::UnexpectedStatus(500))
        ));
        assert!(matches!(
            client.fetch(&order("79927398713")).await,
            Err(AccrualError::Malformed(_))
        ));
        assert!(matches!(
            client.fetch(&order("9278923470")).await,
            Err(AccrualError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unstorable_accrual_is_malformed() {
        let server = MockServer::start().await;
        mount(
            &server,
            "12345678903",
            ResponseTemplate::new(200).set_body_json(json!({
                "order": "12345678903",
                "status": "PROCESSED",
                "accrual": 1e17
            })),
        )
        .await;
        mount(
            &server,
            "2377225624",
            ResponseTemplate::new(200).set_body_json(json!({
                "order": "2377225624",
                "status": "PROCESSED",
                "accrual": 1.005
            })),
        )
        .await;

        let client = client_for(&server).await;
        assert!(matches!(
            client.fetch(&order("12345678903")).await,
            Err(AccrualError::Malformed(_))
        ));
        assert!(matches!(
            client.fetch(&order("2377225624")).await,
            Err(AccrualError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_reads_retry_after() {
        let server = MockServer::start().await;
        mount(
            &server,
            "12345678903",
            ResponseTemplate::new(429).insert_header("Retry-After", "30"),
        )
        .await;
        mount(&server, "2377225624", ResponseTemplate::new(429)).await;

        let client = client_for(&server).await;
        match client.fetch(&order("12345678903")).await {
            Err(AccrualError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(30))
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        match client.fetch(&order("2377225624")).await {
            Err(AccrualError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, DEFAULT_RETRY_AFTER)
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let server = MockServer::start().await;
        mount(
            &server,
            "12345678903",
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(json!({"order": "12345678903", "status": "PROCESSING"})),
        )
        .await;

        let result = client_for(&server).await.fetch(&order("12345678903")).await;
        assert!(matches!(result, Err(AccrualError::Transport(_))));
    }

    #[tokio::test]
    async fn test_base_url_without_scheme() {
        let client = HttpAccrualClient::new("localhost:8081/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.order_url(&order("12345678903")),
            "http://localhost:8081/api/orders/12345678903"
        );
    }
}
