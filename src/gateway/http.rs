use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::{
    GatewayError, PaymentGateway, PrepayRequest, PrepayResponse, PrepayTicket, RefundReceipt,
    RefundRequest,
};

/// Error code the provider returns when the order was paid in the meantime.
const ORDER_PAID_CODE: &str = "ORDERPAID";

// ============================================================================
// JSON-over-HTTP payment provider client
// ============================================================================

pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct PrepayBody<'a> {
    out_trade_no: &'a str,
    description: &'a str,
    amount: PrepayAmount,
    payer: Payer<'a>,
}

#[derive(Serialize)]
struct PrepayAmount {
    total: i64,
}

#[derive(Serialize)]
struct Payer<'a> {
    openid: &'a str,
}

#[derive(Serialize)]
struct RefundBody<'a> {
    out_trade_no: &'a str,
    out_refund_no: &'a str,
    amount: RefundAmount,
}

#[derive(Serialize)]
struct RefundAmount {
    refund: i64,
    total: i64,
}

#[derive(Deserialize)]
struct ProviderError {
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, GatewayError> {
        let request_id = Uuid::now_v7();

        tracing::debug!(path = %path, request_id = %request_id, "Calling payment gateway");

        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("Request-ID", request_id.to_string())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })
    }

    async fn provider_error(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        response.json::<ProviderError>().await.unwrap_or_else(|_| ProviderError {
            code: status.as_str().to_string(),
            message: status.canonical_reason().unwrap_or_default().to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_prepay(&self, request: &PrepayRequest) -> Result<PrepayResponse, GatewayError> {
        let body = PrepayBody {
            out_trade_no: request.order_number.as_str(),
            description: &request.description,
            amount: PrepayAmount { total: request.amount },
            payer: Payer { openid: &request.payer.0 },
        };

        let response = self.post("/v3/pay/transactions/prepay", &body).await?;

        if response.status() == StatusCode::OK {
            let ticket = response
                .json::<PrepayTicket>()
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))?;
            return Ok(PrepayResponse::Ticket(ticket));
        }

        let error = Self::provider_error(response).await;
        if error.code == ORDER_PAID_CODE {
            return Ok(PrepayResponse::AlreadyPaid);
        }
        Err(GatewayError::Rejected { code: error.code, message: error.message })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, GatewayError> {
        let body = RefundBody {
            out_trade_no: request.order_number.as_str(),
            out_refund_no: &request.refund_number,
            amount: RefundAmount {
                refund: request.refund_amount,
                total: request.original_amount,
            },
        };

        let response = self.post("/v3/refund/domestic/refunds", &body).await?;

        if response.status().is_success() {
            return response
                .json::<RefundReceipt>()
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()));
        }

        let error = Self::provider_error(response).await;
        Err(GatewayError::Rejected { code: error.code, message: error.message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalised() {
        let gateway = HttpPaymentGateway::new("http://pay.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(gateway.base_url, "http://pay.local");
    }

    #[test]
    fn test_refund_body_carries_both_amounts() {
        let body = RefundBody {
            out_trade_no: "1700",
            out_refund_no: "R1700",
            amount: RefundAmount { refund: 300, total: 300 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["out_refund_no"], "R1700");
        assert_eq!(json["amount"]["refund"], 300);
        assert_eq!(json["amount"]["total"], 300);
    }
}
