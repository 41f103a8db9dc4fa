//! Recording fakes for the external boundaries, shared by unit tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::order::OrderNotification;
use crate::gateway::{
    GatewayError, PaymentGateway, PrepayRequest, PrepayResponse, PrepayTicket, RefundReceipt,
    RefundRequest,
};
use crate::messaging::{NotifyError, OrderNotifier};

#[derive(Default)]
struct GatewayScript {
    failure: Option<GatewayError>,
    already_paid: bool,
    stall: Option<Duration>,
    prepays: Vec<PrepayRequest>,
    refunds: Vec<RefundRequest>,
}

/// Payment gateway that records every call and answers as scripted.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    script: Arc<Mutex<GatewayScript>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: GatewayError) {
        self.script.lock().unwrap().failure = Some(error);
    }

    pub fn succeed(&self) {
        self.script.lock().unwrap().failure = None;
    }

    pub fn report_already_paid(&self) {
        self.script.lock().unwrap().already_paid = true;
    }

    pub fn stall_for(&self, delay: Duration) {
        self.script.lock().unwrap().stall = Some(delay);
    }

    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.script.lock().unwrap().refunds.clone()
    }

    pub fn refund_calls(&self) -> usize {
        self.script.lock().unwrap().refunds.len()
    }

    pub fn prepays(&self) -> Vec<PrepayRequest> {
        self.script.lock().unwrap().prepays.clone()
    }

    fn scripted(&self) -> (Option<GatewayError>, Option<Duration>) {
        let script = self.script.lock().unwrap();
        (script.failure.clone(), script.stall)
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_prepay(&self, request: &PrepayRequest) -> Result<PrepayResponse, GatewayError> {
        let already_paid = {
            let mut script = self.script.lock().unwrap();
            script.prepays.push(request.clone());
            script.already_paid
        };
        let (failure, stall) = self.scripted();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }
        if already_paid {
            return Ok(PrepayResponse::AlreadyPaid);
        }
        Ok(PrepayResponse::Ticket(PrepayTicket {
            prepay_id: format!("prepay-{}", request.order_number),
            nonce: "nonce".into(),
            timestamp: "0".into(),
            sign_type: "RSA".into(),
            signature: "signature".into(),
        }))
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, GatewayError> {
        self.script.lock().unwrap().refunds.push(request.clone());
        let (failure, stall) = self.scripted();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(RefundReceipt {
            refund_number: request.refund_number.clone(),
            refund_id: format!("refund-{}", request.refund_number),
            status: "SUCCESS".into(),
        })
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<OrderNotification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OrderNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn notify(&self, notification: &OrderNotification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
