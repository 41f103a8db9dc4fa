use actix::Addr;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use crate::actors::{ComponentReport, GetSystemHealth, HealthMonitorActor};
use crate::domain::order::StatisticsAggregator;
use super::Metrics;

/// Shared state of the operational HTTP surface.
#[derive(Clone)]
pub struct ServerState {
    pub metrics: Arc<Metrics>,
    pub statistics: Arc<StatisticsAggregator>,
    pub health_monitor: Addr<HealthMonitorActor>,
}

/// Serve `/metrics`, `/health` and `/statistics` until the system stops.
pub async fn start_metrics_server(state: ServerState, port: u16) -> std::io::Result<()> {
    tracing::info!("Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
            .route("/statistics", web::get().to(statistics_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(state: web::Data<ServerState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<ServerState>) -> impl Responder {
    let health = match state.health_monitor.send(GetSystemHealth).await {
        Ok(health) => health,
        Err(e) => {
            tracing::error!(error = %e, "Health monitor unreachable");
            return HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unhealthy",
                "service": "order-engine"
            }));
        }
    };

    let mut components: Vec<ComponentReport> = health.components.values().map(ComponentReport::from).collect();
    components.sort_by(|a, b| a.name.cmp(&b.name));

    let body = serde_json::json!({
        "status": health.overall_status.label(),
        "service": "order-engine",
        "checked_at": health.check_time,
        "components": components,
    });

    if health.overall_status.label() == "unhealthy" {
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}

async fn statistics_handler(state: web::Data<ServerState>) -> impl Responder {
    match state.statistics.counts().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            tracing::error!(error = %e, "Failed to count orders");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::Actor;
    use actix_web::test;
    use crate::store::InMemoryOrderStore;

    fn state() -> ServerState {
        ServerState {
            metrics: Arc::new(Metrics::new().unwrap()),
            statistics: Arc::new(StatisticsAggregator::new(Arc::new(InMemoryOrderStore::new()))),
            health_monitor: HealthMonitorActor::new().start(),
        }
    }

    #[actix_web::test]
    async fn test_statistics_endpoint_serves_camel_case_counts() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .route("/statistics", web::get().to(statistics_handler)),
        )
        .await;

        let req = test::TestRequest::get().uri("/statistics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["toBeConfirmed"], 0);
        assert_eq!(body["confirmed"], 0);
        assert_eq!(body["deliveryInProgress"], 0);
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_exposes_registry() {
        let state = state();
        state.metrics.record_submission();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(metrics_handler)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body = test::call_and_read_body(&app, req).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("orders_submitted_total 1"));
    }

    #[actix_web::test]
    async fn test_health_endpoint_reports_healthy_when_empty() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .route("/health", web::get().to(health_handler)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
    }
}
