//! Warm-up probes for the upstream services.
//!
//! Every backend in the chain runs on a serverless host and exposes a cheap
//! `/health` route; pinging them before the user submits an image pulls the
//! services out of cold start, which is the main source of timeouts.

use serde::Serialize;
use tracing::info;

use crate::config::join_url;
use crate::http::{ScreeningClient, Transport};

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    /// Which service was probed: "face", "age", or "autism".
    pub service: String,
    pub healthy: bool,
    /// Status line or error text for display/logging.
    pub detail: String,
}

/// Probe `/health` on each configured base. Never fails as a whole; an
/// unreachable service is just reported unhealthy.
pub async fn check_services<T: Transport>(client: &ScreeningClient<T>) -> Vec<ServiceHealth> {
    let config = client.config();
    let targets = [
        ("face", config.face_base_url.as_str()),
        ("age", config.age_base_url.as_str()),
        ("autism", config.autism_base_url.as_str()),
    ];

    let mut report = Vec::with_capacity(targets.len());
    for (service, base) in targets {
        let url = join_url(base, "/health");
        let health = match client.transport().get(&url, config.health_timeout()).await {
            Ok(response) if response.is_success() => ServiceHealth {
                service: service.to_string(),
                healthy: true,
                detail: format!("HTTP {}", response.status),
            },
            Ok(response) => ServiceHealth {
                service: service.to_string(),
                healthy: false,
                detail: format!("HTTP {}", response.status),
            },
            Err(e) => ServiceHealth {
                service: service.to_string(),
                healthy: false,
                detail: e.to_string(),
            },
        };
        info!(
            "Health probe {}: {} ({})",
            health.service,
            if health.healthy { "healthy" } else { "unhealthy" },
            health.detail
        );
        report.push(health);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::http::testing::{ok, status, MockTransport};
    use crate::http::TransportError;

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.face_base_url = "http://face.test".to_string();
        config.age_base_url = "http://age.test".to_string();
        config.autism_base_url = "http://autism.test".to_string();
        config
    }

    #[tokio::test]
    async fn reports_each_service_in_order() {
        let transport = MockTransport::new(vec![
            ok(r#"{"status":"healthy"}"#),
            status(503, ""),
            Err(TransportError::Connect("refused".to_string())),
        ]);
        let client = ScreeningClient::with_transport(config(), transport);
        let report = check_services(&client).await;

        assert_eq!(report.len(), 3);
        assert_eq!(report[0].service, "face");
        assert!(report[0].healthy);
        assert_eq!(report[1].service, "age");
        assert!(!report[1].healthy);
        assert_eq!(report[1].detail, "HTTP 503");
        assert_eq!(report[2].service, "autism");
        assert!(!report[2].healthy);
        assert!(report[2].detail.contains("refused"));

        let calls = client.transport().calls();
        assert_eq!(
            calls,
            vec![
                "http://face.test/health".to_string(),
                "http://age.test/health".to_string(),
                "http://autism.test/health".to_string(),
            ]
        );
    }
}
