use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::metrics::ACTIVE_GAMES;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub services: HashMap<String, ServiceHealth>,
    pub active_trivia_games: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceHealth {
    pub status: String,
    pub message: Option<String>,
}

impl ServiceHealth {
    fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            message: Some(message.into()),
        }
    }

    fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: "unhealthy".to_string(),
            message: Some(message.into()),
        }
    }
}

/// Liveness flags flipped by the event handler.
pub struct HealthChecker {
    discord_connected: AtomicBool,
    grounding_enabled: bool,
    grounding_loaded: AtomicBool,
}

impl HealthChecker {
    pub fn new(grounding_enabled: bool) -> Self {
        Self {
            discord_connected: AtomicBool::new(false),
            grounding_enabled,
            grounding_loaded: AtomicBool::new(false),
        }
    }

    pub fn set_discord_connected(&self, connected: bool) {
        self.discord_connected.store(connected, Ordering::Relaxed);
    }

    pub fn set_grounding_loaded(&self, loaded: bool) {
        self.grounding_loaded.store(loaded, Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        let mut services = HashMap::new();

        let discord = if self.discord_connected.load(Ordering::Relaxed) {
            ServiceHealth::healthy("Gateway connected")
        } else {
            ServiceHealth::unhealthy("Gateway not connected")
        };
        services.insert("discord".to_string(), discord);

        let grounding = match (self.grounding_enabled, self.grounding_loaded.load(Ordering::Relaxed)) {
            (false, _) => ServiceHealth::healthy("Grounding disabled"),
            (true, true) => ServiceHealth::healthy("Grounding data loaded"),
            (true, false) => ServiceHealth::unhealthy("Grounding data not loaded"),
        };
        services.insert("grounding".to_string(), grounding);

        let all_healthy = services.values().all(|service| service.status == "healthy");
        let overall_status = if all_healthy { "healthy" } else { "degraded" };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            services,
            active_trivia_games: ACTIVE_GAMES.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_until_gateway_connects() {
        let checker = HealthChecker::new(false);
        assert_eq!(checker.status().status, "degraded");
        checker.set_discord_connected(true);
        assert_eq!(checker.status().status, "healthy");
    }

    #[test]
    fn disconnect_is_reported() {
        let checker = HealthChecker::new(false);
        checker.set_discord_connected(true);
        checker.set_discord_connected(false);

        let status = checker.status();
        assert_eq!(status.status, "degraded");
        assert_eq!(status.services["discord"].status, "unhealthy");
        assert_eq!(status.services["discord"].message.as_deref(), Some("Gateway not connected"));
    }

    #[test]
    fn enabled_grounding_must_be_loaded() {
        let checker = HealthChecker::new(true);
        checker.set_discord_connected(true);
        assert_eq!(checker.status().status, "degraded");
        checker.set_grounding_loaded(true);
        assert_eq!(checker.status().services["grounding"].status, "healthy");
    }
}
