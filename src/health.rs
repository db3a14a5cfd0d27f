use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::db::Database;
use crate::faces::EmbeddingExtractor;

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub ok: bool,
    pub backend: &'static str,
    pub embeddings: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub version: &'static str,
    pub database: DatabaseHealth,
    pub model_ready: bool,
    pub uptime_secs: u64,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn collect(db: &Database, extractor: &dyn EmbeddingExtractor, started_at: Instant) -> Self {
        let database = match db.ping().and_then(|_| db.total_count()) {
            Ok(count) => DatabaseHealth {
                ok: true,
                backend: db.backend_name(),
                embeddings: Some(count),
                error: None,
            },
            Err(e) => {
                tracing::error!(error = %e, "Database health check failed");
                DatabaseHealth {
                    ok: false,
                    backend: db.backend_name(),
                    embeddings: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let model_ready = extractor.is_ready();

        Self {
            healthy: database.ok && model_ready,
            version: env!("CARGO_PKG_VERSION"),
            database,
            model_ready,
            uptime_secs: started_at.elapsed().as_secs(),
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FacesConfig;
    use crate::faces::OnnxExtractor;

    #[test]
    fn test_unloaded_model_is_unhealthy() {
        let db = Database::in_memory(8).unwrap();
        let extractor = OnnxExtractor::unloaded(&FacesConfig::default());

        let report = HealthReport::collect(&db, &extractor, Instant::now());
        assert!(report.database.ok);
        assert_eq!(report.database.embeddings, Some(0));
        assert_eq!(report.database.backend, "sqlite");
        assert!(!report.model_ready);
        assert!(!report.healthy);
    }
}
