//! Application state
//!
//! Built once at startup: DB pool, repositories, caches, rate limiter, job
//! registry, model clients and the services wired from them. Cloning is
//! cheap (everything is Arc or pool-backed).

use crate::cache::CacheRegistry;
use crate::config::Config;
use crate::db::{
    self, AuditLogRepository, MappingRepository, SourceCodeRepository, TargetCodeRepository,
};
use crate::ratelimit::RateLimiter;
use crate::services::adjudicator::{Adjudicator, GeminiAdjudicator};
use crate::services::embedding::{CachedEmbedder, Embedder, GeminiEmbedder};
use crate::services::retriever::CandidateRetriever;
use crate::services::{
    AuditService, FhirService, JobRegistry, MappingPipeline, TranslateService, WhoApiProbe,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Overrides for tests and specialized binaries.
pub struct AppStateOptions {
    pub run_migrations: bool,
    /// Lazy pools never touch the wire until a query runs; unit-style
    /// integration tests that exercise only the HTTP surface rely on this.
    pub lazy_pool: bool,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub adjudicator: Option<Arc<dyn Adjudicator>>,
    pub rate_limiter: Option<RateLimiter>,
}

impl Default for AppStateOptions {
    fn default() -> Self {
        Self {
            run_migrations: true,
            lazy_pool: false,
            embedder: None,
            adjudicator: None,
            rate_limiter: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db_pool: PgPool,
    pub sources: SourceCodeRepository,
    pub targets: TargetCodeRepository,
    pub mappings: MappingRepository,
    pub caches: Arc<CacheRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub jobs: Arc<JobRegistry>,
    pub translate: Arc<TranslateService>,
    pub fhir: Arc<FhirService>,
    pub audit: AuditService,
    pub probe: Arc<WhoApiProbe>,
    pub embedder: Arc<dyn Embedder>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let run_migrations = config.database.run_migrations;
        Self::new_with_options(
            config,
            AppStateOptions {
                run_migrations,
                ..AppStateOptions::default()
            },
        )
        .await
    }

    pub async fn new_with_options(
        config: Config,
        options: AppStateOptions,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let db_pool = if options.lazy_pool {
            PgPoolOptions::new()
                .max_connections(config.database.pool_max_size)
                .connect_lazy(&config.database.url)?
        } else {
            db::create_pool(&config.database).await?
        };

        if options.run_migrations {
            db::run_migrations(&db_pool).await?;
            tracing::info!("Database migrations applied");
        }

        let sources = SourceCodeRepository::new(db_pool.clone());
        let targets = TargetCodeRepository::new(db_pool.clone());
        let mappings = MappingRepository::new(db_pool.clone());
        let audit_logs = AuditLogRepository::new(db_pool.clone());

        let caches = Arc::new(CacheRegistry::new(&config.cache));

        let base_embedder: Arc<dyn Embedder> = options
            .embedder
            .unwrap_or_else(|| Arc::new(GeminiEmbedder::new(&config.models)));
        let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
            base_embedder.clone(),
            Arc::clone(&caches),
        ));
        let adjudicator: Arc<dyn Adjudicator> = options
            .adjudicator
            .unwrap_or_else(|| Arc::new(GeminiAdjudicator::new(&config.models)));

        let retriever = CandidateRetriever::new(
            Arc::new(targets.clone()),
            config.pipeline.max_candidates,
            config.pipeline.min_vector_similarity,
        );
        let pipeline = MappingPipeline::new(
            Arc::clone(&embedder),
            adjudicator,
            retriever,
            config.pipeline.clone(),
        );

        let translate = Arc::new(TranslateService::new(
            sources.clone(),
            mappings.clone(),
            Arc::clone(&caches),
            pipeline,
            config.pipeline.request_deadline_ms,
        ));

        let fhir = Arc::new(FhirService::new(
            sources.clone(),
            targets.clone(),
            Arc::clone(&translate),
            config.server.base_url.clone(),
        ));

        let rate_limiter = Arc::new(options.rate_limiter.unwrap_or_default());
        let audit = AuditService::new(audit_logs);
        let probe = Arc::new(WhoApiProbe::new(&config.upstream));

        let jobs = JobRegistry::new(config.jobs.clone());
        Arc::clone(&jobs)
            .start(Arc::clone(&translate) as Arc<dyn crate::services::jobs::JobItemRunner>);

        // Periodic sweep of idle rate-limiter buckets.
        {
            let limiter = Arc::clone(&rate_limiter);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tick.tick().await;
                    limiter.sweep();
                }
            });
        }

        Ok(Self {
            config,
            db_pool,
            sources,
            targets,
            mappings,
            caches,
            rate_limiter,
            jobs,
            translate,
            fhir,
            audit,
            probe,
            embedder,
        })
    }
}
