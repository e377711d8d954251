use actix_web::web::Bytes;
use actix_web::ResponseError;
use shared::{BackendKind, InferenceResponse, SourceKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::auth::models::Claims;
use crate::error::PipelineError;
use crate::imaging::ImageAcquirer;
use crate::inference::dispatcher::WorkerState;
use crate::inference::prune::prune;
use crate::inference::Dispatcher;
use crate::quota::{QuotaDecision, QuotaTracker};

/// Where the image for a request comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Upload(Bytes),
    Url(String),
}

impl ImageSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            ImageSource::Upload(_) => SourceKind::Upload,
            ImageSource::Url(_) => SourceKind::Url,
        }
    }
}

/// Last stage a request reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Authenticated,
    Authorized,
    ImageReady,
    Inferred,
    Normalized,
    Responded,
}

struct RequestTrace {
    id: Uuid,
    kind: BackendKind,
    stage: Stage,
    started: Instant,
}

impl RequestTrace {
    fn new(kind: BackendKind, source: SourceKind) -> Self {
        let id = Uuid::new_v4();
        log::debug!("[{}] received {} request for {}", id, source, kind);
        Self {
            id,
            kind,
            stage: Stage::Received,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, stage: Stage) {
        log::debug!("[{}] {:?} -> {:?}", self.id, self.stage, stage);
        self.stage = stage;
    }

    fn finish<T>(&self, result: Result<T, PipelineError>) -> Result<T, PipelineError> {
        match &result {
            Ok(_) => log::info!(
                "[{}] {} answered in {:?}",
                self.id,
                self.kind,
                self.started.elapsed()
            ),
            Err(err) => self.failed(err),
        }
        result
    }

    fn failed(&self, err: &PipelineError) {
        if err.status_code().is_server_error() {
            log::error!(
                "[{}] {} request failed after {:?}: {} ({})",
                self.id,
                self.kind,
                self.stage,
                err,
                err.kind()
            );
        } else {
            log::warn!(
                "[{}] {} request rejected after {:?}: {} ({})",
                self.id,
                self.kind,
                self.stage,
                err,
                err.kind()
            );
        }
    }
}

/// Charges quota, loads the image, runs the model and cleans up its answer,
/// in that order. The first failing step ends the request. Callers arrive
/// already authenticated.
pub struct InferencePipeline {
    quota: Arc<QuotaTracker>,
    acquirer: ImageAcquirer,
    dispatcher: Arc<Dispatcher>,
}

impl InferencePipeline {
    pub fn new(
        quota: Arc<QuotaTracker>,
        acquirer: ImageAcquirer,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            quota,
            acquirer,
            dispatcher,
        }
    }

    pub fn max_image_bytes(&self) -> usize {
        self.acquirer.max_bytes()
    }

    pub fn backend_states(&self) -> HashMap<BackendKind, WorkerState> {
        self.dispatcher.states()
    }

    /// Runs one request for a caller whose token has already been verified.
    pub async fn run(
        &self,
        claims: &Claims,
        kind: BackendKind,
        source: ImageSource,
    ) -> Result<InferenceResponse, PipelineError> {
        let mut trace = RequestTrace::new(kind, source.kind());
        trace.advance(Stage::Authenticated);
        let result = self.execute(&mut trace, claims, kind, source).await;
        trace.finish(result)
    }

    async fn execute(
        &self,
        trace: &mut RequestTrace,
        claims: &Claims,
        kind: BackendKind,
        source: ImageSource,
    ) -> Result<InferenceResponse, PipelineError> {
        // Charged before the image is looked at; a bad image still costs a request.
        if let QuotaDecision::Deny { limit } = self.quota.consume(&claims.sub, claims.role) {
            return Err(PipelineError::QuotaExceeded { limit });
        }
        trace.advance(Stage::Authorized);

        let source_kind = source.kind();
        let (image, image_url) = match source {
            ImageSource::Upload(bytes) => (self.acquirer.from_upload(&bytes)?, None),
            ImageSource::Url(url) => {
                let image = self.acquirer.from_url(&url).await?;
                (image, Some(url))
            }
        };
        trace.advance(Stage::ImageReady);

        let raw = self.dispatcher.infer(kind, image).await?;
        trace.advance(Stage::Inferred);

        let description = prune(&raw);
        trace.advance(Stage::Normalized);

        let response = InferenceResponse {
            description,
            used_model: kind,
            source: source_kind,
            image_url,
        };
        trace.advance(Stage::Responded);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::JwtService;
    use crate::auth::models::Role;
    use crate::imaging::acquirer::testing::{rgba_png, serve_once};
    use crate::inference::testing::ScriptedBackend;
    use crate::inference::BackendRegistry;
    use shared::QuotaValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        pipeline: InferencePipeline,
        quota: Arc<QuotaTracker>,
        jwt_service: JwtService,
        calls: Arc<AtomicUsize>,
    }

    fn harness(limit: u32, backend: ScriptedBackend) -> Harness {
        let calls = backend.calls.clone();
        let dispatcher =
            Dispatcher::new(BackendRegistry::new().register(Box::new(backend))).unwrap();
        let jwt_service = JwtService::new("pipeline-secret", 30);
        let quota = Arc::new(QuotaTracker::new(limit));
        let acquirer = ImageAcquirer::new(reqwest::Client::new(), 1024 * 1024);
        Harness {
            pipeline: InferencePipeline::new(
                quota.clone(),
                acquirer,
                Arc::new(dispatcher),
            ),
            quota,
            jwt_service,
            calls,
        }
    }

    fn claims(h: &Harness, subject: &str) -> Claims {
        let token = h.jwt_service.generate_token(subject, Role::User).unwrap();
        h.jwt_service.verify_token(&token).unwrap()
    }

    fn used(h: &Harness, subject: &str) -> QuotaValue {
        h.quota.peek(subject, Role::User).used
    }

    fn upload() -> ImageSource {
        ImageSource::Upload(Bytes::from(rgba_png(6, 4)))
    }

    #[actix_web::test]
    async fn success_prunes_and_charges_one_request() {
        let h = harness(
            5,
            ScriptedBackend::new(BackendKind::ChartInstruct, "Grafik naik tajam. Lalu"),
        );
        let claims = claims(&h, "rina@example.com");

        let response = h
            .pipeline
            .run(&claims, BackendKind::ChartInstruct, upload())
            .await
            .unwrap();

        assert_eq!(response.description, "Grafik naik tajam.");
        assert_eq!(response.used_model, BackendKind::ChartInstruct);
        assert_eq!(response.source, SourceKind::Upload);
        assert_eq!(response.image_url, None);
        assert_eq!(used(&h, "rina@example.com"), QuotaValue::Count(1));
    }

    #[actix_web::test]
    async fn url_success_echoes_the_image_url() {
        let h = harness(5, ScriptedBackend::new(BackendKind::UniChart, "Penjualan turun, lalu"));
        let claims = claims(&h, "rina@example.com");
        let url = serve_once("200 OK", rgba_png(5, 5));

        let response = h
            .pipeline
            .run(&claims, BackendKind::UniChart, ImageSource::Url(url.clone()))
            .await
            .unwrap();

        assert_eq!(response.description, "Penjualan turun");
        assert_eq!(response.used_model, BackendKind::UniChart);
        assert_eq!(response.source, SourceKind::Url);
        assert_eq!(response.image_url, Some(url));
        assert_eq!(used(&h, "rina@example.com"), QuotaValue::Count(1));
    }

    #[actix_web::test]
    async fn quota_denial_never_reaches_the_backend() {
        let h = harness(1, ScriptedBackend::new(BackendKind::UniChart, "ok."));
        let claims = claims(&h, "budi@example.com");

        h.pipeline
            .run(&claims, BackendKind::UniChart, upload())
            .await
            .unwrap();
        let err = h
            .pipeline
            .run(&claims, BackendKind::UniChart, upload())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::QuotaExceeded { limit: 1 }));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(used(&h, "budi@example.com"), QuotaValue::Count(1));
    }

    #[actix_web::test]
    async fn invalid_image_still_costs_a_request() {
        let h = harness(5, ScriptedBackend::new(BackendKind::UniChart, "ok."));
        let claims = claims(&h, "sari@example.com");

        let err = h
            .pipeline
            .run(
                &claims,
                BackendKind::UniChart,
                ImageSource::Upload(Bytes::from_static(b"not an image")),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidImage(_)));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert_eq!(used(&h, "sari@example.com"), QuotaValue::Count(1));
    }

    #[actix_web::test]
    async fn unfetchable_url_is_a_fetch_failure() {
        let h = harness(5, ScriptedBackend::new(BackendKind::UniChart, "ok."));
        let claims = claims(&h, "dewi@example.com");

        let err = h
            .pipeline
            .run(
                &claims,
                BackendKind::UniChart,
                ImageSource::Url("ftp://example.com/chart.png".to_string()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::FetchFailed(_)));
        assert_eq!(err.status_code().as_u16(), 502);
    }

    #[actix_web::test]
    async fn malformed_backend_output_is_reported() {
        let h = harness(
            5,
            ScriptedBackend::malformed(BackendKind::UniChart, "no <s_answer> marker"),
        );
        let claims = claims(&h, "agus@example.com");

        let err = h
            .pipeline
            .run(&claims, BackendKind::UniChart, upload())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MalformedBackendOutput(_)));
        assert_eq!(err.status_code().as_u16(), 500);
    }

    #[actix_web::test]
    async fn unloaded_backend_is_unavailable() {
        let h = harness(5, ScriptedBackend::new(BackendKind::UniChart, "ok."));
        let claims = claims(&h, "wati@example.com");

        let err = h
            .pipeline
            .run(&claims, BackendKind::ChartInstruct, upload())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::BackendUnavailable(_)));
    }

    #[actix_web::test]
    async fn stages_stop_at_the_failing_step() {
        let h = harness(5, ScriptedBackend::new(BackendKind::UniChart, "ok."));
        let claims = claims(&h, "joko@example.com");

        let mut trace = RequestTrace::new(BackendKind::UniChart, SourceKind::Upload);
        let result = h
            .pipeline
            .execute(
                &mut trace,
                &claims,
                BackendKind::UniChart,
                ImageSource::Upload(Bytes::from_static(b"junk")),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(trace.stage, Stage::Authorized);

        let mut trace = RequestTrace::new(BackendKind::UniChart, SourceKind::Upload);
        h.pipeline
            .execute(&mut trace, &claims, BackendKind::UniChart, upload())
            .await
            .unwrap();
        assert_eq!(trace.stage, Stage::Responded);
    }

    #[actix_web::test]
    async fn admins_are_never_charged() {
        let h = harness(1, ScriptedBackend::new(BackendKind::UniChart, "Stabil, lalu"));
        let token = h
            .jwt_service
            .generate_token("admin@example.com", Role::Admin)
            .unwrap();
        let claims = h.jwt_service.verify_token(&token).unwrap();

        for _ in 0..3 {
            let response = h
                .pipeline
                .run(&claims, BackendKind::UniChart, upload())
                .await
                .unwrap();
            assert_eq!(response.description, "Stabil");
        }
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exposes_limits_and_backend_states() {
        let h = harness(5, ScriptedBackend::new(BackendKind::UniChart, "ok."));
        assert_eq!(h.pipeline.max_image_bytes(), 1024 * 1024);
        assert_eq!(
            h.pipeline.backend_states().get(&BackendKind::UniChart),
            Some(&WorkerState::Idle)
        );
    }
}
