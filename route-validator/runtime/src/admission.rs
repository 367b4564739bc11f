use crate::{
    config::ConfigStore,
    core::{evaluate, Allowed, Decision, Kind, Operation},
    lookup::NamespaceLookup,
    metrics::AdmissionMetrics,
};
use anyhow::{anyhow, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{core::DynamicObject, ResourceExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

const HEALTHZ_PATH: &str = "/healthz";
const VALIDATE_PATH: &str = "/validate";

/// Serves admission reviews for ingress-like resources.
#[derive(Clone)]
pub struct Admission {
    config: Arc<ConfigStore>,
    namespaces: Arc<dyn NamespaceLookup>,
    metrics: AdmissionMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl<B> tower::Service<Request<B>> for Admission
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), uri = %req.uri());
        match (req.method(), req.uri().path()) {
            (&http::Method::GET, HEALTHZ_PATH) => return Box::pin(future::ok(healthz())),
            (&http::Method::POST, "/" | VALIDATE_PATH) => {}
            _ => return Box::pin(future::ok(not_found())),
        }

        let admission = self.clone();
        Box::pin(async move {
            let bytes = req
                .into_body()
                .collect()
                .await
                .map_err(|e| Error::Request(e.into()))?
                .to_bytes();
            let review: AdmissionReview = match serde_json::from_slice(&bytes) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    let rsp = match request_without_objects(&bytes) {
                        Some(req) => admission.reject_undecodable(req, error),
                        None => AdmissionResponse::invalid(error),
                    };
                    return json_response(rsp.into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(
        config: Arc<ConfigStore>,
        namespaces: Arc<dyn NamespaceLookup>,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            config,
            namespaces,
            metrics,
        }
    }

    async fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        let Some((kind, operation)) = self.gate(&req) else {
            return rsp;
        };

        let ns = req.namespace.clone().unwrap_or_default();
        let name = req.name.clone();
        match self.decide(kind, operation, req).await {
            Ok(Decision::Allow(Allowed::InvalidSelector(error))) => {
                warn!(%error, %ns, %name, %kind, "Invalid namespaceSelector; allowing");
                self.metrics.record(Some(kind), true);
                rsp
            }
            Ok(Decision::Allow(reason)) => {
                debug!(?reason, %ns, %name, %kind, "Allowed");
                self.metrics.record(Some(kind), true);
                rsp
            }
            Ok(Decision::Deny(violation)) => {
                info!(%violation, %ns, %name, %kind, "Denied");
                self.metrics.record(Some(kind), false);
                rsp.deny(violation)
            }
            Err(error) => {
                info!(%error, %ns, %name, %kind, "Denied");
                self.metrics.record(Some(kind), false);
                rsp.deny(error)
            }
        }
    }

    /// Answers a review whose object could not be decoded. The request's uid
    /// and review version are kept so that the response is still a decision.
    fn reject_undecodable(
        &self,
        req: AdmissionRequest,
        error: serde_json::Error,
    ) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        let Some((kind, _)) = self.gate(&req) else {
            return rsp;
        };
        info!(%error, ns = ?req.namespace, name = %req.name, %kind, "Denied");
        self.metrics.record(Some(kind), false);
        rsp.deny(format!("could not decode {kind} object: {error}"))
    }

    /// Returns the kind and operation of a request the policy governs.
    /// Requests it does not govern are recorded as allowed.
    fn gate(&self, req: &AdmissionRequest) -> Option<(Kind, Operation)> {
        let Some(kind) = Kind::from_group_kind(&req.kind.group, &req.kind.kind) else {
            debug!(
                group = %req.kind.group,
                kind = %req.kind.kind,
                "Skipping unsupported resource kind"
            );
            self.metrics.record(None, true);
            return None;
        };

        let operation = match req.operation {
            kube::core::admission::Operation::Create => Operation::Create,
            kube::core::admission::Operation::Update => Operation::Update,
            kube::core::admission::Operation::Delete => Operation::Delete,
            kube::core::admission::Operation::Connect => Operation::Connect,
        };
        if !operation.is_gated() {
            debug!(%kind, name = %req.name, ?operation, "Skipping ungated operation");
            self.metrics.record(Some(kind), true);
            return None;
        }

        Some((kind, operation))
    }

    /// Decodes the object, resolves its namespace, and evaluates it against
    /// the current policy. Any failure to do so denies the request.
    async fn decide(
        &self,
        kind: Kind,
        operation: Operation,
        req: AdmissionRequest,
    ) -> Result<Decision> {
        let obj = req
            .object
            .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

        let name = if req.name.is_empty() {
            obj.name_any()
        } else {
            req.name
        };
        let ns = match req.namespace.or_else(|| obj.namespace()) {
            Some(ns) if !ns.is_empty() => ns,
            _ => return Err(anyhow!("{kind} {name} has no namespace")),
        };

        let target = serde_json::to_value(&obj)
            .and_then(|value| kind.adapter().decode(name, value))
            .map_err(|error| anyhow!("could not decode {kind} object: {error}"))?;

        let namespace = self
            .namespaces
            .get_namespace(&ns)
            .await
            .map_err(|error| anyhow!("could not get namespace: {error}"))?;

        let config = self.config.get();
        Ok(evaluate(operation, &target, &namespace, &config))
    }
}

/// Recovers the request envelope of a review whose objects do not decode.
/// Returns `None` if the body is not a review at all.
fn request_without_objects(bytes: &[u8]) -> Option<AdmissionRequest> {
    let mut review = serde_json::from_slice::<serde_json::Value>(bytes).ok()?;
    let req = review.get_mut("request")?.as_object_mut()?;
    req.remove("object");
    req.remove("oldObject");
    serde_json::from_value::<AdmissionReview>(review)
        .ok()?
        .try_into()
        .ok()
}

fn healthz() -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("ok\n"))
        .expect("healthz response must be valid")
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Body::default())
        .expect("not found response must be valid")
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
