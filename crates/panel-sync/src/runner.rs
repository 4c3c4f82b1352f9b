//! Candidate endpoint runner
//!
//! One combinator drives every panel call: resolve the candidates for an
//! operation, try them in order, classify each failure, and stop at the first
//! candidate whose response the caller accepts.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::endpoints::{parse_schema_routes, Endpoint, EndpointResolver, Operation, SCHEMA_DOCUMENTS};
use crate::error::{Result, SyncError, TransientReason};
use crate::observer::{preview, SyncEvent, SyncObserver};
use crate::transport::{ApiRequest, ApiResponse, HttpMethod, RequestBody, Transport};

/// What the runner does after a candidate fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    NextCandidate,
    Stop,
}

fn disposition(operation: &Operation, error: &SyncError) -> Disposition {
    match error {
        SyncError::AuthExpired | SyncError::Conflict(_) => Disposition::Stop,
        SyncError::PermanentEndpointFailure { .. } if operation.is_mutating() => Disposition::Stop,
        _ => Disposition::NextCandidate,
    }
}

fn is_network_failure(error: &SyncError) -> bool {
    matches!(error, SyncError::TransientEndpoint { reason, .. } if reason.is_network())
}

/// Map a non-success status to the error taxonomy.
pub fn classify_status(endpoint: &Endpoint, response: &ApiResponse) -> SyncError {
    let name = endpoint.to_string();
    match response.status {
        404 => SyncError::TransientEndpoint {
            endpoint: name,
            reason: TransientReason::NotFound,
        },
        401 => SyncError::AuthExpired,
        409 => SyncError::Conflict(preview(&response.body)),
        _ if response.body.to_lowercase().contains("already exists") => SyncError::Conflict(preview(&response.body)),
        405 => SyncError::TransientEndpoint {
            endpoint: name,
            reason: TransientReason::MethodNotAllowed,
        },
        status if status >= 500 => SyncError::TransientEndpoint {
            endpoint: name,
            reason: TransientReason::ServerError(status),
        },
        status => SyncError::PermanentEndpointFailure {
            endpoint: name,
            status,
            body: preview(&response.body),
        },
    }
}

pub struct EndpointRunner {
    transport: Arc<dyn Transport>,
    observer: Arc<dyn SyncObserver>,
    resolver: OnceCell<EndpointResolver>,
}

impl EndpointRunner {
    pub fn new(transport: Arc<dyn Transport>, observer: Arc<dyn SyncObserver>) -> Self {
        Self {
            transport,
            observer,
            resolver: OnceCell::new(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn observer(&self) -> &Arc<dyn SyncObserver> {
        &self.observer
    }

    /// Probe the panel's schema at most once per session.
    async fn resolver(&self) -> &EndpointResolver {
        self.resolver
            .get_or_init(|| async { EndpointResolver::with_discovered(self.probe_schema().await) })
            .await
    }

    async fn probe_schema(&self) -> Vec<Endpoint> {
        for document in SCHEMA_DOCUMENTS {
            let response = match self.transport.execute(ApiRequest::get(document)).await {
                Ok(response) if response.is_success() => response,
                _ => continue,
            };
            if let Some(routes) = parse_schema_routes(&response.body, "user") {
                self.observer.on_event(&SyncEvent::SchemaProbed {
                    document: document.to_string(),
                    routes: routes.len(),
                });
                if !routes.is_empty() {
                    return routes;
                }
            }
        }
        Vec::new()
    }

    /// Send a single request outside any candidate list.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.transport.execute(request).await
    }

    /// Try every candidate for `operation` until `accept` takes a response.
    ///
    /// `body` is sent with every non-GET candidate. `accept` sees only 2xx
    /// responses and may reject them with [`SyncError::UnrecognizedShape`] or
    /// [`SyncError::Rejected`] to move on to the next candidate.
    pub async fn run<T, F>(&self, operation: &Operation, body: RequestBody, mut accept: F) -> Result<T>
    where
        F: FnMut(&Endpoint, &ApiResponse) -> Result<T>,
    {
        let candidates = match operation.probe_subject() {
            Some(_) => self.resolver().await.resolve(operation),
            None => EndpointResolver::static_candidates(operation),
        };

        let mut tried = HashSet::new();
        let mut attempts = 0usize;
        let mut network_failures = 0usize;
        let mut last_error = None;

        for endpoint in candidates {
            if !tried.insert(endpoint.clone()) {
                continue;
            }
            attempts += 1;
            self.observer.on_event(&SyncEvent::EndpointAttempt {
                operation: operation.name().to_string(),
                endpoint: endpoint.to_string(),
            });

            let request_body = match endpoint.method {
                HttpMethod::Get => RequestBody::None,
                _ => body.clone(),
            };
            let request = ApiRequest::new(endpoint.method, endpoint.path.clone()).with_body(request_body);

            let outcome = match self.transport.execute(request).await {
                Ok(response) if response.is_success() => accept(&endpoint, &response),
                Ok(response) => Err(classify_status(&endpoint, &response)),
                Err(error) => Err(error),
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if let SyncError::UnrecognizedShape { endpoint, body } = &error {
                self.observer.on_event(&SyncEvent::ShapeUnrecognized {
                    endpoint: endpoint.clone(),
                    preview: preview(body),
                });
            }
            self.observer.on_event(&SyncEvent::EndpointFailed {
                operation: operation.name().to_string(),
                endpoint: endpoint.to_string(),
                error: error.to_string(),
            });

            if disposition(operation, &error) == Disposition::Stop {
                return Err(error);
            }
            if is_network_failure(&error) {
                network_failures += 1;
            }
            last_error = Some(error);
        }

        let Some(last) = last_error else {
            return Err(SyncError::InvalidConfiguration(format!(
                "no candidate endpoints for {}",
                operation
            )));
        };

        if network_failures == attempts {
            return Err(SyncError::PanelUnreachable(format!(
                "{} failed on all {} candidates: {}",
                operation, attempts, last
            )));
        }

        Err(SyncError::EndpointsExhausted {
            operation: operation.name().to_string(),
            attempts,
            last: Box::new(last),
        })
    }
}
