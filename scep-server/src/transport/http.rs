//! HTTP transport.
//!
//! ```text
//! GET  /scep?operation=GetCACert                 -> application/x-x509-ca-cert
//! GET  /scep?operation=GetCACaps                 -> text/plain
//! GET  /scep?operation=PKIOperation&message=b64  -> application/pkix-cert
//! POST /scep?operation=PKIOperation  (DER body)  -> application/pkix-cert
//! ```
//!
//! Malformed requests map to 400, policy rejections to 403 and signing
//! failures to 500.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::service::{EnrollmentService, ServiceError};

const CONTENT_TYPE_CA_CERT: &str = "application/x-x509-ca-cert";
const CONTENT_TYPE_PKI: &str = "application/pkix-cert";
const CONTENT_TYPE_TEXT: &str = "text/plain";

type SharedService = Arc<dyn EnrollmentService>;

#[derive(Debug, Default, Deserialize)]
struct ScepQuery {
    operation: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    GetCaCert,
    GetCaCaps,
    PkiOperation,
}

impl Operation {
    fn parse(name: Option<&str>) -> Option<Self> {
        match name? {
            "GetCACert" => Some(Self::GetCaCert),
            "GetCACaps" => Some(Self::GetCaCaps),
            "PKIOperation" => Some(Self::PkiOperation),
            _ => None,
        }
    }
}

/// Build the SCEP router around `service`.
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/scep", get(handle_get).post(handle_post))
        .route_layer(middleware::from_fn(log_endpoint))
        .with_state(service)
}

async fn handle_get(
    State(service): State<SharedService>,
    Query(query): Query<ScepQuery>,
) -> Response {
    match Operation::parse(query.operation.as_deref()) {
        Some(Operation::GetCaCert) => respond(
            call(service, |s| s.ca_certificate()).await,
            CONTENT_TYPE_CA_CERT,
        ),
        Some(Operation::GetCaCaps) => respond(
            call(service, |s| s.ca_capabilities().map(String::into_bytes)).await,
            CONTENT_TYPE_TEXT,
        ),
        Some(Operation::PkiOperation) => {
            let message = match decode_message(query.message.as_deref()) {
                Ok(message) => message,
                Err(e) => return error_response(&e),
            };
            respond(
                call(service, move |s| s.pki_operation(&message)).await,
                CONTENT_TYPE_PKI,
            )
        }
        None => unknown_operation(query.operation.as_deref()),
    }
}

async fn handle_post(
    State(service): State<SharedService>,
    Query(query): Query<ScepQuery>,
    body: Bytes,
) -> Response {
    match Operation::parse(query.operation.as_deref()) {
        Some(Operation::PkiOperation) => respond(
            call(service, move |s| s.pki_operation(&body)).await,
            CONTENT_TYPE_PKI,
        ),
        _ => unknown_operation(query.operation.as_deref()),
    }
}

/// Run a service call on the blocking pool; signing is CPU-bound.
async fn call<T, F>(service: SharedService, f: F) -> Result<T, ServiceError>
where
    F: FnOnce(&dyn EnrollmentService) -> Result<T, ServiceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(service.as_ref()))
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?
}

/// Decode the base64 `message` parameter of a GET PKIOperation.
fn decode_message(message: Option<&str>) -> Result<Vec<u8>, ServiceError> {
    let message = message
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ServiceError::BadRequest("missing message parameter".to_string()))?;
    // Form decoding turns an unescaped '+' into a space
    let cleaned: String = message
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| if c == ' ' { '+' } else { c })
        .collect();
    STANDARD
        .decode(cleaned)
        .map_err(|e| ServiceError::BadRequest(format!("message is not base64: {}", e)))
}

fn respond(result: Result<Vec<u8>, ServiceError>, content_type: &'static str) -> Response {
    match result {
        Ok(body) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => error_response(&e),
    }
}

fn status_for(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::Sign(e) if e.is_rejection() => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &ServiceError) -> Response {
    (status_for(error), error.to_string()).into_response()
}

fn unknown_operation(operation: Option<&str>) -> Response {
    let message = match operation {
        Some(op) => format!("unknown operation {:?}", op),
        None => "missing operation parameter".to_string(),
    };
    (StatusCode::BAD_REQUEST, message).into_response()
}

/// Endpoint-level request logging.
async fn log_endpoint(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let operation = logged_operation(request.uri());
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        component = "http",
        method = %method,
        operation = %operation,
        status = response.status().as_u16(),
        took_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// The operation as the handlers see it, decoded the same way.
fn logged_operation(uri: &Uri) -> String {
    Query::<ScepQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.operation)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::{csr_der, identity};
    use crate::service::{compose, signer_chain};
    use axum::body::Body;
    use scep_ca::SignerOptions;
    use tower::ServiceExt;

    fn app(challenge: &str) -> (Router, Vec<u8>) {
        let identity = identity();
        let chain = signer_chain(identity.clone(), SignerOptions::default(), challenge, None);
        let service = compose(&identity, chain).unwrap();
        (
            router(Arc::new(service)),
            identity.certificate_der().unwrap(),
        )
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, body.to_vec())
    }

    fn get(uri: &str) -> Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_ca_cert() {
        let (router, ca_der) = app("");
        let (status, content_type, body) = send(&router, get("/scep?operation=GetCACert")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, CONTENT_TYPE_CA_CERT);
        assert_eq!(body, ca_der);
    }

    #[tokio::test]
    async fn test_get_ca_caps() {
        let (router, _) = app("");
        let (status, content_type, body) = send(&router, get("/scep?operation=GetCACaps")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/plain"));
        let caps = String::from_utf8(body).unwrap();
        assert!(caps.contains("POSTPKIOperation"));
    }

    #[tokio::test]
    async fn test_post_pki_operation() {
        let (router, _) = app("");
        let (status, content_type, body) =
            send(&router, post("/scep?operation=PKIOperation", csr_der("device"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, CONTENT_TYPE_PKI);
        openssl::x509::X509::from_der(&body).unwrap();
    }

    #[tokio::test]
    async fn test_get_pki_operation_base64() {
        let (router, _) = app("");
        let message = urlencoding::encode(&STANDARD.encode(csr_der("device"))).into_owned();
        let uri = format!("/scep?operation=PKIOperation&message={}", message);
        let (status, _, body) = send(&router, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        openssl::x509::X509::from_der(&body).unwrap();
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let (router, _) = app("secret");

        let (status, _, _) =
            send(&router, post("/scep?operation=PKIOperation", b"junk".to_vec())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) =
            send(&router, post("/scep?operation=PKIOperation", csr_der("device"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, _) = send(&router, get("/scep?operation=GetNextCACert")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&router, get("/scep")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&router, get("/scep?operation=PKIOperation")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&router, post("/scep?operation=GetCACert", Vec::new())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_internal_error_is_500() {
        struct Broken;
        impl EnrollmentService for Broken {
            fn ca_certificate(&self) -> Result<Vec<u8>, ServiceError> {
                Err(ServiceError::Internal("disk on fire".to_string()))
            }
            fn ca_capabilities(&self) -> Result<String, ServiceError> {
                Ok(String::new())
            }
            fn pki_operation(&self, _message: &[u8]) -> Result<Vec<u8>, ServiceError> {
                Err(ServiceError::Sign(scep_ca::SignError::Internal("hsm".to_string())))
            }
        }

        let router = router(Arc::new(Broken));
        let (status, _, _) = send(&router, get("/scep?operation=GetCACert")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let (status, _, _) = send(&router, post("/scep?operation=PKIOperation", vec![1])).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_percent_encoded_operation_dispatches() {
        let (router, _) = app("");
        let (status, content_type, _) =
            send(&router, get("/scep?message=abc&operation=GetCACap%73")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/plain"));
    }

    #[test]
    fn test_endpoint_operation_is_decoded() {
        let uri: Uri = "/scep?message=abc&operation=GetCACap%73".parse().unwrap();
        assert_eq!(logged_operation(&uri), "GetCACaps");

        let uri: Uri = "/scep?message=abc".parse().unwrap();
        assert_eq!(logged_operation(&uri), "");
    }

    #[test]
    fn test_decode_message_restores_plus() {
        let decoded = decode_message(Some("+/8= ")).unwrap_err();
        assert!(matches!(decoded, ServiceError::BadRequest(_)));
        assert_eq!(decode_message(Some("a b+")).unwrap(), STANDARD.decode("a+b+").unwrap());
    }
}
