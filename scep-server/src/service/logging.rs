//! Service-level request logging.

use std::time::Instant;

use super::{EnrollmentService, ServiceError};

/// Logs every service call with its outcome and duration.
///
/// Results are returned unchanged.
#[derive(Debug)]
pub struct LoggingService<S> {
    inner: S,
}

impl<S> LoggingService<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn log_call<T>(method: &'static str, started: Instant, result: &Result<T, ServiceError>) {
    let took_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => tracing::info!(component = "scep_service", method, took_ms, "ok"),
        Err(e) => tracing::info!(component = "scep_service", method, took_ms, err = %e, "failed"),
    }
}

impl<S: EnrollmentService> EnrollmentService for LoggingService<S> {
    fn ca_certificate(&self) -> Result<Vec<u8>, ServiceError> {
        let started = Instant::now();
        let result = self.inner.ca_certificate();
        log_call("GetCACert", started, &result);
        result
    }

    fn ca_capabilities(&self) -> Result<String, ServiceError> {
        let started = Instant::now();
        let result = self.inner.ca_capabilities();
        log_call("GetCACaps", started, &result);
        result
    }

    fn pki_operation(&self, message: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let started = Instant::now();
        let result = self.inner.pki_operation(message);
        log_call("PKIOperation", started, &result);
        result
    }
}
