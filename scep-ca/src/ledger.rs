//! In-memory renewal index.
//!
//! Remembers, per subject common name, when the most recently issued
//! certificate expires. The renewal check, the signing itself and the record
//! all happen under one lock so two concurrent requests for the same subject
//! cannot both slip through the window.
//!
//! The index lives only as long as the process; serial numbers are random
//! per certificate and do not depend on it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use openssl::x509::X509;

use crate::signer::{SignError, SigningRejection};

#[derive(Debug, Default)]
pub struct IssuanceLedger {
    expiries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl IssuanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `build` if the renewal policy allows issuing for `common_name` at
    /// `now`, then record `not_after` for the subject.
    ///
    /// With `renewal_days == 0` every request is allowed. Otherwise a subject
    /// holding an unexpired certificate is only allowed once that certificate
    /// is within `renewal_days` of its expiry.
    ///
    /// Nothing is recorded when `build` fails.
    pub fn issue<F>(
        &self,
        common_name: Option<&str>,
        now: DateTime<Utc>,
        not_after: DateTime<Utc>,
        renewal_days: u32,
        build: F,
    ) -> Result<X509, SignError>
    where
        F: FnOnce() -> Result<X509, SignError>,
    {
        let mut expiries = self.expiries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cn) = common_name {
            if let Some(existing) = expiries.get(cn) {
                check_renewal(cn, *existing, now, renewal_days)?;
            }
        }

        let certificate = build()?;
        if let Some(cn) = common_name {
            expiries.insert(cn.to_string(), not_after);
        }
        Ok(certificate)
    }

    /// Expiry of the latest certificate issued for `common_name`.
    pub fn latest_expiry(&self, common_name: &str) -> Option<DateTime<Utc>> {
        let expiries = self.expiries.lock().unwrap_or_else(PoisonError::into_inner);
        expiries.get(common_name).copied()
    }
}

fn check_renewal(
    common_name: &str,
    existing: DateTime<Utc>,
    now: DateTime<Utc>,
    renewal_days: u32,
) -> Result<(), SigningRejection> {
    if renewal_days == 0 || existing <= now {
        return Ok(());
    }
    let remaining = existing - now;
    if remaining > Duration::days(i64::from(renewal_days)) {
        return Err(SigningRejection::RenewalWindow {
            common_name: common_name.to_string(),
            days_remaining: remaining.num_days(),
        });
    }
    Ok(())
}
