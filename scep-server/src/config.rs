//! Configuration resolution.
//!
//! Every setting comes from, in order of precedence:
//! 1. its command-line flag
//! 2. its `SCEP_*` environment variable, when present and non-empty
//! 3. a hardcoded default
//!
//! Resolution records where each value came from so conflicting user input
//! can be detected. The environment is read through [`Environment`] so the
//! whole resolver can be driven from tests.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use scep_ca::generate::{DEFAULT_KEY_SIZE, DEFAULT_YEARS};
use scep_ca::{BootstrapInputs, CaSubject, Passphrase, SignerOptions};
use thiserror::Error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DEPOT: &str = "depot";
const DEFAULT_CERT_VALID_DAYS: u32 = 365;
const DEFAULT_RENEW_DAYS: u32 = 14;

/// Errors that make the configuration unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Both the listen address and the listen port were set by the user.
    #[error("cannot set both --http-addr and --port")]
    AddressConflict,

    /// A numeric setting did not parse.
    #[error("no valid number for {setting}: {value:?}")]
    InvalidNumber { setting: &'static str, value: String },

    /// A numeric setting must be greater than zero.
    #[error("{setting} must be positive")]
    NotPositive { setting: &'static str },

    /// The listen address is not `[host]:port`.
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Default,
    Flag,
    Env,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Flag => f.write_str("flag"),
            Self::Env => f.write_str("env"),
        }
    }
}

/// A setting together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Resolved<T> {
    fn new(value: T, source: Source) -> Self {
        Self { value, source }
    }

    /// True when the value came from a flag or the environment.
    pub fn is_user_set(&self) -> bool {
        self.source != Source::Default
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved::new(f(self.value), self.source)
    }
}

/// Read access to environment variables.
pub trait Environment {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Empty variables count as absent.
fn env_value(env: &impl Environment, key: &str) -> Option<String> {
    env.var(key).filter(|v| !v.is_empty())
}

fn resolve_string(
    flag: Option<&String>,
    env: &impl Environment,
    key: &str,
    default: &str,
) -> Resolved<String> {
    if let Some(value) = flag {
        Resolved::new(value.clone(), Source::Flag)
    } else if let Some(value) = env_value(env, key) {
        Resolved::new(value, Source::Env)
    } else {
        Resolved::new(default.to_string(), Source::Default)
    }
}

/// Boolean variables are true only for the literal `true`.
fn resolve_bool(flag: bool, env: &impl Environment, key: &str) -> Resolved<bool> {
    if flag {
        Resolved::new(true, Source::Flag)
    } else if let Some(value) = env_value(env, key) {
        Resolved::new(value == "true", Source::Env)
    } else {
        Resolved::new(false, Source::Default)
    }
}

fn resolve_number<T: FromStr>(
    flag: Option<&String>,
    env: &impl Environment,
    key: &str,
    setting: &'static str,
    default: T,
) -> Result<Resolved<T>, ConfigError> {
    let raw = if let Some(value) = flag {
        Resolved::new(value.clone(), Source::Flag)
    } else if let Some(value) = env_value(env, key) {
        Resolved::new(value, Source::Env)
    } else {
        return Ok(Resolved::new(default, Source::Default));
    };

    let parsed = raw
        .value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidNumber {
            setting,
            value: raw.value.clone(),
        })?;
    Ok(Resolved::new(parsed, raw.source))
}

/// A listen address of the form `[host]:port`.
///
/// A missing host means all interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    host: String,
    port: u16,
}

impl ListenAddr {
    pub fn all_interfaces(port: u16) -> Self {
        Self {
            host: String::new(),
            port,
        }
    }

    pub fn parse(addr: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidAddress(addr.to_string());
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// The address to hand to the socket layer.
    pub fn bind_target(&self) -> String {
        if self.host.is_empty() {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Flags of the serve command.
#[derive(Debug, Clone, Default, Args)]
pub struct ServeFlags {
    /// HTTP listen address, e.g. ":8080" or "127.0.0.1:8080" [env: SCEP_HTTP_ADDR]
    #[arg(long)]
    pub http_addr: Option<String>,

    /// HTTP listen port [env: SCEP_HTTP_LISTEN_PORT] [default: 8080]
    #[arg(long)]
    pub port: Option<String>,

    /// Path to the CA depot directory [env: SCEP_FILE_DEPOT] [default: depot]
    #[arg(long)]
    pub depot: Option<String>,

    /// Passphrase of the CA private key [env: SCEP_CA_PASS]
    #[arg(long)]
    pub capass: Option<String>,

    /// Validity of issued certificates in days [env: SCEP_CERT_VALID] [default: 365]
    #[arg(long)]
    pub crtvalid: Option<String>,

    /// Days before expiry in which renewal is allowed, 0 to always allow [env: SCEP_CERT_RENEW] [default: 14]
    #[arg(long)]
    pub allowrenew: Option<String>,

    /// Enforce this challenge password [env: SCEP_CHALLENGE_PASSWORD]
    #[arg(long)]
    pub challenge: Option<String>,

    /// Executable that decides whether a CSR may be signed [env: SCEP_CSR_VERIFIER_EXEC]
    #[arg(long)]
    pub csrverifierexec: Option<String>,

    /// Enable debug logging [env: SCEP_LOG_DEBUG]
    #[arg(long)]
    pub debug: bool,

    /// Log as JSON [env: SCEP_LOG_JSON]
    #[arg(long)]
    pub log_json: bool,

    /// Create the CA if the depot holds none [env: SCEP_INIT_CA]
    #[arg(long)]
    pub init_ca: bool,

    /// Sign certificates with server usages [env: SCEP_SIGN_SERVER_ATTRS]
    #[arg(long)]
    pub sign_server_attrs: bool,

    /// Handle one gateway event from stdin instead of listening [env: SCEP_LAMBDA]
    #[arg(long)]
    pub lambda: bool,

    /// Debug flag: delete the depot before starting [env: SCEP_DELETE_CA]
    #[arg(long)]
    pub delete_ca: bool,
}

/// Validated serve settings.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub listen: Resolved<ListenAddr>,
    pub depot: Resolved<PathBuf>,
    pub ca_pass: Resolved<Passphrase>,
    pub cert_valid_days: Resolved<u32>,
    pub renew_days: Resolved<u32>,
    pub challenge: Resolved<Passphrase>,
    pub csr_verifier_exec: Resolved<String>,
    pub debug: Resolved<bool>,
    pub log_json: Resolved<bool>,
    pub init_ca: Resolved<bool>,
    pub sign_server_attrs: Resolved<bool>,
    pub lambda: Resolved<bool>,
    pub delete_ca: Resolved<bool>,
}

impl ServeConfig {
    /// Merge `flags` with `env`.
    ///
    /// # Errors
    ///
    /// - `ConfigError::AddressConflict` if both address forms are user-set
    /// - `ConfigError::InvalidNumber` / `NotPositive` for bad numeric values
    /// - `ConfigError::InvalidAddress` for an unparseable listen address
    pub fn resolve(flags: &ServeFlags, env: &impl Environment) -> Result<Self, ConfigError> {
        let http_addr = resolve_string(flags.http_addr.as_ref(), env, "SCEP_HTTP_ADDR", "");
        let port = resolve_number(
            flags.port.as_ref(),
            env,
            "SCEP_HTTP_LISTEN_PORT",
            "listen port",
            DEFAULT_PORT,
        )?;

        let listen = match (http_addr.is_user_set(), port.is_user_set()) {
            (true, true) => return Err(ConfigError::AddressConflict),
            (true, false) => {
                let source = http_addr.source;
                Resolved::new(ListenAddr::parse(&http_addr.value)?, source)
            }
            (false, _) => port.map(ListenAddr::all_interfaces),
        };

        let cert_valid_days = resolve_number(
            flags.crtvalid.as_ref(),
            env,
            "SCEP_CERT_VALID",
            "client cert validity",
            DEFAULT_CERT_VALID_DAYS,
        )?;
        if cert_valid_days.value == 0 {
            return Err(ConfigError::NotPositive {
                setting: "client cert validity",
            });
        }

        let renew_days = resolve_number(
            flags.allowrenew.as_ref(),
            env,
            "SCEP_CERT_RENEW",
            "allowed renewal time",
            DEFAULT_RENEW_DAYS,
        )?;

        Ok(Self {
            listen,
            depot: resolve_string(flags.depot.as_ref(), env, "SCEP_FILE_DEPOT", DEFAULT_DEPOT)
                .map(PathBuf::from),
            ca_pass: resolve_string(flags.capass.as_ref(), env, "SCEP_CA_PASS", "")
                .map(Passphrase::from),
            cert_valid_days,
            renew_days,
            challenge: resolve_string(
                flags.challenge.as_ref(),
                env,
                "SCEP_CHALLENGE_PASSWORD",
                "",
            )
            .map(Passphrase::from),
            csr_verifier_exec: resolve_string(
                flags.csrverifierexec.as_ref(),
                env,
                "SCEP_CSR_VERIFIER_EXEC",
                "",
            ),
            debug: resolve_bool(flags.debug, env, "SCEP_LOG_DEBUG"),
            log_json: resolve_bool(flags.log_json, env, "SCEP_LOG_JSON"),
            init_ca: resolve_bool(flags.init_ca, env, "SCEP_INIT_CA"),
            sign_server_attrs: resolve_bool(flags.sign_server_attrs, env, "SCEP_SIGN_SERVER_ATTRS"),
            lambda: resolve_bool(flags.lambda, env, "SCEP_LAMBDA"),
            delete_ca: resolve_bool(flags.delete_ca, env, "SCEP_DELETE_CA"),
        })
    }

    /// Issuance options for the depot signer.
    pub fn signer_options(&self) -> SignerOptions {
        SignerOptions {
            validity_days: self.cert_valid_days.value,
            renewal_days: self.renew_days.value,
            server_attributes: self.sign_server_attrs.value,
        }
    }

    /// The CSR verifier program, if one is configured.
    pub fn csr_verifier(&self) -> Option<PathBuf> {
        let exec = self.csr_verifier_exec.value.as_str();
        (!exec.is_empty()).then(|| PathBuf::from(exec))
    }

    /// Log every resolved setting with its source. Secrets are redacted.
    pub fn log_settings(&self) {
        fn secret(p: &Passphrase) -> &'static str {
            if p.is_empty() {
                ""
            } else {
                "<redacted>"
            }
        }

        let settings: [(&str, String, Source); 13] = [
            ("http-addr", self.listen.value.to_string(), self.listen.source),
            ("depot", self.depot.value.display().to_string(), self.depot.source),
            ("capass", secret(&self.ca_pass.value).to_string(), self.ca_pass.source),
            ("crtvalid", self.cert_valid_days.value.to_string(), self.cert_valid_days.source),
            ("allowrenew", self.renew_days.value.to_string(), self.renew_days.source),
            ("challenge", secret(&self.challenge.value).to_string(), self.challenge.source),
            ("csrverifierexec", self.csr_verifier_exec.value.clone(), self.csr_verifier_exec.source),
            ("debug", self.debug.value.to_string(), self.debug.source),
            ("log-json", self.log_json.value.to_string(), self.log_json.source),
            ("init-ca", self.init_ca.value.to_string(), self.init_ca.source),
            ("sign-server-attrs", self.sign_server_attrs.value.to_string(), self.sign_server_attrs.source),
            ("lambda", self.lambda.value.to_string(), self.lambda.source),
            ("delete-ca", self.delete_ca.value.to_string(), self.delete_ca.source),
        ];
        for (flag, value, source) in settings {
            tracing::debug!(flag, value = %value, source = %source, "setting");
        }
    }
}

/// Flags of the `ca` command.
#[derive(Debug, Clone, Default, Args)]
pub struct CaFlags {
    /// Path to the CA depot directory [env: SCEP_FILE_DEPOT] [default: depot]
    #[arg(long)]
    pub depot: Option<String>,

    /// Create a new CA [env: SCEP_INIT_CA]
    #[arg(long)]
    pub init_ca: bool,

    /// CA validity in years [env: SCEP_CA_YEARS] [default: 10]
    #[arg(long)]
    pub years: Option<String>,

    /// RSA key size [env: SCEP_CA_KEYSIZE] [default: 4096]
    #[arg(long, alias = "keySize")]
    pub key_size: Option<String>,

    /// Common name of the CA certificate [env: SCEP_CA_COMMON_NAME]
    #[arg(long, alias = "common_name")]
    pub common_name: Option<String>,

    /// Organization of the CA certificate [env: SCEP_CA_ORG]
    #[arg(long)]
    pub organization: Option<String>,

    /// Organizational unit of the CA certificate [env: SCEP_CA_OU]
    #[arg(long, alias = "organizational_unit")]
    pub organizational_unit: Option<String>,

    /// Country of the CA certificate [env: SCEP_CA_COUNTRY]
    #[arg(long)]
    pub country: Option<String>,

    /// Passphrase to encrypt the generated key with [env: SCEP_CA_PASSWORD]
    #[arg(long)]
    pub key_password: Option<String>,

    /// PEM CA certificate to store verbatim [env: SCEP_INLINE_CERT]
    #[arg(long)]
    pub inline_cert: Option<String>,

    /// PEM CA private key to store verbatim [env: SCEP_INLINE_KEY]
    #[arg(long)]
    pub inline_key: Option<String>,

    /// CA certificate file to copy into the depot [env: SCEP_PATH_CERT]
    #[arg(long)]
    pub path_cert: Option<String>,

    /// CA private key file to copy into the depot [env: SCEP_PATH_KEY]
    #[arg(long)]
    pub path_key: Option<String>,
}

/// Validated CA bootstrap settings.
#[derive(Debug, Clone)]
pub struct CaConfig {
    pub depot: Resolved<PathBuf>,
    pub init_ca: Resolved<bool>,
    pub inputs: BootstrapInputs,
    pub key_password: Resolved<Passphrase>,
}

impl CaConfig {
    pub fn resolve(flags: &CaFlags, env: &impl Environment) -> Result<Self, ConfigError> {
        let defaults = CaSubject::default();
        let subject = CaSubject {
            common_name: resolve_string(
                flags.common_name.as_ref(),
                env,
                "SCEP_CA_COMMON_NAME",
                &defaults.common_name,
            )
            .value,
            organization: resolve_string(
                flags.organization.as_ref(),
                env,
                "SCEP_CA_ORG",
                &defaults.organization,
            )
            .value,
            organizational_unit: resolve_string(
                flags.organizational_unit.as_ref(),
                env,
                "SCEP_CA_OU",
                &defaults.organizational_unit,
            )
            .value,
            country: resolve_string(flags.country.as_ref(), env, "SCEP_CA_COUNTRY", &defaults.country)
                .value,
        };

        let years = resolve_number(flags.years.as_ref(), env, "SCEP_CA_YEARS", "CA years", DEFAULT_YEARS)?;
        if years.value == 0 {
            return Err(ConfigError::NotPositive { setting: "CA years" });
        }
        let key_size = resolve_number(
            flags.key_size.as_ref(),
            env,
            "SCEP_CA_KEYSIZE",
            "CA key size",
            DEFAULT_KEY_SIZE,
        )?;
        let key_password = resolve_string(flags.key_password.as_ref(), env, "SCEP_CA_PASSWORD", "")
            .map(Passphrase::from);

        let optional = |flag: Option<&String>, key: &str| {
            let value = resolve_string(flag, env, key, "").value;
            (!value.is_empty()).then_some(value)
        };

        let inputs = BootstrapInputs {
            inline_cert: optional(flags.inline_cert.as_ref(), "SCEP_INLINE_CERT"),
            inline_key: optional(flags.inline_key.as_ref(), "SCEP_INLINE_KEY"),
            path_cert: optional(flags.path_cert.as_ref(), "SCEP_PATH_CERT").map(PathBuf::from),
            path_key: optional(flags.path_key.as_ref(), "SCEP_PATH_KEY").map(PathBuf::from),
            key_size: key_size.value,
            years: years.value,
            subject,
            passphrase: key_password.value.clone(),
        };

        Ok(Self {
            depot: resolve_string(flags.depot.as_ref(), env, "SCEP_FILE_DEPOT", DEFAULT_DEPOT)
                .map(PathBuf::from),
            init_ca: resolve_bool(flags.init_ca, env, "SCEP_INIT_CA"),
            inputs,
            key_password,
        })
    }

    /// Bootstrap settings for `--init-ca` on the serve command.
    ///
    /// CA settings come from the environment only. The depot is the serve
    /// depot, and without `SCEP_CA_PASSWORD` the generated key is encrypted
    /// with the serve passphrase so the server can open it afterwards.
    pub fn for_serve(
        depot: PathBuf,
        serve_passphrase: &Passphrase,
        env: &impl Environment,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::resolve(&CaFlags::default(), env)?;
        config.depot = Resolved::new(depot, Source::Flag);
        if !config.key_password.is_user_set() {
            config.inputs.passphrase = serve_passphrase.clone();
        }
        Ok(config)
    }
}
