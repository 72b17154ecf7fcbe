// Connection descriptors for management sessions.
//
// A `Target` is fully populated by the caller (credential loading and
// config files live outside this crate) and is immutable once a session
// has been opened against it. All four protocol sessions read their
// transport settings from here.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::Error;

/// Default ports per protocol, used when the caller does not set one.
const DEFAULT_NETCONF_PORT: u16 = 830;
const DEFAULT_RESTCONF_PORT: u16 = 443;
const DEFAULT_GNMI_PORT: u16 = 9339;
const DEFAULT_CLI_PORT: u16 = 22;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Management protocol spoken to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Netconf,
    Restconf,
    Gnmi,
    Cli,
}

/// Credentials handed over by the caller. Secrets are wrapped so they
/// never appear in debug output or logs.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Username/password pair (SSH password auth, HTTP basic auth,
    /// gNMI metadata auth).
    Password {
        username: String,
        password: SecretString,
    },
    /// SSH private key in PEM/OpenSSH form, with optional passphrase.
    PrivateKey {
        username: String,
        key_pem: SecretString,
        passphrase: Option<SecretString>,
    },
    /// No client credentials (devices that authorize by network/TLS).
    Anonymous,
}

impl Credentials {
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Password { username, .. } | Self::PrivateKey { username, .. } => Some(username),
            Self::Anonymous => None,
        }
    }
}

/// TLS verification mode for HTTPS and gRPC transports.
#[derive(Debug, Clone, Default)]
pub enum TlsPolicy {
    /// Use the system certificate store.
    #[default]
    SystemRoots,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate. For gRPC this selects a plaintext
    /// channel, since the TLS stack there has no accept-any switch.
    DangerAcceptInvalid,
}

/// SSH host-key verification policy.
///
/// The default pins nothing, which refuses every host key until the
/// caller either pins a fingerprint or opts out explicitly.
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// Accept only keys whose SHA-256 fingerprint is in this list.
    /// Entries may carry or omit the `SHA256:` prefix.
    Fingerprints(Vec<String>),
    /// Accept any host key. Logged at `warn` when used.
    AcceptAny,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        Self::Fingerprints(Vec::new())
    }
}

impl HostKeyPolicy {
    /// Whether `fingerprint` (SHA-256, base64) passes this policy.
    pub fn allows(&self, fingerprint: &str) -> bool {
        let bare = fingerprint.strip_prefix("SHA256:").unwrap_or(fingerprint);
        match self {
            Self::Fingerprints(pins) => pins
                .iter()
                .any(|pin| pin.strip_prefix("SHA256:").unwrap_or(pin) == bare),
            Self::AcceptAny => true,
        }
    }
}

/// Prompt-driven dialect descriptor for raw CLI sessions.
///
/// CLI devices expose no structured negotiation, so the caller declares
/// everything the driver needs up front.
#[derive(Debug, Clone)]
pub struct CliPlatform {
    /// Regex matching the device prompt at end of output.
    pub prompt: String,
    /// Substrings whose presence in command output marks it failed.
    pub failed_when_contains: Vec<String>,
}

/// Identifies one device endpoint: address, protocol, credentials, and
/// transport security policy. Immutable after session creation.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub credentials: Credentials,
    pub tls: TlsPolicy,
    pub host_key: HostKeyPolicy,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Required when `protocol` is [`Protocol::Cli`], ignored otherwise.
    pub cli_platform: Option<CliPlatform>,
}

impl Target {
    /// Start building a target for `host` speaking `protocol`, with the
    /// protocol's conventional port and default timeouts.
    pub fn builder(host: impl Into<String>, protocol: Protocol) -> TargetBuilder {
        TargetBuilder {
            host: host.into(),
            port: None,
            protocol,
            credentials: Credentials::Anonymous,
            tls: TlsPolicy::default(),
            host_key: HostKeyPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cli_platform: None,
        }
    }

    /// `host:port` form used in error messages and logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL for the RESTCONF and gNMI transports. Plain HTTP is
    /// only selected by [`TlsPolicy::DangerAcceptInvalid`] on gRPC.
    pub(crate) fn http_base(&self, plaintext: bool) -> Result<url::Url, Error> {
        let scheme = if plaintext { "http" } else { "https" };
        Ok(url::Url::parse(&format!("{scheme}://{}:{}", self.host, self.port))?)
    }

    /// Build a `reqwest::Client` honoring this target's TLS policy and
    /// request timeout.
    pub fn build_http_client(&self) -> Result<reqwest::Client, Error> {
        self.finish_client(self.http_builder()?.timeout(self.request_timeout))
    }

    /// Like [`Target::build_http_client`] but without a per-request
    /// deadline, for long-lived event-stream responses.
    pub fn build_stream_client(&self) -> Result<reqwest::Client, Error> {
        let builder = self.http_builder()?;
        self.finish_client(builder)
    }

    fn http_builder(&self) -> Result<reqwest::ClientBuilder, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("wireplane/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsPolicy::SystemRoots => {}
            TlsPolicy::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::security(self.endpoint(), format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::security(self.endpoint(), format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsPolicy::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        Ok(builder)
    }

    fn finish_client(&self, builder: reqwest::ClientBuilder) -> Result<reqwest::Client, Error> {
        builder
            .build()
            .map_err(|e| Error::security(self.endpoint(), format!("failed to build HTTP client: {e}")))
    }
}

/// Builder for [`Target`]. Credentials and (for CLI) the platform
/// descriptor must be set explicitly; everything else has a sane
/// default.
#[derive(Debug, Clone)]
pub struct TargetBuilder {
    host: String,
    port: Option<u16>,
    protocol: Protocol,
    credentials: Credentials,
    tls: TlsPolicy,
    host_key: HostKeyPolicy,
    connect_timeout: Duration,
    request_timeout: Duration,
    cli_platform: Option<CliPlatform>,
}

impl TargetBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn password(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::Password {
            username: username.into(),
            password: SecretString::from(password.into()),
        };
        self
    }

    pub fn private_key(
        mut self,
        username: impl Into<String>,
        key_pem: impl Into<String>,
        passphrase: Option<String>,
    ) -> Self {
        self.credentials = Credentials::PrivateKey {
            username: username.into(),
            key_pem: SecretString::from(key_pem.into()),
            passphrase: passphrase.map(SecretString::from),
        };
        self
    }

    pub fn tls(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }

    pub fn host_key(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cli_platform(mut self, platform: CliPlatform) -> Self {
        self.cli_platform = Some(platform);
        self
    }

    pub fn build(self) -> Target {
        let port = self.port.unwrap_or(match self.protocol {
            Protocol::Netconf => DEFAULT_NETCONF_PORT,
            Protocol::Restconf => DEFAULT_RESTCONF_PORT,
            Protocol::Gnmi => DEFAULT_GNMI_PORT,
            Protocol::Cli => DEFAULT_CLI_PORT,
        });
        Target {
            host: self.host,
            port,
            protocol: self.protocol,
            credentials: self.credentials,
            tls: self.tls,
            host_key: self.host_key,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            cli_platform: self.cli_platform,
        }
    }
}
