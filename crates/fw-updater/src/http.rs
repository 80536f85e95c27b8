// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Secured HTTP client construction

use crate::error::{Result, UpdaterError};
use reqwest::redirect::Policy;
use reqwest::{Certificate, Client};
use std::time::Duration;

pub const USER_AGENT: &str = concat!("fw-updater/", env!("CARGO_PKG_VERSION"));

const PEM_CERTIFICATE_HEADER: &str = "-----BEGIN CERTIFICATE-----";

/// How the remote server's certificate is validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustAnchor {
    /// The Mozilla root set compiled into the binary.
    #[default]
    BuiltInRoots,
    /// Only the given PEM certificate (CA or leaf) is trusted.
    Pinned(Vec<u8>),
    /// No verification at all. Development only.
    Insecure,
}

impl TrustAnchor {
    pub fn is_insecure(&self) -> bool {
        matches!(self, Self::Insecure)
    }
}

/// Transport settings shared by the resolver and the transfer driver
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub trust_anchor: TrustAnchor,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            trust_anchor: TrustAnchor::default(),
            user_agent: USER_AGENT.to_owned(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
        }
    }
}

/// Client that never follows redirects on its own.
pub fn build_client(settings: &HttpSettings) -> Result<Client> {
    build(settings, Policy::none(), Deadline::WholeRequest)
}

/// Client that follows up to `max_redirects` hops.
pub fn build_client_with_redirects(settings: &HttpSettings) -> Result<Client> {
    build(
        settings,
        Policy::limited(settings.max_redirects),
        Deadline::WholeRequest,
    )
}

/// Client for image downloads: follows redirects and only times out when the
/// connection stalls for `request_timeout`, however long the body takes.
pub fn build_download_client(settings: &HttpSettings) -> Result<Client> {
    build(
        settings,
        Policy::limited(settings.max_redirects),
        Deadline::PerRead,
    )
}

#[derive(Clone, Copy)]
enum Deadline {
    WholeRequest,
    PerRead,
}

fn build(settings: &HttpSettings, policy: Policy, deadline: Deadline) -> Result<Client> {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .user_agent(settings.user_agent.as_str())
        .connect_timeout(settings.connect_timeout)
        .redirect(policy);

    builder = match deadline {
        Deadline::WholeRequest => builder.timeout(settings.request_timeout),
        Deadline::PerRead => builder.read_timeout(settings.request_timeout),
    };

    builder = match &settings.trust_anchor {
        TrustAnchor::BuiltInRoots => builder,
        TrustAnchor::Pinned(pem) => {
            // the rustls backend silently skips non-PEM input, leaving an empty root store
            if !String::from_utf8_lossy(pem).contains(PEM_CERTIFICATE_HEADER) {
                return Err(UpdaterError::Certificate(
                    "trust anchor contains no PEM certificate".to_owned(),
                ));
            }
            let certificate = Certificate::from_pem(pem)
                .map_err(|e| UpdaterError::Certificate(format!("invalid trust anchor: {e}")))?;
            builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(certificate)
        }
        TrustAnchor::Insecure => {
            tracing::warn!("TLS certificate verification is DISABLED");
            builder.danger_accept_invalid_certs(true)
        }
    };

    builder
        .build()
        .map_err(|e| UpdaterError::Config(format!("Failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_secure() {
        let settings = HttpSettings::default();
        assert_eq!(settings.trust_anchor, TrustAnchor::BuiltInRoots);
        assert!(!settings.trust_anchor.is_insecure());
        assert!(settings.user_agent.starts_with("fw-updater/"));
    }

    #[test]
    fn test_builds_secure_and_insecure_clients() {
        assert!(build_client(&HttpSettings::default()).is_ok());

        let insecure = HttpSettings {
            trust_anchor: TrustAnchor::Insecure,
            ..Default::default()
        };
        assert!(build_client_with_redirects(&insecure).is_ok());
    }

    #[test]
    fn test_garbage_trust_anchor_is_rejected() {
        let settings = HttpSettings {
            trust_anchor: TrustAnchor::Pinned(b"not a certificate".to_vec()),
            ..Default::default()
        };
        assert!(matches!(
            build_client(&settings),
            Err(UpdaterError::Certificate(_))
        ));
    }

    mod tls {
        use super::*;
        use rcgen::CertifiedKey;
        use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::sync::Arc;

        fn self_signed() -> CertifiedKey {
            rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap()
        }

        fn pinned(certificate: &CertifiedKey) -> HttpSettings {
            HttpSettings {
                trust_anchor: TrustAnchor::Pinned(certificate.cert.pem().into_bytes()),
                ..Default::default()
            }
        }

        /// Minimal HTTPS server answering every request with "ok".
        fn serve_tls(identity: &CertifiedKey) -> u16 {
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                identity.key_pair.serialize_der(),
            ));
            let config = Arc::new(
                rustls::ServerConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .unwrap()
                    .with_no_client_auth()
                    .with_single_cert(vec![identity.cert.der().clone()], key)
                    .unwrap(),
            );

            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();

            std::thread::spawn(move || {
                for tcp in listener.incoming().flatten() {
                    let Ok(conn) = rustls::ServerConnection::new(config.clone()) else {
                        continue;
                    };
                    let mut stream = rustls::StreamOwned::new(conn, tcp);
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let _ = stream.write_all(
                        b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    );
                    let _ = stream.flush();
                }
            });
            port
        }

        #[test]
        fn test_pinned_certificate_builds_client() {
            assert!(build_client(&pinned(&self_signed())).is_ok());
        }

        #[tokio::test]
        async fn test_pinned_server_is_trusted() {
            let identity = self_signed();
            let port = serve_tls(&identity);

            let client = build_client(&pinned(&identity)).unwrap();
            let body = client
                .get(format!("https://localhost:{port}/"))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap();
            assert_eq!(body, "ok");
        }

        #[tokio::test]
        async fn test_server_outside_pinned_anchor_is_certificate_error() {
            let port = serve_tls(&self_signed());

            // Pinned to an unrelated certificate
            let client = build_client(&pinned(&self_signed())).unwrap();
            let err = client
                .get(format!("https://localhost:{port}/"))
                .send()
                .await
                .unwrap_err();

            assert!(matches!(
                UpdaterError::from_transport(&err, UpdaterError::Transfer),
                UpdaterError::Certificate(_)
            ));
        }

        #[tokio::test]
        async fn test_self_signed_server_fails_against_built_in_roots() {
            let port = serve_tls(&self_signed());

            let client = build_client(&HttpSettings::default()).unwrap();
            let err = client
                .get(format!("https://localhost:{port}/"))
                .send()
                .await
                .unwrap_err();

            assert!(matches!(
                UpdaterError::from_transport(&err, UpdaterError::Resolution),
                UpdaterError::Certificate(_)
            ));
        }
    }
}
