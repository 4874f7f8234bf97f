//! QUIC endpoints for the replication protocol.
//!
//! Both sides speak TLS 1.3 over quinn with the ghostnet ALPN. The server
//! presents a throwaway self-signed identity; the client accepts any server
//! certificate but still checks handshake signatures against it.

use crate::protocol::ALPN_PROTOCOL;
use anyhow::{Context, Result};
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Endpoint, TransportConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Name the development identity is issued for and clients dial.
const SERVER_NAME: &str = "localhost";

/// Liveness parameters shared by both endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Interval between keep-alive packets.
    pub keep_alive: Duration,
    /// Silence after which a peer is considered gone and the connection closes.
    pub idle_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportSettings {
    fn transport_config(&self) -> Result<Arc<TransportConfig>> {
        let mut config = TransportConfig::default();
        config.keep_alive_interval(Some(self.keep_alive));
        config.max_idle_timeout(Some(
            self.idle_timeout
                .try_into()
                .context("Idle timeout out of range")?,
        ));
        Ok(Arc::new(config))
    }

    fn server_config(&self, identity: DevIdentity) -> Result<quinn::ServerConfig> {
        let mut tls = rustls::ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .context("TLS 1.3 unavailable")?
            .with_no_client_auth()
            .with_single_cert(vec![identity.cert], identity.key)
            .context("Server identity rejected")?;
        tls.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let quic = QuicServerConfig::try_from(tls).context("TLS config unusable for QUIC")?;
        let mut config = quinn::ServerConfig::with_crypto(Arc::new(quic));
        config.transport_config(self.transport_config()?);
        Ok(config)
    }

    fn client_config(&self) -> Result<quinn::ClientConfig> {
        let provider = provider();
        let mut tls = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&[&rustls::version::TLS13])
            .context("TLS 1.3 unavailable")?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AnyServerIdentity { provider }))
            .with_no_client_auth();
        tls.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let quic = QuicClientConfig::try_from(tls).context("TLS config unusable for QUIC")?;
        let mut config = quinn::ClientConfig::new(Arc::new(quic));
        config.transport_config(self.transport_config()?);
        Ok(config)
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

/// Self-signed certificate and key generated at bind time.
struct DevIdentity {
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
}

impl DevIdentity {
    fn generate() -> Result<Self> {
        let generated = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])
            .context("Failed to generate server certificate")?;
        Ok(Self {
            cert: CertificateDer::from(generated.cert),
            key: PrivateKeyDer::Pkcs8(generated.key_pair.serialize_der().into()),
        })
    }

    /// Short blake3 fingerprint of the certificate, for logs.
    fn fingerprint(&self) -> String {
        let hex = blake3::hash(self.cert.as_ref()).to_hex();
        hex.as_str()[..16].to_string()
    }
}

/// Listening endpoint of a server.
pub struct ServerEndpoint {
    endpoint: Endpoint,
    addr: SocketAddr,
}

impl ServerEndpoint {
    /// Bind a server endpoint to `addr` (port 0 picks a free port).
    pub fn bind(addr: SocketAddr, settings: &TransportSettings) -> Result<Self> {
        let identity = DevIdentity::generate()?;
        let fingerprint = identity.fingerprint();
        let endpoint = Endpoint::server(settings.server_config(identity)?, addr)
            .with_context(|| format!("Failed to bind server endpoint on {}", addr))?;
        let addr = endpoint.local_addr()?;
        info!(%fingerprint, "Server endpoint bound to {}", addr);
        Ok(Self { endpoint, addr })
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next incoming connection, or `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Close the endpoint and every connection on it.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"Server shutting down");
    }
}

/// Dialing endpoint of a client.
pub struct ClientEndpoint {
    endpoint: Endpoint,
}

impl ClientEndpoint {
    /// Create a client endpoint on an ephemeral local port.
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        let mut endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))
            .context("Failed to bind client endpoint")?;
        endpoint.set_default_client_config(settings.client_config()?);
        debug!("Client endpoint on {}", endpoint.local_addr()?);
        Ok(Self { endpoint })
    }

    /// Dial `server_addr` and wait for the QUIC handshake.
    pub async fn connect(&self, server_addr: SocketAddr) -> Result<quinn::Connection> {
        info!("Connecting to server at {}", server_addr);
        let connection = self
            .endpoint
            .connect(server_addr, SERVER_NAME)
            .context("Failed to initiate connection")?
            .await
            .context("Failed to establish connection")?;
        info!("Connected to server at {}", server_addr);
        Ok(connection)
    }

    /// Close the endpoint and every connection on it.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"Client shutting down");
    }
}

/// Accepts whatever certificate the server presents. Development only.
///
/// Handshake signatures are still verified with the provider's algorithms,
/// so the peer must hold the key of the certificate it sent.
#[derive(Debug)]
struct AnyServerIdentity {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AnyServerIdentity {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
