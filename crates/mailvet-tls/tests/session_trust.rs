//! End-to-end session tests against a local TLS echo server.
//!
//! The server presents a self-signed certificate for `localhost`, so the
//! first connection must go through the interactive trust flow; accepting
//! permanently persists the certificate and later connections are silent.

use std::net::SocketAddr;
use std::sync::Arc;

use mailvet_tls::{connect_plain, TlsConfig, TlsSession};
use mailvet_trust::{CertificateReport, Error as TrustError, PromptUi, TrustDecision};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Prompt that replies from a fixed script and records what it was offered.
struct ScriptedUi {
    replies: Vec<TrustDecision>,
    offered: Vec<Vec<TrustDecision>>,
}

impl ScriptedUi {
    fn new(replies: Vec<TrustDecision>) -> Self {
        Self {
            replies,
            offered: Vec::new(),
        }
    }

    fn prompt_count(&self) -> usize {
        self.offered.len()
    }
}

impl PromptUi for ScriptedUi {
    fn choose(&mut self, _report: &CertificateReport, offered: &[TrustDecision]) -> TrustDecision {
        let reply = self
            .replies
            .get(self.offered.len())
            .copied()
            .unwrap_or(TrustDecision::Reject);
        self.offered.push(offered.to_vec());
        reply
    }
}

fn acceptor_for_localhost() -> TlsAcceptor {
    let key = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let cert = params.self_signed(&key).unwrap();

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![cert.der().clone()],
            rustls::pki_types::PrivateKeyDer::Pkcs8(
                rustls::pki_types::PrivatePkcs8KeyDer::from(key.serialize_der()),
            ),
        )
        .unwrap();
    TlsAcceptor::from(Arc::new(server_config))
}

/// Spawns a TLS echo server; every accepted byte is written straight back.
async fn spawn_echo_server() -> SocketAddr {
    let acceptor = acceptor_for_localhost();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                loop {
                    match tls.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if tls.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Spawns a STARTTLS-style echo server: one plaintext greeting, then TLS.
async fn spawn_starttls_server() -> SocketAddr {
    let acceptor = acceptor_for_localhost();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if tcp.write_all(b"* OK ready\r\n").await.is_err() {
                    return;
                }
                let Ok(mut tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                loop {
                    match tls.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if tls.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

async fn echo_roundtrip(session: &mut TlsSession, payload: &[u8]) {
    let written = session.write(payload).await.unwrap();
    assert_eq!(written, payload.len());
    session.flush().await.unwrap();

    let mut buf = vec![0u8; payload.len()];
    let mut read = 0;
    while read < payload.len() {
        let n = session.read(&mut buf[read..]).await.unwrap();
        assert_ne!(n, 0, "server closed before echoing everything");
        read += n;
    }
    assert_eq!(&buf, payload);
}

#[tokio::test]
async fn accept_always_persists_and_silences_later_connections() {
    let addr = spawn_echo_server().await;
    let dir = tempfile::tempdir().unwrap();
    let config = TlsConfig::builder()
        .certificate_file(dir.path().join("certificates"))
        .build();

    let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptAlways]);
    let mut session = TlsSession::connect(&config, "localhost", addr.port(), &mut ui)
        .await
        .unwrap();

    assert_eq!(ui.prompt_count(), 1);
    // A self-signed certificate with no date or revocation problem is
    // offered all three choices.
    assert_eq!(ui.offered[0].len(), 3);
    assert!(session.is_open());
    assert!(session.tls_version().is_some());
    assert!(session.security_strength_bits() >= 128);
    assert!(session.client_identity().is_none());

    echo_roundtrip(&mut session, b"a1 NOOP\r\n").await;
    session.close().await.unwrap();
    assert!(!session.is_open());

    // The certificate was persisted; the second connection asks nothing.
    let mut ui = ScriptedUi::new(vec![]);
    let mut session = TlsSession::connect(&config, "localhost", addr.port(), &mut ui)
        .await
        .unwrap();
    assert_eq!(ui.prompt_count(), 0);
    session.close().await.unwrap();
}

#[tokio::test]
async fn reject_fails_connect_with_no_session() {
    let addr = spawn_echo_server().await;
    let config = TlsConfig::default();

    let mut ui = ScriptedUi::new(vec![TrustDecision::Reject]);
    let result = TlsSession::connect(&config, "localhost", addr.port(), &mut ui).await;
    assert!(matches!(
        result,
        Err(mailvet_tls::Error::Trust(TrustError::CertificateRejected))
    ));
}

#[tokio::test]
async fn accept_once_without_store_prompts_every_time() {
    let addr = spawn_echo_server().await;
    // No certificate_file: accept-always must not be offered.
    let config = TlsConfig::default();

    for _ in 0..2 {
        let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptOnce]);
        let mut session = TlsSession::connect(&config, "localhost", addr.port(), &mut ui)
            .await
            .unwrap();
        assert_eq!(ui.prompt_count(), 1);
        assert_eq!(
            ui.offered[0],
            vec![TrustDecision::Reject, TrustDecision::AcceptOnce]
        );
        session.close().await.unwrap();
    }
}

#[tokio::test]
async fn starttls_upgrade_establishes_trust() {
    let addr = spawn_starttls_server().await;
    let config = TlsConfig::default();

    let mut stream = connect_plain("localhost", addr.port()).await.unwrap();
    assert!(!stream.is_tls());

    let mut greeting = [0u8; 12];
    stream.read_exact(&mut greeting).await.unwrap();
    assert_eq!(&greeting, b"* OK ready\r\n");

    let mut ui = ScriptedUi::new(vec![TrustDecision::AcceptOnce]);
    let mut session = TlsSession::upgrade(stream, &config, "localhost", &mut ui)
        .await
        .unwrap();
    assert_eq!(ui.prompt_count(), 1);
    assert!(session.is_open());

    echo_roundtrip(&mut session, b"a2 CAPABILITY\r\n").await;
    session.close().await.unwrap();
}
