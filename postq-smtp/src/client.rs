//! A single SMTP connection, plain or upgraded with STARTTLS.

use std::sync::Arc;

use base64::Engine;
use postq_common::{incoming, outgoing, tracing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use crate::{
    data,
    error::{ClientError, Result},
    response::Response,
};

const BUFFER_SIZE: usize = 8192;

/// Upper bound on a single reply, so a misbehaving server cannot grow the buffer forever
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum Connection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Connection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            ));
        };

        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            roots
                .add(cert)
                .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
        }
        if !native.errors.is_empty() {
            tracing::warn!(errors = ?native.errors, "Some system certificates could not be loaded");
        }

        let mut config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        if accept_invalid_certs {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(AcceptAnyCertificate));
        }

        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|e| ClientError::TlsError(format!("Invalid domain {domain}: {e}")))?;

        let stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;

        Ok(Self::Tls(Box::new(stream)))
    }
}

/// Certificate verifier used when a relay is configured with `accept_invalid_certs`
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

/// An open connection to an SMTP server
pub struct SmtpClient {
    connection: Option<Connection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("server_domain", &self.server_domain)
            .field(
                "tls",
                &matches!(self.connection, Some(Connection::Tls(_))),
            )
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    /// Open a TCP connection to `addr`
    ///
    /// `server_domain` is the name the certificate is checked against after
    /// STARTTLS.
    ///
    /// # Errors
    /// If the connection cannot be established
    pub async fn connect(addr: &str, server_domain: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            connection: Some(Connection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain: server_domain.into(),
            accept_invalid_certs: false,
        })
    }

    /// Skip certificate verification after STARTTLS
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Read the `220` banner
    ///
    /// # Errors
    /// If reading fails or the reply is malformed
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(format!("{line}\r\n").as_bytes())
            .await
    }

    /// Send a raw command line and read the reply
    ///
    /// # Errors
    /// If sending or reading fails
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");
        self.write_line(command).await?;
        self.read_response().await
    }

    /// Like [`Self::command`], without putting the line in the logs
    async fn secret_command(&mut self, command: &str, label: &str) -> Result<Response> {
        outgoing!("{label} <redacted>");
        self.write_line(command).await?;
        self.read_response().await
    }

    /// # Errors
    /// If sending or reading fails
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    /// If sending or reading fails
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// Send STARTTLS and, if the server agrees, upgrade the connection
    ///
    /// The caller must send EHLO again afterwards.
    ///
    /// # Errors
    /// If the command fails or the TLS handshake does
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            let connection = self
                .connection
                .take()
                .ok_or(ClientError::ConnectionClosed)?;
            self.buffer_pos = 0;
            self.connection = Some(
                connection
                    .upgrade(&self.server_domain, self.accept_invalid_certs)
                    .await?,
            );
        }

        Ok(response)
    }

    /// `AUTH PLAIN` with an initial response
    ///
    /// # Errors
    /// If sending or reading fails
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("\0{username}\0{password}").as_bytes());

        self.secret_command(&format!("AUTH PLAIN {credentials}"), "AUTH PLAIN")
            .await
    }

    /// `AUTH LOGIN`, answering the username and password challenges
    ///
    /// Returns the first reply that is not a `334` challenge.
    ///
    /// # Errors
    /// If sending or reading fails
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<Response> {
        let engine = base64::engine::general_purpose::STANDARD;

        let response = self.command("AUTH LOGIN").await?;
        if response.code != 334 {
            return Ok(response);
        }

        let response = self
            .secret_command(&engine.encode(username), "AUTH LOGIN username")
            .await?;
        if response.code != 334 {
            return Ok(response);
        }

        self.secret_command(&engine.encode(password), "AUTH LOGIN password")
            .await
    }

    /// # Errors
    /// If sending or reading fails
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    /// If sending or reading fails
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    /// If sending or reading fails
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Send the message body after a `354`, terminated by `.`
    ///
    /// Line endings are normalised and leading dots are stuffed.
    ///
    /// # Errors
    /// If sending or reading fails
    pub async fn send_data(&mut self, message: &[u8]) -> Result<Response> {
        let encoded = data::encode(message);
        outgoing!("<{} bytes of message data>", encoded.len());

        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(&encoded)
            .await?;

        self.read_response().await
    }

    /// # Errors
    /// If sending or reading fails
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// # Errors
    /// If sending or reading fails
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{} {}", response.code, response.message());
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}
