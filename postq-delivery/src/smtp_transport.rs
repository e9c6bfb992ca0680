//! [`Transport`] over a real SMTP connection.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use postq_common::{internal, tracing};
use postq_smtp::{Response, SmtpClient};

use crate::{
    endpoint::{AuthMechanism, Endpoint},
    error::{PermanentError, TemporaryError},
    transport::{OpenError, SendOutcome, Session, Transport},
    types::SmtpTimeouts,
};

/// Run one client operation under a deadline
async fn timed<T, F>(limit: Duration, what: &str, operation: F) -> Result<T, TemporaryError>
where
    F: Future<Output = postq_smtp::Result<T>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| TemporaryError::Timeout(format!("{what} timed out after {limit:?}")))?
        .map_err(TemporaryError::from)
}

/// Map a refusal onto what the delivery loop should do about it
///
/// - 4xx: the relay is busy, stop the batch
/// - 50x (syntax) and 53x (authentication): try this message again later
/// - any other 5xx: the message is refused for good
#[must_use]
pub fn classify_refusal(response: &Response) -> SendOutcome {
    let reply = format!("{} {}", response.code, response.message());

    match response.code {
        400..=499 => SendOutcome::Overloaded(TemporaryError::ServerBusy(reply)),
        500..=509 | 530..=539 => SendOutcome::Transient(TemporaryError::SmtpTemporary(reply)),
        510..=529 | 540..=599 => SendOutcome::Rejected(PermanentError::MessageRejected(reply)),
        _ => SendOutcome::Transient(TemporaryError::SmtpTemporary(format!(
            "Unexpected reply {reply}"
        ))),
    }
}

/// Opens [`SmtpSession`]s with the configured timeouts
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    timeouts: SmtpTimeouts,
    helo_name: String,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(timeouts: SmtpTimeouts, helo_name: impl Into<String>) -> Self {
        Self {
            timeouts,
            helo_name: helo_name.into(),
        }
    }

    /// EHLO, falling back to HELO for relays that do not speak ESMTP
    async fn greet(&self, client: &mut SmtpClient, name: &str) -> Result<Response, TemporaryError> {
        let ehlo = timed(self.timeouts.command(), "EHLO", client.ehlo(name)).await?;
        if ehlo.is_success() {
            return Ok(ehlo);
        }

        let helo = timed(self.timeouts.command(), "HELO", client.helo(name)).await?;
        if helo.is_success() {
            Ok(helo)
        } else {
            Err(TemporaryError::SmtpTemporary(format!(
                "Server rejected HELO: {} {}",
                helo.code,
                helo.message()
            )))
        }
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>, OpenError> {
        let relay = endpoint.socket_address();
        let name = endpoint.domain.as_deref().unwrap_or(&self.helo_name);

        if endpoint.tls && endpoint.accept_invalid_certs {
            tracing::warn!(
                relay = %relay,
                "SECURITY WARNING: TLS certificate validation is disabled for this relay"
            );
        }

        let mut client = timed(
            self.timeouts.connect(),
            "Connect",
            SmtpClient::connect(&relay, endpoint.address.clone()),
        )
        .await
        .map_err(|e| TemporaryError::ConnectionFailed(format!("Failed to connect to {relay}: {e}")))?
        .accept_invalid_certs(endpoint.accept_invalid_certs);

        let greeting = timed(self.timeouts.connect(), "Greeting", client.read_greeting()).await?;
        if !greeting.is_success() {
            return Err(TemporaryError::ServerBusy(format!(
                "Server rejected connection: {} {}",
                greeting.code,
                greeting.message()
            ))
            .into());
        }

        let capabilities = self.greet(&mut client, name).await?;

        if endpoint.tls && capabilities.advertises("STARTTLS") {
            let reply = timed(self.timeouts.command(), "STARTTLS", client.starttls()).await?;
            if !reply.is_success() {
                return Err(TemporaryError::TlsHandshakeFailed(format!(
                    "Server rejected STARTTLS: {} {}",
                    reply.code,
                    reply.message()
                ))
                .into());
            }

            self.greet(&mut client, name).await?;
            internal!(level = DEBUG, "TLS negotiated with {relay}");
        }

        if let Some((user, password)) = endpoint.credentials() {
            let reply = match endpoint.authentication {
                AuthMechanism::Plain => {
                    timed(self.timeouts.command(), "AUTH", client.auth_plain(user, password))
                        .await?
                }
                AuthMechanism::Login => {
                    timed(self.timeouts.command(), "AUTH", client.auth_login(user, password))
                        .await?
                }
            };

            if !reply.is_success() {
                return Err(OpenError::Auth(format!("{} {}", reply.code, reply.message())));
            }
        }

        Ok(Box::new(SmtpSession {
            client,
            timeouts: self.timeouts,
        }))
    }
}

/// An authenticated connection ready for mail transactions
#[derive(Debug)]
pub struct SmtpSession {
    client: SmtpClient,
    timeouts: SmtpTimeouts,
}

impl SmtpSession {
    async fn transaction(
        &mut self,
        from: &str,
        to: &[String],
        body: &[u8],
    ) -> Result<SendOutcome, TemporaryError> {
        let command = self.timeouts.command();

        let reply = timed(command, "MAIL FROM", self.client.mail_from(from)).await?;
        if !reply.is_success() {
            return Ok(classify_refusal(&reply));
        }

        for recipient in to {
            let reply = timed(command, "RCPT TO", self.client.rcpt_to(recipient)).await?;
            if !reply.is_success() {
                return Ok(classify_refusal(&reply));
            }
        }

        let reply = timed(command, "DATA", self.client.data()).await?;
        if !reply.is_intermediate() {
            return Ok(classify_refusal(&reply));
        }

        let reply = timed(self.timeouts.data(), "Message data", self.client.send_data(body)).await?;
        Ok(if reply.is_success() {
            SendOutcome::Delivered
        } else {
            classify_refusal(&reply)
        })
    }
}

#[async_trait]
impl Session for SmtpSession {
    async fn send(&mut self, from: &str, to: &[String], body: &[u8]) -> SendOutcome {
        self.transaction(from, to, body)
            .await
            .unwrap_or_else(SendOutcome::Transient)
    }

    async fn reset(&mut self) -> Result<(), TemporaryError> {
        let reply = timed(self.timeouts.command(), "RSET", self.client.rset()).await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(TemporaryError::SmtpTemporary(format!(
                "Server rejected RSET: {} {}",
                reply.code,
                reply.message()
            )))
        }
    }

    async fn close(&mut self) -> Result<(), TemporaryError> {
        timed(self.timeouts.quit(), "QUIT", self.client.quit())
            .await
            .map(|_| ())
    }
}
