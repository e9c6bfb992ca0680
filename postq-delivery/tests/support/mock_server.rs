//! Scriptable SMTP relay for exercising [`SmtpTransport`] over loopback.
//!
//! [`SmtpTransport`]: postq_delivery::SmtpTransport
#![allow(dead_code)]

use std::{collections::VecDeque, fmt::Write, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

/// What the relay saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Ehlo(String),
    Helo(String),
    StartTls,
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Message(Vec<u8>),
    Rset,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    fn line(&self) -> String {
        format!("{} {}\r\n", self.code, self.text)
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    /// `None` answers EHLO with 502 so the client has to fall back to HELO
    capabilities: Option<Vec<String>>,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    /// Replies to each message body in turn, 250 once exhausted
    data_end: VecDeque<Reply>,
    rset: Reply,
    response_delay: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "relay.test ESMTP"),
            capabilities: Some(vec!["relay.test".to_string(), "AUTH PLAIN LOGIN".to_string()]),
            auth: Reply::new(235, "Authentication succeeded"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: VecDeque::new(),
            rset: Reply::new(250, "OK"),
            response_delay: None,
        }
    }
}

pub struct MockRelay {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
}

impl MockRelay {
    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn received(&self) -> Vec<Received> {
        self.received.lock().await.clone()
    }

    /// Bodies of every message the relay was handed
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.received()
            .await
            .into_iter()
            .filter_map(|r| match r {
                Received::Message(body) => Some(body),
                _ => None,
            })
            .collect()
    }

    async fn serve(
        stream: TcpStream,
        script: Arc<Mutex<Script>>,
        received: Arc<Mutex<Vec<Received>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        let greeting = script.lock().await.greeting.line();
        writer.write_all(greeting.as_bytes()).await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let command = line.trim_end().to_string();
            let (verb, argument) = command
                .split_once(' ')
                .map_or((command.as_str(), ""), |(v, a)| (v, a));
            let verb = verb.to_ascii_uppercase();

            let mut current = script.lock().await;
            if let Some(delay) = current.response_delay {
                tokio::time::sleep(delay).await;
            }

            let (seen, reply) = match verb.as_str() {
                "EHLO" => (
                    Received::Ehlo(argument.to_string()),
                    current.capabilities.as_ref().map_or_else(
                        || Reply::new(502, "Command not implemented").line(),
                        |caps| multiline(250, caps),
                    ),
                ),
                "HELO" => (Received::Helo(argument.to_string()), Reply::new(250, "Hello").line()),
                "STARTTLS" => (Received::StartTls, Reply::new(454, "TLS not available").line()),
                "AUTH" if argument.eq_ignore_ascii_case("LOGIN") => {
                    writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                    let user = read_trimmed(&mut reader).await?;
                    writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                    let password = read_trimmed(&mut reader).await?;
                    (
                        Received::Auth(format!("LOGIN {user} {password}")),
                        current.auth.line(),
                    )
                }
                "AUTH" => (Received::Auth(argument.to_string()), current.auth.line()),
                "MAIL" => (Received::MailFrom(argument.to_string()), current.mail_from.line()),
                "RCPT" => (Received::RcptTo(argument.to_string()), current.rcpt_to.line()),
                "DATA" => (Received::Data, current.data.line()),
                "RSET" => (Received::Rset, current.rset.line()),
                "QUIT" => {
                    received.lock().await.push(Received::Quit);
                    writer.write_all(b"221 Bye\r\n").await?;
                    return Ok(());
                }
                _ => (Received::Other(command.clone()), Reply::new(500, "Unknown command").line()),
            };

            let accepting_body = seen == Received::Data && current.data.code == 354;
            received.lock().await.push(seen);
            writer.write_all(reply.as_bytes()).await?;

            if accepting_body {
                let body = read_body(&mut reader).await?;
                received.lock().await.push(Received::Message(body));

                let end = current
                    .data_end
                    .pop_front()
                    .unwrap_or_else(|| Reply::new(250, "Queued"));
                writer.write_all(end.line().as_bytes()).await?;
            }
        }
    }
}

fn multiline(code: u16, lines: &[String]) -> String {
    let mut reply = String::new();
    for (i, text) in lines.iter().enumerate() {
        let separator = if i + 1 == lines.len() { ' ' } else { '-' };
        let _ = write!(reply, "{code}{separator}{text}\r\n");
    }
    reply
}

async fn read_trimmed<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line.trim_end().to_string())
}

/// Read up to the lone `.` line, keeping the wire form of everything before it
async fn read_body<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 || line == b".\r\n" {
            return Ok(body);
        }
        body.extend_from_slice(&line);
    }
}

pub struct MockRelayBuilder {
    script: Script,
}

impl MockRelayBuilder {
    #[must_use]
    pub fn greeting(mut self, code: u16, text: &str) -> Self {
        self.script.greeting = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn capabilities(mut self, capabilities: &[&str]) -> Self {
        self.script.capabilities = Some(capabilities.iter().map(ToString::to_string).collect());
        self
    }

    #[must_use]
    pub fn without_ehlo(mut self) -> Self {
        self.script.capabilities = None;
        self
    }

    #[must_use]
    pub fn auth(mut self, code: u16, text: &str) -> Self {
        self.script.auth = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn mail_from(mut self, code: u16, text: &str) -> Self {
        self.script.mail_from = Reply::new(code, text);
        self
    }

    #[must_use]
    pub fn rcpt_to(mut self, code: u16, text: &str) -> Self {
        self.script.rcpt_to = Reply::new(code, text);
        self
    }

    /// Queue the reply to the next message body
    #[must_use]
    pub fn data_end(mut self, code: u16, text: &str) -> Self {
        self.script.data_end.push_back(Reply::new(code, text));
        self
    }

    #[must_use]
    pub fn rset(mut self, code: u16, text: &str) -> Self {
        self.script.rset = Reply::new(code, text);
        self
    }

    #[must_use]
    pub const fn response_delay(mut self, delay: Duration) -> Self {
        self.script.response_delay = Some(delay);
        self
    }

    /// Bind to an ephemeral loopback port and start answering
    ///
    /// # Errors
    /// If the listener cannot be bound
    pub async fn start(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(Mutex::new(self.script));
        let received = Arc::new(Mutex::new(Vec::new()));

        let accept_received = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = Arc::clone(&script);
                let received = Arc::clone(&accept_received);
                tokio::spawn(async move {
                    let _ = MockRelay::serve(stream, script, received).await;
                });
            }
        });

        Ok(MockRelay { addr, received })
    }
}
