//! Mail delivery over SMTP.
//!
//! The message is rendered by hand (headers carry the feed, folder and filter
//! so mail clients can sort on them) and handed to [`lettre`] as raw bytes.

use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use super::Transport;
use crate::config::MailConfig;
use crate::error::{Error, Result};
use crate::notification::{one_line, Notification};

const DEFAULT_SMTP_PORT: u16 = 25;

pub struct MailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    envelope: Envelope,
    sender: String,
    destination: String,
}

impl MailTransport {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let (host, port) = split_server(&config.server)?;
        let builder = match credentials(config) {
            Some(credentials) => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| Error::config(format!("cannot set up STARTTLS for '{host}': {e}")))?
                .port(port)
                .credentials(credentials),
            None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port),
        };

        let from = parse_address(&config.sender)?;
        let to = parse_address(&config.destination)?;
        let envelope = Envelope::new(Some(from), vec![to])
            .map_err(|e| Error::config(format!("invalid mail envelope: {e}")))?;

        Ok(Self {
            mailer: builder.build(),
            envelope,
            sender: config.sender.clone(),
            destination: config.destination.clone(),
        })
    }
}

#[async_trait]
impl Transport for MailTransport {
    fn name(&self) -> &'static str {
        "mail"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let message = render_message(notification, &self.sender, &self.destination);
        self.mailer
            .send_raw(&self.envelope, message.as_bytes())
            .await
            .map_err(|e| Error::delivery(format!("smtp: {e}")))?;
        Ok(())
    }
}

/// Render a complete RFC 5322 message with CRLF line endings.
pub fn render_message(notification: &Notification, sender: &str, destination: &str) -> String {
    let mut headers = vec![
        format!("From: {sender}"),
        format!("To: {destination}"),
        format!("Subject: {}", notification.subject()),
        format!("Date: {}", notification.created_at.to_rfc2822()),
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/html; charset=utf-8".to_string(),
        format!("Feed: {}", one_line(&notification.feed_title)),
        format!("Folder: {}", one_line(&notification.folder)),
    ];
    if notification.has_explicit_filter() {
        headers.push(format!("Filter: {}", one_line(&notification.filter)));
    }

    let body = notification
        .body
        .lines()
        .collect::<Vec<_>>()
        .join("\r\n");
    format!("{}\r\n\r\n{}\r\n", headers.join("\r\n"), body)
}

/// Login details, if both halves are configured. Their presence switches the
/// connection to STARTTLS.
fn credentials(config: &MailConfig) -> Option<Credentials> {
    match (&config.username, &config.password) {
        (Some(user), Some(password)) => Some(Credentials::new(user.clone(), password.clone())),
        _ => None,
    }
}

fn parse_address(address: &str) -> Result<Address> {
    address
        .parse()
        .map_err(|e| Error::config(format!("invalid mail address '{address}': {e}")))
}

/// Split `host[:port]`.
fn split_server(server: &str) -> Result<(&str, u16)> {
    match server.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| Error::config(format!("invalid mail server port in '{server}'")))?;
            Ok((host, port))
        }
        None => Ok((server, DEFAULT_SMTP_PORT)),
    }
}
