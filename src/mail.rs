use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{auth::confirm::ConfirmationSigner, config::SmtpConfig};

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Delivery backend used by the mail worker.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()>;
}

/// Development sender: logs the message instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.html_body,
            "email send stub"
        );
        Ok(())
    }
}

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        // Implicit TLS wins when both flags are set.
        let builder = if cfg.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)
                .with_context(|| format!("smtp relay {}", cfg.host))?
        } else if cfg.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
                .with_context(|| format!("smtp starttls relay {}", cfg.host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
        };

        let mut builder = builder
            .port(cfg.port)
            .timeout(Some(Duration::from_secs(cfg.timeout_secs)));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = cfg
            .default_sender
            .parse::<Mailbox>()
            .with_context(|| format!("invalid MAIL_DEFAULT_SENDER {:?}", cfg.default_sender))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        let to = message
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("invalid recipient {:?}", message.to))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .context("build email")?;
        self.transport.send(email).await.context("smtp send")?;
        Ok(())
    }
}

/// Handle for queueing mail. Cheap to clone.
#[derive(Clone)]
pub struct Mailer {
    tx: mpsc::UnboundedSender<EmailMessage>,
}

impl Mailer {
    /// A mailer plus the raw receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EmailMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A mailer whose queue is drained by a background task sending through
    /// `sender`. The task ends once every `Mailer` clone is dropped.
    pub fn spawn(sender: Arc<dyn EmailSender>) -> (Self, JoinHandle<()>) {
        let (mailer, rx) = Self::channel();
        let handle = tokio::spawn(run_worker(rx, sender));
        (mailer, handle)
    }

    /// Queue a message. Never blocks and never fails the caller.
    pub fn enqueue(&self, message: EmailMessage) {
        let to = message.to.clone();
        if self.tx.send(message).is_err() {
            warn!(to = %to, "mail worker gone; message dropped");
        } else {
            debug!(to = %to, "email queued");
        }
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<EmailMessage>, sender: Arc<dyn EmailSender>) {
    while let Some(message) = rx.recv().await {
        match sender.send(&message).await {
            Ok(()) => info!(to = %message.to, subject = %message.subject, "email sent"),
            Err(e) => warn!(error = %e, to = %message.to, "email send failed; dropped"),
        }
    }
    debug!("mail worker stopped");
}

/// Build the confirmation mail for `email`, with an absolute link under `public_url`.
pub fn confirmation_email(
    signer: &ConfirmationSigner,
    public_url: &str,
    email: &str,
) -> anyhow::Result<EmailMessage> {
    let token = signer.sign(email)?;
    let confirm_url = format!("{}/confirm/{}", public_url.trim_end_matches('/'), token);
    let html_body = format!(
        "<p>Welcome! Thanks for signing up. Please follow this link to activate your account:</p>\n\
         <p><a href=\"{confirm_url}\">{confirm_url}</a></p>\n\
         <br>\n<p>Cheers!</p>"
    );
    Ok(EmailMessage {
        to: email.to_string(),
        subject: "Confirm Your Email Address".into(),
        html_body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::confirm::CONFIRMATION_SALT;

    struct RecordingSender {
        seen: mpsc::UnboundedSender<String>,
        fail_for: &'static str,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
            if message.to == self.fail_for {
                anyhow::bail!("mailbox unavailable");
            }
            let _ = self.seen.send(message.to.clone());
            Ok(())
        }
    }

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            to: to.into(),
            subject: "s".into(),
            html_body: "<p>b</p>".into(),
        }
    }

    #[tokio::test]
    async fn worker_keeps_going_after_a_failed_send() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let sender = Arc::new(RecordingSender {
            seen: seen_tx,
            fail_for: "broken@x.com",
        });
        let (mailer, handle) = Mailer::spawn(sender);

        mailer.enqueue(message("broken@x.com"));
        mailer.enqueue(message("ok@x.com"));
        drop(mailer);

        handle.await.unwrap();
        assert_eq!(seen_rx.recv().await.as_deref(), Some("ok@x.com"));
        assert!(seen_rx.try_recv().is_err());
    }

    #[test]
    fn enqueue_after_worker_is_gone_does_not_panic() {
        let (mailer, rx) = Mailer::channel();
        drop(rx);
        mailer.enqueue(message("a@x.com"));
    }

    #[tokio::test]
    async fn log_sender_always_succeeds() {
        LogEmailSender.send(&message("a@x.com")).await.unwrap();
    }

    #[test]
    fn confirmation_email_links_to_a_valid_token() {
        let signer = ConfirmationSigner::new("secret", CONFIRMATION_SALT);
        let msg = confirmation_email(&signer, "https://example.com/", "a@x.com").unwrap();
        assert_eq!(msg.to, "a@x.com");
        assert_eq!(msg.subject, "Confirm Your Email Address");

        let start = msg.html_body.find("https://example.com/confirm/").unwrap();
        let rest = &msg.html_body[start + "https://example.com/confirm/".len()..];
        let token: String = rest.chars().take_while(|c| *c != '"').collect();
        assert_eq!(signer.verify(&token).unwrap(), "a@x.com");
    }

    #[test]
    fn smtp_sender_rejects_bad_from_address() {
        let cfg = SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            use_tls: false,
            use_ssl: false,
            username: None,
            password: None,
            default_sender: "not an address".into(),
            timeout_secs: 1,
        };
        assert!(SmtpEmailSender::new(&cfg).is_err());
    }
}
