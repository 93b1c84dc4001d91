use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        response::{Code, Severity},
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};

use crate::config::{MailConfig, MailDriver, SmtpConfig};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// The message could not be handed over; worth retrying.
    #[error("mail transport failed: {0}")]
    Transport(String),
    #[error("message rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

pub fn from_config(config: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    let from = format!("{} <{}>", config.from_name, config.from_address);

    let mailer: Arc<dyn Mailer> = match config.driver {
        MailDriver::Log => Arc::new(LogMailer::new(from)),
        MailDriver::Array => Arc::new(ArrayMailer::new(from)),
        MailDriver::Smtp => Arc::new(SmtpMailer::new(&from, &config.smtp)?),
    };

    Ok(mailer)
}

fn build(from: &str, to: &str, subject: &str, body: &str) -> Result<Message, MailError> {
    if !to.contains('@') {
        return Err(MailError::Rejected(format!("invalid recipient `{}`", to)));
    }

    Ok(Message {
        from: from.to_string(),
        to: to.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
    })
}

/// Writes every message to the log instead of delivering it.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let message = build(&self.from, to, subject, body)?;
        tracing::info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            "mail written to log"
        );
        tracing::debug!("mail body:\n{}", message.body);

        Ok(())
    }
}

/// Keeps sent messages in memory.
#[derive(Default)]
pub struct ArrayMailer {
    from: String,
    sent: Mutex<Vec<Message>>,
    failures: AtomicUsize,
}

impl ArrayMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Self::default()
        }
    }

    /// Make the next `count` sends fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Mailer for ArrayMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let message = build(&self.from, to, subject, body)?;

        let pending_failure = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending_failure {
            return Err(MailError::Transport("connection refused".to_string()));
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);

        Ok(())
    }
}

/// Delivers plain text mail through an SMTP relay.
pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(from: &str, config: &SmtpConfig) -> anyhow::Result<Self> {
        let builder = if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let builder = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            from: from.parse()?,
            transport: builder.port(config.port).build(),
        })
    }

    fn message(&self, to: &str, subject: &str, body: &str) -> Result<lettre::Message, MailError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| MailError::Rejected(format!("invalid recipient `{}`: {}", to, e)))?;

        lettre::Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| MailError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let message = self.message(to, subject, body)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| classify(e.status(), e.to_string()))?;

        tracing::debug!(to = %to, code = %response.code(), "mail accepted by relay");
        Ok(())
    }
}

/// A permanent (5xx) reply means retrying cannot help; anything else may.
fn classify(code: Option<Code>, reason: String) -> MailError {
    match code {
        Some(code) if code.severity == Severity::PermanentNegativeCompletion => {
            MailError::Rejected(reason)
        }
        _ => MailError::Transport(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lettre::transport::smtp::response::{Category, Detail};

    #[tokio::test]
    async fn array_mailer_keeps_messages() {
        let mailer = ArrayMailer::new("Example <hello@example.com>");

        mailer
            .send("admin@example.com", "Hi", "Hello there")
            .await
            .expect("send");

        assert_eq!(
            vec![Message {
                from: "Example <hello@example.com>".into(),
                to: "admin@example.com".into(),
                subject: "Hi".into(),
                body: "Hello there".into(),
            }],
            mailer.sent()
        );
    }

    #[tokio::test]
    async fn array_mailer_can_simulate_outages() {
        let mailer = ArrayMailer::new("hello@example.com");
        mailer.fail_next(1);

        let err = mailer.send("admin@example.com", "Hi", "x").await.unwrap_err();
        assert!(matches!(err, MailError::Transport(_)));

        mailer.send("admin@example.com", "Hi", "x").await.expect("send");
        assert_eq!(1, mailer.sent().len());
    }

    #[tokio::test]
    async fn array_mailer_survives_a_poisoned_lock() {
        let mailer = Arc::new(ArrayMailer::new("hello@example.com"));
        mailer.send("admin@example.com", "Hi", "x").await.expect("send");

        let poisoner = mailer.clone();
        let _ = std::thread::spawn(move || {
            let _sent = poisoner.sent.lock().unwrap();
            panic!("poison the mailbox");
        })
        .join();
        assert!(mailer.sent.is_poisoned());

        mailer.send("admin@example.com", "Again", "y").await.expect("send");
        assert_eq!(2, mailer.sent().len());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn log_mailer_keeps_the_body_out_of_info_logs() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        LogMailer::new("hello@example.com")
            .send("admin@example.com", "Hi", "private message text")
            .await
            .expect("send");

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("mail written to log"));
        assert!(output.contains("admin@example.com"));
        assert!(!output.contains("private message text"));
    }

    #[tokio::test]
    async fn recipient_must_be_an_address() {
        let mailer = LogMailer::new("hello@example.com");

        let err = mailer.send("admin", "Hi", "x").await.unwrap_err();

        assert!(matches!(err, MailError::Rejected(_)));
    }

    fn smtp_config() -> SmtpConfig {
        SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: Some("user".into()),
            password: Some("secret".into()),
            tls: false,
        }
    }

    #[test]
    fn permanent_reply_is_a_rejection() {
        let code = Code::new(
            Severity::PermanentNegativeCompletion,
            Category::MailSystem,
            Detail::Zero,
        );

        let err = classify(Some(code), "mailbox unavailable".into());

        assert!(matches!(err, MailError::Rejected(ref r) if r == "mailbox unavailable"));
    }

    #[test]
    fn transient_reply_is_retryable() {
        let code = Code::new(
            Severity::TransientNegativeCompletion,
            Category::MailSystem,
            Detail::One,
        );

        assert!(matches!(
            classify(Some(code), "try again later".into()),
            MailError::Transport(_)
        ));
    }

    #[test]
    fn connection_failure_is_retryable() {
        assert!(matches!(
            classify(None, "connection refused".into()),
            MailError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn smtp_mailer_rejects_bad_recipient_before_connecting() {
        let mailer = SmtpMailer::new("Example <hello@example.com>", &smtp_config()).expect("mailer");

        let err = mailer.send("admin", "Hi", "x").await.unwrap_err();

        assert!(matches!(err, MailError::Rejected(_)));
    }

    #[test]
    fn smtp_message_is_plain_text() {
        let mailer = SmtpMailer::new("Example <hello@example.com>", &smtp_config()).expect("mailer");

        let message = mailer
            .message("admin@example.com", "New Contact from Jane", "Hello")
            .expect("message");
        let raw = String::from_utf8(message.formatted()).expect("utf8");

        assert!(raw.contains("From: Example <hello@example.com>"));
        assert!(raw.contains("To: admin@example.com"));
        assert!(raw.contains("Subject: New Contact from Jane"));
        assert!(raw.contains("Content-Type: text/plain"));
    }

    #[test]
    fn smtp_driver_is_built_from_config() {
        let config = MailConfig {
            driver: MailDriver::Smtp,
            smtp: smtp_config(),
            ..MailConfig::default()
        };

        assert!(from_config(&config).is_ok());
    }

    #[test]
    fn smtp_driver_needs_a_valid_sender() {
        assert!(SmtpMailer::new("not an address", &smtp_config()).is_err());
    }
}
