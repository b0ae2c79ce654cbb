//! Outbound email: the mail capability, the message templates and the
//! fire-and-forget queue that carries operator notifications.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{header::ContentType, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SmtpConfig;
use crate::models::{Reservation, ServiceType};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address {0}")]
    Address(String),
    #[error("could not build message: {0}")]
    Build(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, email: Email) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, from_name: &str) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(Credentials::new(config.username.clone(), config.password.clone()))
            .build();
        Ok(Self {
            transport,
            from: format!("{from_name} <{}>", config.username),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_email(&self, email: Email) -> Result<(), MailError> {
        let builder = Message::builder()
            .from(self.from.parse().map_err(|_| MailError::Address(self.from.clone()))?)
            .to(email.to.parse().map_err(|_| MailError::Address(email.to.clone()))?)
            .subject(email.subject);
        let message = match email.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(email.text, html)),
            None => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(email.text),
            ),
        }
        .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| MailError::Transport(e.to_string()))
    }
}

/// Used when no SMTP credentials are configured: logs instead of sending.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_email(&self, email: Email) -> Result<(), MailError> {
        info!("mail disabled, not sending {:?} to {}", email.subject, email.to);
        debug!("{}", email.text);
        Ok(())
    }
}

pub fn reminder_email(reservation: &Reservation, shop_name: &str, lead_minutes: i64) -> Email {
    let service = ServiceType::label_for(&reservation.service_type);
    let text = format!(
        "Sveiki, {name}!\n\n\
         Primename, kad jūsų užsakytos paslaugos laikas artėja:\n\n\
         Paslauga: {service}\n\
         Data ir laikas: {date}\n\
         Telefonas: {phone}\n\n\
         Prašome atvykti laiku!\n\n\
         Su pagarba,\n{shop_name}",
        name = reservation.name,
        date = reservation.reservation_date,
        phone = reservation.phone,
    );
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
  <h2 style="color: #333;">Sveiki, {name}!</h2>
  <p>Primename, kad jūsų užsakytos paslaugos laikas artėja:</p>
  <div style="background-color: #f5f5f5; padding: 15px; border-radius: 5px; margin: 20px 0;">
    <p style="margin: 5px 0;"><strong>Paslauga:</strong> {service}</p>
    <p style="margin: 5px 0;"><strong>Data ir laikas:</strong> {date}</p>
    <p style="margin: 5px 0;"><strong>Telefonas:</strong> {phone}</p>
  </div>
  <p>Prašome atvykti laiku!</p>
  <p style="margin-top: 30px;">Su pagarba,<br>{shop_name}</p>
</div>"#,
        name = html_escape(&reservation.name),
        service = html_escape(&service),
        date = reservation.reservation_date,
        phone = html_escape(&reservation.phone),
    );
    Email {
        to: reservation.email.clone(),
        subject: format!("Priminimas: Jūsų paslaugos {service} vizitas bus po {lead_minutes} min"),
        text,
        html: Some(html),
    }
}

fn operator_email(reservation: &Reservation, to: &str) -> Email {
    let service = ServiceType::label_for(&reservation.service_type);
    Email {
        to: to.to_string(),
        subject: format!("Nauja rezervacija: {service}"),
        text: format!(
            "Nauja rezervacija:\n\n\
             Vardas: {}\nTelefonas: {}\nEl. paštas: {}\nData ir laikas: {}\nPaslauga: {}\n\
             Papildoma informacija: {}",
            reservation.name,
            reservation.phone,
            reservation.email,
            reservation.reservation_date,
            service,
            reservation
                .additional_info
                .as_deref()
                .unwrap_or("Nėra papildomos informacijos"),
        ),
        html: None,
    }
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Debug, Clone)]
pub enum Notification {
    NewReservation(Reservation),
}

/// Handle to the outbound notification queue. `notify` never blocks and
/// never fails the caller.
#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops everything, for shops without an operator inbox.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, notification: Notification) {
        if let Some(tx) = &self.tx {
            if tx.send(notification).is_err() {
                warn!("notification dispatcher is gone, dropping notification");
            }
        }
    }
}

/// Drains the queue, mailing the operator about each event. Failures are
/// logged and dropped.
pub fn spawn_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    mailer: Arc<dyn Mailer>,
    operator: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            match notification {
                Notification::NewReservation(reservation) => {
                    let email = operator_email(&reservation, &operator);
                    if let Err(e) = mailer.send_email(email).await {
                        error!(
                            "Failed to notify operator about reservation #{}: {}",
                            reservation.id, e
                        );
                    }
                }
            }
        }
        debug!("notification dispatcher stopped");
    })
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records every email; the first `failures` sends fail.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<Email>>,
        failures: AtomicUsize,
    }

    impl RecordingMailer {
        pub fn failing(times: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failures: AtomicUsize::new(times),
            }
        }

        pub fn sent(&self) -> Vec<Email> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_email(&self, email: Email) -> Result<(), MailError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(MailError::Transport("connection refused".to_string()));
            }
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::RecordingMailer;
    use super::*;

    fn reservation() -> Reservation {
        Reservation {
            id: 7,
            name: "Ona <b>".to_string(),
            email: "ona@example.com".to_string(),
            phone: "+37060000001".to_string(),
            reservation_date: "2025-06-10 11:00:00".to_string(),
            service_type: "ratu_suvedimas".to_string(),
            additional_info: None,
            created_at: "2025-06-01 12:00:00".to_string(),
            reminder_sent: false,
            send_reminder: true,
        }
    }

    #[test]
    fn reminder_goes_to_the_customer() {
        let email = reminder_email(&reservation(), "Variklio Sala", 30);
        assert_eq!(email.to, "ona@example.com");
        assert!(email.subject.contains("3D ratų suvedimas"));
        assert!(email.subject.contains("30 min"));
        assert!(email.text.contains("2025-06-10 11:00:00"));
        assert!(email.text.ends_with("Variklio Sala"));
        let html = email.html.unwrap();
        assert!(html.contains("Ona &lt;b&gt;"));
    }

    #[tokio::test]
    async fn dispatcher_mails_the_operator() {
        let mailer = Arc::new(RecordingMailer::default());
        let (notifier, rx) = Notifier::channel();
        let handle = spawn_dispatcher(rx, mailer.clone(), "shop@example.com".to_string());

        notifier.notify(Notification::NewReservation(reservation()));
        drop(notifier);
        handle.await.unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "shop@example.com");
        assert!(sent[0].text.contains("Nėra papildomos informacijos"));
    }

    #[tokio::test]
    async fn dispatcher_survives_send_failures() {
        let mailer = Arc::new(RecordingMailer::failing(1));
        let (notifier, rx) = Notifier::channel();
        let handle = spawn_dispatcher(rx, mailer.clone(), "shop@example.com".to_string());

        notifier.notify(Notification::NewReservation(reservation()));
        notifier.notify(Notification::NewReservation(reservation()));
        drop(notifier);
        handle.await.unwrap();

        assert_eq!(mailer.sent().len(), 1);
    }

    #[test]
    fn disabled_notifier_drops_silently() {
        Notifier::disabled().notify(Notification::NewReservation(reservation()));
    }
}
