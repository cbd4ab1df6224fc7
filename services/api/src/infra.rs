use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use admissions_desk::config::NotificationConfig;
use admissions_desk::workflows::admissions::notifications::describe;
use admissions_desk::workflows::admissions::{
    EmailMessage, NotificationDispatcher, NotificationError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Dispatcher that writes each confirmation email to the log instead of a mail relay, keeping
/// a copy of everything it sent.
#[derive(Default)]
pub(crate) struct LoggingMailer {
    bcc: Option<String>,
    outbox: Mutex<Vec<EmailMessage>>,
}

impl LoggingMailer {
    pub(crate) fn new(config: &NotificationConfig) -> Self {
        Self {
            bcc: config.bcc_address.clone(),
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sent(&self) -> Vec<EmailMessage> {
        match self.outbox.lock() {
            Ok(outbox) => outbox.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationDispatcher for LoggingMailer {
    fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        if !message.to.contains('@') {
            return Err(NotificationError::InvalidRecipient(message.to.clone()));
        }
        let bcc = if message.bcc_submission_copy {
            self.bcc.as_deref()
        } else {
            None
        };
        info!(
            target: "mailer",
            bcc = bcc.unwrap_or("-"),
            "{}",
            describe(message)
        );
        self.outbox
            .lock()
            .map_err(|_| NotificationError::Transport("outbox lock poisoned".to_string()))?
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            subject: "Admission confirmed: Data Analytics (ADM20250001)".to_string(),
            html_body: "<p>Dear Student,</p>".to_string(),
            bcc_submission_copy: true,
        }
    }

    #[test]
    fn mailer_keeps_sent_messages() {
        let mailer = LoggingMailer::new(&NotificationConfig {
            institute_name: "Skyline Institute".to_string(),
            bcc_address: Some("office@skyline.example".to_string()),
        });
        mailer.send(&message("kiran@example.com")).expect("sent");
        assert_eq!(mailer.sent().len(), 1);
    }

    #[test]
    fn mailer_rejects_malformed_recipients() {
        let mailer = LoggingMailer::default();
        let err = mailer.send(&message("kiran")).unwrap_err();
        assert!(matches!(err, NotificationError::InvalidRecipient(_)));
        assert!(mailer.sent().is_empty());
    }
}
