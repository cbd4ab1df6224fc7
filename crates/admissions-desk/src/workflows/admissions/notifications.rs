//! Confirmation emails for approved admissions and approved payments.

use std::fmt::Write;
use std::sync::Arc;

use tracing::{debug, info};

use super::domain::{EmiNumber, EmiSlot, Enrollment, FeeType, Student};
use super::events::{
    AdmissionApproved, DomainEvent, EventSubscriber, PaymentApproved, SubscriberError,
};
use crate::config::NotificationConfig;

/// Outbound email as handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    /// Copy the office submission mailbox.
    pub bcc_submission_copy: bool,
}

/// Mail transport. Callers treat every failure as non-fatal.
pub trait NotificationDispatcher: Send + Sync {
    fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("mail transport failed: {0}")]
    Transport(String),
    #[error("recipient address '{0}' was rejected")]
    InvalidRecipient(String),
}

/// Renders confirmation emails from domain events and hands them to the dispatcher.
pub struct NotificationSubscriber {
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: NotificationConfig,
}

impl NotificationSubscriber {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, config: NotificationConfig) -> Self {
        Self { dispatcher, config }
    }

    fn deliver(
        &self,
        student: &Student,
        message: Option<EmailMessage>,
    ) -> Result<(), SubscriberError> {
        let Some(message) = message else {
            debug!(student = %student.id, "student has no email address, skipping notification");
            return Ok(());
        };
        self.dispatcher.send(&message)?;
        info!(to = %message.to, subject = %message.subject, "confirmation email dispatched");
        Ok(())
    }
}

impl EventSubscriber for NotificationSubscriber {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError> {
        match event {
            DomainEvent::AdmissionApproved(approved) => self.deliver(
                &approved.student,
                admission_confirmation(approved, &self.config),
            ),
            DomainEvent::PaymentApproved(approved) => self.deliver(
                &approved.student,
                payment_confirmation(approved, &self.config),
            ),
            _ => Ok(()),
        }
    }
}

fn recipient(student: &Student) -> Option<String> {
    student
        .email
        .as_deref()
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_string)
}

/// Admission confirmation listing the student, course, branch, batch and counsellor.
pub fn admission_confirmation(
    approved: &AdmissionApproved,
    config: &NotificationConfig,
) -> Option<EmailMessage> {
    let to = recipient(&approved.student)?;
    let admission = &approved.admission;
    let batch = admission.applied_batch.as_deref().unwrap_or("To be announced");

    let mut html = String::new();
    let _ = writeln!(html, "<p>Dear {},</p>", escape_html(&approved.student.name));
    let _ = writeln!(
        html,
        "<p>Your admission <strong>{}</strong> has been approved.</p>",
        escape_html(admission.admission_no.as_str())
    );
    html.push_str("<ul>\n");
    push_item(&mut html, "Student code", &approved.student.student_code);
    push_item(&mut html, "Course", &approved.course.name);
    push_item(&mut html, "Training branch", &admission.training_branch);
    push_item(&mut html, "Batch", batch);
    push_item(&mut html, "Counsellor", &admission.counsellor.name);
    html.push_str("</ul>\n");
    push_signature(&mut html, config);

    Some(EmailMessage {
        to,
        subject: format!(
            "Admission confirmed: {} ({})",
            approved.course.name, admission.admission_no
        ),
        html_body: html,
        bcc_submission_copy: true,
    })
}

/// Payment confirmation; full-payment completion once nothing is outstanding, EMI progress
/// otherwise.
pub fn payment_confirmation(
    approved: &PaymentApproved,
    config: &NotificationConfig,
) -> Option<EmailMessage> {
    let to = recipient(&approved.student)?;
    let payment = &approved.payment;
    let enrollment = &approved.enrollment;
    let completed = payment.fee_type == FeeType::OneTime || enrollment.is_fully_paid();

    let mut html = String::new();
    let _ = writeln!(html, "<p>Dear {},</p>", escape_html(&approved.student.name));
    let _ = writeln!(
        html,
        "<p>We have verified your payment of <strong>₹{}</strong> ({}) for {}.</p>",
        payment.amount_received,
        escape_html(payment.payment_no.as_str()),
        escape_html(&approved.course.name)
    );
    html.push_str("<ul>\n");
    push_item(&mut html, "Enrollment", enrollment.enrollment_no.as_str());
    if let Some(emi) = payment.emi_number {
        push_item(&mut html, "Installment", &emi.to_string());
    }
    push_item(&mut html, "Payment mode", payment.payment_mode.label());
    push_item(&mut html, "Payment date", &payment.payment_date.to_string());
    push_item(&mut html, "Total paid", &format!("₹{}", enrollment.payment.total_paid));
    push_item(
        &mut html,
        "Balance",
        &format!("₹{}", enrollment.payment.pending_amount),
    );
    html.push_str("</ul>\n");

    let subject = if completed {
        html.push_str("<p>Your course fee is now fully paid. Thank you.</p>\n");
        format!("Fee payment complete: {}", approved.course.name)
    } else {
        push_outstanding(&mut html, enrollment);
        match payment.emi_number {
            Some(emi) => format!("{emi} received: {}", approved.course.name),
            None => format!("Payment received: {}", approved.course.name),
        }
    };
    push_signature(&mut html, config);

    Some(EmailMessage {
        to,
        subject,
        html_body: html,
        bcc_submission_copy: true,
    })
}

fn push_outstanding(html: &mut String, enrollment: &Enrollment) {
    let outstanding: Vec<(EmiNumber, EmiSlot)> = enrollment
        .fee_structure
        .installments
        .map(|plan| plan.outstanding())
        .unwrap_or_default();
    if outstanding.is_empty() {
        return;
    }

    html.push_str("<p>Remaining installments:</p>\n<ul>\n");
    for (emi, slot) in outstanding {
        let due = slot
            .due_date
            .map(|date| format!(", due {date}"))
            .unwrap_or_default();
        let _ = writeln!(html, "  <li>{emi}: ₹{}{due}</li>", slot.pending);
    }
    html.push_str("</ul>\n");
}

fn push_item(html: &mut String, label: &str, value: &str) {
    let _ = writeln!(
        html,
        "  <li><strong>{}:</strong> {}</li>",
        label,
        escape_html(value)
    );
}

fn push_signature(html: &mut String, config: &NotificationConfig) {
    let _ = writeln!(
        html,
        "<p>Regards,<br>{}</p>",
        escape_html(&config.institute_name)
    );
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Summary line used by log-only transports and the demo.
pub fn describe(message: &EmailMessage) -> String {
    format!("to={} subject=\"{}\"", message.to, message.subject)
}
