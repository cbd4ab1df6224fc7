//! Domain events emitted after a lifecycle change has been committed.
//!
//! Subscribers run after the write and fail independently: the bus logs a subscriber error
//! and moves on, so delivery problems (mail, audit sinks) never undo an admission approval or
//! a payment approval.

use std::sync::Arc;

use tracing::{info, warn};

use super::domain::{
    Admission, AdmissionStatus, Course, Enrollment, Payment, StaffId, Student,
};
use super::notifications::NotificationError;

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    AdmissionCreated {
        admission: Admission,
        actor: StaffId,
    },
    AdmissionStatusChanged {
        admission: Admission,
        from: AdmissionStatus,
        actor: StaffId,
    },
    AdmissionApproved(Box<AdmissionApproved>),
    AdmissionDeleted {
        admission: Admission,
        actor: StaffId,
    },
    EnrollmentCreated {
        enrollment: Enrollment,
        actor: StaffId,
    },
    FeeStructureRevised {
        enrollment: Enrollment,
        actor: StaffId,
    },
    PaymentSubmitted {
        payment: Payment,
        actor: StaffId,
    },
    PaymentApproved(Box<PaymentApproved>),
    PaymentRejected {
        payment: Payment,
        actor: StaffId,
    },
}

/// Admission entered `approved`; carries what the confirmation email needs.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionApproved {
    pub admission: Admission,
    pub student: Student,
    pub course: Course,
    pub approved_by: StaffId,
}

/// Payment verified and folded into the enrollment balance.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentApproved {
    pub payment: Payment,
    pub enrollment: Enrollment,
    pub student: Student,
    pub course: Course,
}

impl DomainEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            DomainEvent::AdmissionCreated { .. } => "admission_created",
            DomainEvent::AdmissionStatusChanged { .. } => "admission_status_changed",
            DomainEvent::AdmissionApproved(_) => "admission_approved",
            DomainEvent::AdmissionDeleted { .. } => "admission_deleted",
            DomainEvent::EnrollmentCreated { .. } => "enrollment_created",
            DomainEvent::FeeStructureRevised { .. } => "fee_structure_revised",
            DomainEvent::PaymentSubmitted { .. } => "payment_submitted",
            DomainEvent::PaymentApproved(_) => "payment_approved",
            DomainEvent::PaymentRejected { .. } => "payment_rejected",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error(transparent)]
    Notification(#[from] NotificationError),
    #[error("{0}")]
    Other(String),
}

pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &'static str;
    fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError>;
}

/// In-process fan-out to independently failing subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn publish(&self, event: DomainEvent) {
        for subscriber in &self.subscribers {
            if let Err(err) = subscriber.handle(&event) {
                warn!(
                    subscriber = subscriber.name(),
                    event = event.name(),
                    error = %err,
                    "event subscriber failed; committed change is kept"
                );
            }
        }
    }
}

/// Writes one structured record per domain event under the `activity` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityLogSubscriber;

impl EventSubscriber for ActivityLogSubscriber {
    fn name(&self) -> &'static str {
        "activity_log"
    }

    fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError> {
        let name = event.name();
        match event {
            DomainEvent::AdmissionCreated { admission, actor } => info!(
                target: "activity",
                event = name,
                admission = %admission.admission_no,
                student = %admission.student,
                course = %admission.course,
                %actor,
            ),
            DomainEvent::AdmissionStatusChanged {
                admission,
                from,
                actor,
            } => info!(
                target: "activity",
                event = name,
                admission = %admission.admission_no,
                from = from.label(),
                to = admission.status.label(),
                %actor,
            ),
            DomainEvent::AdmissionApproved(approved) => info!(
                target: "activity",
                event = name,
                admission = %approved.admission.admission_no,
                actor = %approved.approved_by,
            ),
            DomainEvent::AdmissionDeleted { admission, actor } => info!(
                target: "activity",
                event = name,
                admission = %admission.admission_no,
                %actor,
            ),
            DomainEvent::EnrollmentCreated { enrollment, actor }
            | DomainEvent::FeeStructureRevised { enrollment, actor } => info!(
                target: "activity",
                event = name,
                enrollment = %enrollment.enrollment_no,
                fee_type = enrollment.fee_structure.fee_type.label(),
                final_amount = enrollment.fee_structure.final_amount,
                %actor,
            ),
            DomainEvent::PaymentSubmitted { payment, actor }
            | DomainEvent::PaymentRejected { payment, actor } => info!(
                target: "activity",
                event = name,
                payment = %payment.payment_no,
                enrollment = %payment.enrollment,
                amount = payment.amount_received,
                %actor,
            ),
            DomainEvent::PaymentApproved(approved) => info!(
                target: "activity",
                event = name,
                payment = %approved.payment.payment_no,
                enrollment = %approved.enrollment.enrollment_no,
                amount = approved.payment.amount_received,
                total_paid = approved.enrollment.payment.total_paid,
                pending_amount = approved.enrollment.payment.pending_amount,
            ),
        }
        Ok(())
    }
}
