use std::sync::Arc;

use super::clock::{Clock, SystemClock};
use super::documents::DocumentStore;
use super::domain::{
    Actor, Admission, AdmissionNo, Course, CourseId, Enrollment, EnrollmentNo, Payment,
    PaymentNo, Student, StudentId,
};
use super::error::LedgerError;
use super::events::EventBus;
use super::repository::LedgerRepository;
use super::sequencer::Sequencer;

/// Collaborators shared by every ledger service.
pub struct LedgerContext<R> {
    pub(crate) repository: Arc<R>,
    pub(crate) documents: Arc<dyn DocumentStore>,
    pub(crate) events: EventBus,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) sequencer: Sequencer,
}

impl<R> Clone for LedgerContext<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            documents: Arc::clone(&self.documents),
            events: self.events.clone(),
            clock: Arc::clone(&self.clock),
            sequencer: self.sequencer,
        }
    }
}

impl<R> LedgerContext<R>
where
    R: LedgerRepository + 'static,
{
    pub fn new(repository: Arc<R>, documents: Arc<dyn DocumentStore>, events: EventBus) -> Self {
        Self {
            repository,
            documents,
            events,
            clock: Arc::new(SystemClock),
            sequencer: Sequencer::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sequencer(mut self, sequencer: Sequencer) -> Self {
        self.sequencer = sequencer;
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub(crate) fn student(&self, id: &StudentId) -> Result<Student, LedgerError> {
        self.repository
            .fetch_student(id)?
            .ok_or_else(|| LedgerError::not_found("student", id))
    }

    pub(crate) fn course(&self, id: &CourseId) -> Result<Course, LedgerError> {
        self.repository
            .fetch_course(id)?
            .ok_or_else(|| LedgerError::not_found("course", id))
    }

    pub(crate) fn admission(&self, no: &AdmissionNo) -> Result<Admission, LedgerError> {
        self.repository
            .fetch_admission(no)?
            .ok_or_else(|| LedgerError::not_found("admission", no))
    }

    pub(crate) fn enrollment(&self, no: &EnrollmentNo) -> Result<Enrollment, LedgerError> {
        self.repository
            .fetch_enrollment(no)?
            .ok_or_else(|| LedgerError::not_found("enrollment", no))
    }

    pub(crate) fn payment(&self, no: &PaymentNo) -> Result<Payment, LedgerError> {
        self.repository
            .fetch_payment(no)?
            .ok_or_else(|| LedgerError::not_found("payment", no))
    }
}

pub(crate) fn require_approver(actor: &Actor, action: &str) -> Result<(), LedgerError> {
    if actor.role.is_approver() {
        Ok(())
    } else {
        Err(LedgerError::Forbidden(format!(
            "only approvers or admins may {action}; {} is a {}",
            actor.id,
            actor.role.label()
        )))
    }
}

/// Trim and drop empty optional text.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
