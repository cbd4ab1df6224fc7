use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::context::{require_approver, LedgerContext};
use super::domain::{
    AcademicStatus, Actor, AdmissionNo, AdmissionStatus, Attendance, BatchSnapshot,
    CounsellorRef, Enrollment, EnrollmentNo, PaymentSummary,
};
use super::error::{FieldError, LedgerError};
use super::events::DomainEvent;
use super::fees::{build_fee_structure, revise_fee_structure, FeeTerms};
use super::repository::{LedgerRepository, RepositoryError};
use super::sequencer::IdentifierKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTerms {
    pub name: String,
    /// Defaults to the admission's training branch.
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEnrollment {
    pub admission: AdmissionNo,
    pub batch: BatchTerms,
    pub fee: FeeTerms,
    /// Defaults to the admission's counsellor.
    #[serde(default)]
    pub counsellor: Option<CounsellorRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceUpdate {
    pub sessions_held: u32,
    pub sessions_attended: u32,
}

pub struct EnrollmentService<R> {
    ctx: LedgerContext<R>,
}

impl<R> EnrollmentService<R>
where
    R: LedgerRepository + 'static,
{
    pub fn new(ctx: LedgerContext<R>) -> Self {
        Self { ctx }
    }

    /// Enroll an approved admission, snapshotting the fee structure.
    pub fn create(&self, actor: &Actor, request: NewEnrollment) -> Result<Enrollment, LedgerError> {
        let admission = self.ctx.admission(&request.admission)?;
        if admission.status != AdmissionStatus::Approved {
            return Err(LedgerError::Precondition(format!(
                "admission {} is {}; only approved admissions can be enrolled",
                admission.admission_no,
                admission.status.label()
            )));
        }
        if let Some(existing) = self
            .ctx
            .repository
            .enrollment_for_admission(&admission.admission_no)?
        {
            return Err(enrollment_exists(&admission.admission_no, &existing.enrollment_no));
        }

        let course = self.ctx.course(&admission.course)?;
        let batch = batch_snapshot(request.batch, &admission.training_branch)?;
        let fee_structure = build_fee_structure(&request.fee, course.fee)?;

        let now = self.ctx.clock.now();
        let mut draft = Enrollment {
            enrollment_no: EnrollmentNo(String::new()),
            student: admission.student.clone(),
            course: admission.course.clone(),
            admission: admission.admission_no.clone(),
            batch,
            fee_structure,
            payment: PaymentSummary::default(),
            academic_status: AcademicStatus::Active,
            attendance: Attendance::default(),
            counsellor: request
                .counsellor
                .unwrap_or_else(|| admission.counsellor.clone()),
            settled_payments: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        draft.refresh_balance();

        let enrollment = self
            .ctx
            .sequencer
            .issue(
                self.ctx.repository.as_ref(),
                IdentifierKind::Enrollment,
                self.ctx.clock.year(),
                |code| {
                    let mut enrollment = draft.clone();
                    enrollment.enrollment_no = EnrollmentNo(code);
                    self.ctx.repository.insert_enrollment(enrollment)
                },
            )
            .map_err(|err| match err {
                LedgerError::Conflict(_) => match self
                    .ctx
                    .repository
                    .enrollment_for_admission(&admission.admission_no)
                {
                    Ok(Some(existing)) => {
                        enrollment_exists(&admission.admission_no, &existing.enrollment_no)
                    }
                    _ => err,
                },
                other => other,
            })?;

        info!(
            enrollment = %enrollment.enrollment_no,
            admission = %enrollment.admission,
            fee_type = enrollment.fee_structure.fee_type.label(),
            final_amount = enrollment.fee_structure.final_amount,
            actor = %actor.id,
            "enrollment created"
        );
        self.ctx.events.publish(DomainEvent::EnrollmentCreated {
            enrollment: enrollment.clone(),
            actor: actor.id.clone(),
        });
        Ok(enrollment)
    }

    pub fn get(&self, no: &EnrollmentNo) -> Result<Enrollment, LedgerError> {
        self.ctx.enrollment(no)
    }

    /// Replace the fee structure of an enrollment.
    pub fn revise_fee_structure(
        &self,
        actor: &Actor,
        no: &EnrollmentNo,
        terms: FeeTerms,
    ) -> Result<Enrollment, LedgerError> {
        require_approver(actor, "revise fee structures")?;
        let current = self.ctx.enrollment(no)?;
        let fee_structure = revise_fee_structure(&current, &terms)?;

        let mut next = current;
        next.fee_structure = fee_structure;
        next.updated_at = self.ctx.clock.now();
        let stored = self.store(no, next)?;

        info!(
            enrollment = %stored.enrollment_no,
            fee_type = stored.fee_structure.fee_type.label(),
            final_amount = stored.fee_structure.final_amount,
            pending_amount = stored.payment.pending_amount,
            actor = %actor.id,
            "fee structure revised"
        );
        self.ctx.events.publish(DomainEvent::FeeStructureRevised {
            enrollment: stored.clone(),
            actor: actor.id.clone(),
        });
        Ok(stored)
    }

    pub fn update_academic_status(
        &self,
        actor: &Actor,
        no: &EnrollmentNo,
        status: &str,
    ) -> Result<Enrollment, LedgerError> {
        let target = status
            .parse::<AcademicStatus>()
            .map_err(|err| LedgerError::invalid("academic_status", err.to_string()))?;
        let current = self.ctx.enrollment(no)?;
        if current.academic_status == target {
            return Err(LedgerError::Conflict(format!(
                "enrollment {no} is already {}",
                target.label()
            )));
        }

        let from = current.academic_status;
        let mut next = current;
        next.academic_status = from.transition(target)?;
        next.updated_at = self.ctx.clock.now();
        let stored = self.store(no, next)?;

        info!(
            enrollment = %stored.enrollment_no,
            from = from.label(),
            to = stored.academic_status.label(),
            actor = %actor.id,
            "academic status changed"
        );
        Ok(stored)
    }

    pub fn record_attendance(
        &self,
        actor: &Actor,
        no: &EnrollmentNo,
        update: AttendanceUpdate,
    ) -> Result<Enrollment, LedgerError> {
        if update.sessions_attended > update.sessions_held {
            return Err(LedgerError::invalid(
                "sessions_attended",
                format!(
                    "{} sessions attended exceeds the {} sessions held",
                    update.sessions_attended, update.sessions_held
                ),
            ));
        }

        let mut next = self.ctx.enrollment(no)?;
        next.attendance = Attendance {
            sessions_held: update.sessions_held,
            sessions_attended: update.sessions_attended,
        };
        next.updated_at = self.ctx.clock.now();
        let stored = self.store(no, next)?;
        info!(
            enrollment = %stored.enrollment_no,
            held = update.sessions_held,
            attended = update.sessions_attended,
            actor = %actor.id,
            "attendance recorded"
        );
        Ok(stored)
    }

    /// Delete an enrollment that has no payments recorded against it.
    pub fn delete(&self, actor: &Actor, no: &EnrollmentNo) -> Result<Enrollment, LedgerError> {
        require_approver(actor, "delete enrollments")?;
        let removed = self
            .ctx
            .repository
            .delete_enrollment(no)
            .map_err(|err| match err {
                RepositoryError::Referenced { .. } => LedgerError::Precondition(format!(
                    "enrollment {no} has payments recorded against it and cannot be deleted"
                )),
                RepositoryError::NotFound => LedgerError::not_found("enrollment", no),
                other => other.into(),
            })?;
        info!(enrollment = %removed.enrollment_no, actor = %actor.id, "enrollment deleted");
        Ok(removed)
    }

    fn store(&self, no: &EnrollmentNo, next: Enrollment) -> Result<Enrollment, LedgerError> {
        self.ctx
            .repository
            .update_enrollment(next)
            .map_err(|err| match err {
                RepositoryError::StaleRevision => LedgerError::Conflict(format!(
                    "enrollment {no} was changed by someone else, reload and retry"
                )),
                RepositoryError::NotFound => LedgerError::not_found("enrollment", no),
                other => other.into(),
            })
    }
}

fn batch_snapshot(terms: BatchTerms, default_branch: &str) -> Result<BatchSnapshot, LedgerError> {
    let mut errors = Vec::new();
    let name = terms.name.trim().to_string();
    if name.is_empty() {
        errors.push(FieldError::new("batch.name", "batch name is required"));
    }
    if let (Some(start), Some(end)) = (terms.start_date, terms.end_date) {
        if end < start {
            errors.push(FieldError::new(
                "batch.end_date",
                format!("batch ends on {end}, before it starts on {start}"),
            ));
        }
    }
    if !errors.is_empty() {
        return Err(LedgerError::Validation(errors));
    }

    let branch = terms
        .branch
        .map(|branch| branch.trim().to_string())
        .filter(|branch| !branch.is_empty())
        .unwrap_or_else(|| default_branch.to_string());
    Ok(BatchSnapshot {
        name,
        branch,
        start_date: terms.start_date,
        end_date: terms.end_date,
    })
}

fn enrollment_exists(admission: &AdmissionNo, existing: &EnrollmentNo) -> LedgerError {
    LedgerError::Conflict(format!(
        "admission {admission} is already enrolled as {existing}"
    ))
}
