//! Payment submission and the two-party verification workflow.
//!
//! A counsellor records a payment, which is validated against the enrollment's fee structure
//! and stored as pending. An approver then approves it, folding the amount into the
//! enrollment balance in the same store operation that flips the payment, or rejects it,
//! leaving the balance untouched.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::context::{clean, require_approver, LedgerContext};
use super::domain::{
    Actor, EmiNumber, Enrollment, EnrollmentNo, FeeType, Payment, PaymentMode, PaymentNo, Role,
    VerificationStatus,
};
use super::error::LedgerError;
use super::events::{DomainEvent, PaymentApproved};
use super::fees::Settlement;
use super::repository::{LedgerRepository, RepositoryError};
use super::sequencer::IdentifierKind;
use super::validator::{validate_payment, PaymentRejection, ProposedPayment};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSubmission {
    pub enrollment: EnrollmentNo,
    pub amount_received: u64,
    pub fee_type: FeeType,
    #[serde(default)]
    pub emi_number: Option<EmiNumber>,
    pub payment_mode: PaymentMode,
    /// Defaults to today.
    #[serde(default)]
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub transaction_reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Per-payment outcome of [`PaymentService::bulk_approve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkApprovalReport {
    pub approved: Vec<Payment>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub payment_no: PaymentNo,
    pub reason: String,
    pub kind: &'static str,
}

pub struct PaymentService<R> {
    ctx: LedgerContext<R>,
}

impl<R> PaymentService<R>
where
    R: LedgerRepository + 'static,
{
    pub fn new(ctx: LedgerContext<R>) -> Self {
        Self { ctx }
    }

    /// Validate and record a payment as pending verification.
    pub fn submit(
        &self,
        actor: &Actor,
        submission: PaymentSubmission,
    ) -> Result<Payment, LedgerError> {
        let enrollment = self.ctx.enrollment(&submission.enrollment)?;
        let existing = self
            .ctx
            .repository
            .payments_for_enrollment(&enrollment.enrollment_no)?;
        validate_payment(
            &enrollment,
            &existing,
            &ProposedPayment {
                amount_received: submission.amount_received,
                fee_type: submission.fee_type,
                emi_number: submission.emi_number,
            },
        )?;

        let draft = Payment {
            payment_no: PaymentNo(String::new()),
            enrollment: enrollment.enrollment_no.clone(),
            student: enrollment.student.clone(),
            amount_received: submission.amount_received,
            fee_type: submission.fee_type,
            emi_number: submission.emi_number,
            payment_mode: submission.payment_mode,
            payment_date: submission
                .payment_date
                .unwrap_or_else(|| self.ctx.clock.today()),
            transaction_reference: clean(submission.transaction_reference),
            notes: clean(submission.notes),
            received_by: actor.id.clone(),
            counsellor: actor.as_counsellor(),
            verification_status: VerificationStatus::Pending,
            verified_by: None,
            verified_at: None,
            verification_notes: None,
            created_at: self.ctx.clock.now(),
        };

        let mut open_claim = None;
        let issued = self.ctx.sequencer.issue(
            self.ctx.repository.as_ref(),
            IdentifierKind::Payment,
            self.ctx.clock.year(),
            |code| {
                let mut payment = draft.clone();
                payment.payment_no = PaymentNo(code);
                match self.ctx.repository.insert_payment(payment) {
                    Err(RepositoryError::OpenClaim(claim)) => {
                        open_claim = Some(claim.clone());
                        Err(RepositoryError::OpenClaim(claim))
                    }
                    other => other,
                }
            },
        );
        let payment = match (issued, open_claim) {
            (Ok(payment), _) => payment,
            (Err(_), Some(_)) if draft.fee_type == FeeType::OneTime => {
                return Err(PaymentRejection::AlreadyHasPayments.into());
            }
            (Err(_), Some(claim)) => {
                return Err(LedgerError::Conflict(format!(
                    "payment {claim} for {} is already awaiting verification",
                    slot_label(&draft)
                )));
            }
            (Err(err), None) => return Err(err),
        };

        info!(
            payment = %payment.payment_no,
            enrollment = %payment.enrollment,
            amount = payment.amount_received,
            fee_type = payment.fee_type.label(),
            emi = payment.emi_number.map(EmiNumber::ordinal),
            actor = %actor.id,
            "payment submitted"
        );
        self.ctx.events.publish(DomainEvent::PaymentSubmitted {
            payment: payment.clone(),
            actor: actor.id.clone(),
        });
        Ok(payment)
    }

    pub fn get(&self, no: &PaymentNo) -> Result<Payment, LedgerError> {
        self.ctx.payment(no)
    }

    pub fn for_enrollment(&self, no: &EnrollmentNo) -> Result<Vec<Payment>, LedgerError> {
        let enrollment = self.ctx.enrollment(no)?;
        Ok(self
            .ctx
            .repository
            .payments_for_enrollment(&enrollment.enrollment_no)?)
    }

    /// Approve a pending payment and credit the enrollment.
    ///
    /// A payment whose slot was settled by another approval in the meantime fails with a
    /// conflict and stays pending, so the approver can reject it.
    pub fn approve(
        &self,
        actor: &Actor,
        no: &PaymentNo,
        notes: Option<String>,
    ) -> Result<(Payment, Enrollment), LedgerError> {
        require_approver(actor, "approve payments")?;
        let payment = self.ctx.payment(no)?;
        if payment.received_by == actor.id && actor.role != Role::Admin {
            return Err(LedgerError::Forbidden(format!(
                "payment {no} was recorded by {}; a second staff member must approve it",
                actor.id
            )));
        }

        let approved = payment.verified(
            VerificationStatus::Approved,
            &actor.id,
            clean(notes),
            self.ctx.clock.now(),
        )?;
        let settlement = Settlement::for_payment(&payment);
        let (approved, enrollment) = self
            .ctx
            .repository
            .record_approval(approved, &settlement)
            .map_err(|err| finalize_failure(no, err))?;

        info!(
            payment = %approved.payment_no,
            enrollment = %enrollment.enrollment_no,
            amount = approved.amount_received,
            total_paid = enrollment.payment.total_paid,
            pending_amount = enrollment.payment.pending_amount,
            actor = %actor.id,
            "payment approved"
        );
        self.publish_approval(&approved, &enrollment);
        Ok((approved, enrollment))
    }

    fn publish_approval(&self, payment: &Payment, enrollment: &Enrollment) {
        let loaded = self
            .ctx
            .student(&enrollment.student)
            .and_then(|student| Ok((student, self.ctx.course(&enrollment.course)?)));
        match loaded {
            Ok((student, course)) => {
                self.ctx
                    .events
                    .publish(DomainEvent::PaymentApproved(Box::new(PaymentApproved {
                        payment: payment.clone(),
                        enrollment: enrollment.clone(),
                        student,
                        course,
                    })));
            }
            Err(err) => warn!(
                payment = %payment.payment_no,
                error = %err,
                "approval committed but confirmation details could not be loaded"
            ),
        }
    }

    /// Reject a pending payment. The enrollment balance is never touched.
    pub fn reject(
        &self,
        actor: &Actor,
        no: &PaymentNo,
        notes: Option<String>,
    ) -> Result<Payment, LedgerError> {
        require_approver(actor, "reject payments")?;
        let payment = self.ctx.payment(no)?;
        let rejected = payment.verified(
            VerificationStatus::Rejected,
            &actor.id,
            clean(notes),
            self.ctx.clock.now(),
        )?;
        let rejected = self
            .ctx
            .repository
            .record_rejection(rejected)
            .map_err(|err| finalize_failure(no, err))?;

        info!(
            payment = %rejected.payment_no,
            enrollment = %rejected.enrollment,
            amount = rejected.amount_received,
            actor = %actor.id,
            "payment rejected"
        );
        self.ctx.events.publish(DomainEvent::PaymentRejected {
            payment: rejected.clone(),
            actor: actor.id.clone(),
        });
        Ok(rejected)
    }

    /// Approve each payment independently; one failure never aborts the rest.
    pub fn bulk_approve(
        &self,
        actor: &Actor,
        payments: &[PaymentNo],
        notes: Option<String>,
    ) -> Result<BulkApprovalReport, LedgerError> {
        require_approver(actor, "approve payments")?;
        if payments.is_empty() {
            return Err(LedgerError::invalid(
                "payment_nos",
                "at least one payment number is required",
            ));
        }

        let mut report = BulkApprovalReport::default();
        for no in payments {
            match self.approve(actor, no, notes.clone()) {
                Ok((payment, _)) => report.approved.push(payment),
                Err(err) => {
                    warn!(payment = %no, error = %err, "bulk approval skipped payment");
                    report.failed.push(BulkFailure {
                        payment_no: no.clone(),
                        reason: err.to_string(),
                        kind: err.kind(),
                    });
                }
            }
        }

        info!(
            approved = report.approved.len(),
            failed = report.failed.len(),
            actor = %actor.id,
            "bulk approval finished"
        );
        Ok(report)
    }
}

fn slot_label(payment: &Payment) -> String {
    match payment.emi_number {
        Some(emi) => format!("{emi} of enrollment {}", payment.enrollment),
        None => format!("enrollment {}", payment.enrollment),
    }
}

fn finalize_failure(no: &PaymentNo, err: RepositoryError) -> LedgerError {
    match err {
        RepositoryError::NotFound => LedgerError::not_found("payment", no),
        RepositoryError::Settlement(reason) => {
            LedgerError::Conflict(format!("payment {no} cannot be approved: {reason}"))
        }
        other => other.into(),
    }
}
