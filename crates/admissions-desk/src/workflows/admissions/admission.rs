//! Admission lifecycle: creation with uploaded documents, guarded edits, the status state
//! machine and pending-only deletion.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::context::{clean, LedgerContext};
use super::documents::{purge, upload_all, DocumentUpload};
use super::domain::{
    Actor, Admission, AdmissionNo, AdmissionSource, AdmissionStatus, CounsellorRef, CourseId,
    Priority, StudentId,
};
use super::error::{FieldError, LedgerError};
use super::events::{AdmissionApproved, DomainEvent};
use super::repository::{LedgerRepository, RepositoryError};
use super::sequencer::IdentifierKind;

/// Intake form for a new admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdmission {
    pub student: StudentId,
    pub course: CourseId,
    pub training_branch: String,
    /// Defaults to the submitting staff member.
    #[serde(default)]
    pub counsellor: Option<CounsellorRef>,
    #[serde(default)]
    pub documents: Vec<DocumentUpload>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub applied_batch: Option<String>,
    #[serde(default)]
    pub source: AdmissionSource,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    /// Defaults to today.
    #[serde(default)]
    pub admission_date: Option<NaiveDate>,
}

/// Edits to non-status fields; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionChanges {
    #[serde(default)]
    pub training_branch: Option<String>,
    #[serde(default)]
    pub counsellor: Option<CounsellorRef>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub applied_batch: Option<String>,
    #[serde(default)]
    pub source: Option<AdmissionSource>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

impl AdmissionChanges {
    fn is_empty(&self) -> bool {
        self == &AdmissionChanges::default()
    }
}

pub struct AdmissionService<R> {
    ctx: LedgerContext<R>,
}

impl<R> AdmissionService<R>
where
    R: LedgerRepository + 'static,
{
    pub fn new(ctx: LedgerContext<R>) -> Self {
        Self { ctx }
    }

    /// Record a pending admission, minting its `ADM` number.
    pub fn create(&self, actor: &Actor, request: NewAdmission) -> Result<Admission, LedgerError> {
        let training_branch = request.training_branch.trim().to_string();
        if training_branch.is_empty() {
            return Err(LedgerError::invalid(
                "training_branch",
                "training branch is required",
            ));
        }

        let student = self.ctx.student(&request.student)?;
        let course = self.ctx.course(&request.course)?;
        if !course.active {
            return Err(LedgerError::invalid(
                "course",
                format!("course {} is not accepting admissions", course.id),
            ));
        }
        if let Some(active) = self.ctx.repository.active_admission(&student.id, &course.id)? {
            return Err(active_admission_conflict(&active.admission_no));
        }

        let documents = upload_all(self.ctx.documents.as_ref(), request.documents)
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;

        let now = self.ctx.clock.now();
        let draft = Admission {
            admission_no: AdmissionNo(String::new()),
            student: student.id,
            course: course.id,
            status: AdmissionStatus::Pending,
            training_branch,
            counsellor: request.counsellor.unwrap_or_else(|| actor.as_counsellor()),
            submitted_by: actor.id.clone(),
            documents,
            priority: request.priority,
            applied_batch: clean(request.applied_batch),
            source: request.source,
            notes: clean(request.notes),
            email_verified: request.email_verified,
            admission_date: request.admission_date.unwrap_or_else(|| self.ctx.clock.today()),
            status_notes: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        };

        let issued = self.ctx.sequencer.issue(
            self.ctx.repository.as_ref(),
            IdentifierKind::Admission,
            self.ctx.clock.year(),
            |code| {
                let mut admission = draft.clone();
                admission.admission_no = AdmissionNo(code);
                self.ctx.repository.insert_admission(admission)
            },
        );

        let admission = match issued {
            Ok(admission) => admission,
            Err(err) => {
                purge(
                    self.ctx.documents.as_ref(),
                    draft.documents.iter().map(|doc| doc.url.as_str()),
                    "rejected admission",
                );
                return Err(err);
            }
        };

        info!(
            admission = %admission.admission_no,
            student = %admission.student,
            course = %admission.course,
            actor = %actor.id,
            documents = admission.documents.len(),
            "admission created"
        );
        self.ctx.events.publish(DomainEvent::AdmissionCreated {
            admission: admission.clone(),
            actor: actor.id.clone(),
        });
        Ok(admission)
    }

    pub fn get(&self, no: &AdmissionNo) -> Result<Admission, LedgerError> {
        self.ctx.admission(no)
    }

    /// Edit non-status fields. Never re-sends the approval email.
    pub fn update(
        &self,
        actor: &Actor,
        no: &AdmissionNo,
        changes: AdmissionChanges,
    ) -> Result<Admission, LedgerError> {
        let current = self.ctx.admission(no)?;
        authorize_edit(actor, &current)?;
        if changes.is_empty() {
            return Ok(current);
        }

        let mut next = current.clone();
        if let Some(branch) = changes.training_branch {
            let branch = branch.trim().to_string();
            if branch.is_empty() {
                return Err(LedgerError::Validation(vec![FieldError::new(
                    "training_branch",
                    "training branch cannot be blank",
                )]));
            }
            next.training_branch = branch;
        }
        if let Some(counsellor) = changes.counsellor {
            next.counsellor = counsellor;
        }
        if let Some(priority) = changes.priority {
            next.priority = priority;
        }
        if changes.applied_batch.is_some() {
            next.applied_batch = clean(changes.applied_batch);
        }
        if let Some(source) = changes.source {
            next.source = source;
        }
        if changes.notes.is_some() {
            next.notes = clean(changes.notes);
        }
        if let Some(verified) = changes.email_verified {
            next.email_verified = verified;
        }
        next.updated_at = self.ctx.clock.now();

        let stored = self
            .ctx
            .repository
            .update_admission(next, current.status)
            .map_err(|err| concurrent_change(no, err))?;
        info!(admission = %stored.admission_no, actor = %actor.id, "admission updated");
        Ok(stored)
    }

    /// Upload more documents and append their URLs to the admission.
    pub fn attach_documents(
        &self,
        actor: &Actor,
        no: &AdmissionNo,
        uploads: Vec<DocumentUpload>,
    ) -> Result<Admission, LedgerError> {
        let current = self.ctx.admission(no)?;
        authorize_edit(actor, &current)?;
        if uploads.is_empty() {
            return Err(LedgerError::invalid(
                "documents",
                "at least one document is required",
            ));
        }

        let added = upload_all(self.ctx.documents.as_ref(), uploads)
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;
        let mut next = current.clone();
        next.documents.extend(added.iter().cloned());
        next.updated_at = self.ctx.clock.now();

        match self.ctx.repository.update_admission(next, current.status) {
            Ok(stored) => {
                info!(
                    admission = %stored.admission_no,
                    added = added.len(),
                    actor = %actor.id,
                    "documents attached"
                );
                Ok(stored)
            }
            Err(err) => {
                purge(
                    self.ctx.documents.as_ref(),
                    added.iter().map(|doc| doc.url.as_str()),
                    no.as_str(),
                );
                Err(concurrent_change(no, err))
            }
        }
    }

    /// Parse a caller-supplied status string, then transition.
    pub fn transition_status(
        &self,
        actor: &Actor,
        no: &AdmissionNo,
        status: &str,
        notes: Option<String>,
    ) -> Result<Admission, LedgerError> {
        let target = status
            .parse::<AdmissionStatus>()
            .map_err(|err| LedgerError::invalid("status", err.to_string()))?;
        self.transition(actor, no, target, notes)
    }

    /// Move the admission along its state machine.
    ///
    /// The store write is a compare-and-set on the previous status, so when two approvals race
    /// only one succeeds and the approval email goes out once.
    pub fn transition(
        &self,
        actor: &Actor,
        no: &AdmissionNo,
        target: AdmissionStatus,
        notes: Option<String>,
    ) -> Result<Admission, LedgerError> {
        let current = self.ctx.admission(no)?;
        authorize_edit(actor, &current)?;
        if current.status == target {
            return Err(LedgerError::Conflict(format!(
                "admission {no} is already {}",
                target.label()
            )));
        }

        let mut next = current.clone();
        next.status = current.status.transition(target)?;
        next.status_notes = clean(notes);
        next.updated_at = self.ctx.clock.now();

        let stored = self
            .ctx
            .repository
            .update_admission(next, current.status)
            .map_err(|err| concurrent_change(no, err))?;

        info!(
            admission = %stored.admission_no,
            from = current.status.label(),
            to = stored.status.label(),
            actor = %actor.id,
            "admission status changed"
        );
        self.ctx.events.publish(DomainEvent::AdmissionStatusChanged {
            admission: stored.clone(),
            from: current.status,
            actor: actor.id.clone(),
        });
        if stored.status == AdmissionStatus::Approved && current.status != AdmissionStatus::Approved
        {
            self.publish_approval(&stored, actor);
        }
        Ok(stored)
    }

    fn publish_approval(&self, admission: &Admission, actor: &Actor) {
        let loaded = self
            .ctx
            .student(&admission.student)
            .and_then(|student| Ok((student, self.ctx.course(&admission.course)?)));
        match loaded {
            Ok((student, course)) => {
                self.ctx
                    .events
                    .publish(DomainEvent::AdmissionApproved(Box::new(AdmissionApproved {
                        admission: admission.clone(),
                        student,
                        course,
                        approved_by: actor.id.clone(),
                    })));
            }
            Err(err) => warn!(
                admission = %admission.admission_no,
                error = %err,
                "approval committed but confirmation details could not be loaded"
            ),
        }
    }

    /// Delete a pending admission together with its stored documents.
    pub fn delete(&self, actor: &Actor, no: &AdmissionNo) -> Result<Admission, LedgerError> {
        let current = self.ctx.admission(no)?;
        authorize_edit(actor, &current)?;
        if current.status != AdmissionStatus::Pending {
            return Err(not_deletable(no, current.status));
        }

        let removed = self
            .ctx
            .repository
            .delete_admission(no)
            .map_err(|err| match err {
                RepositoryError::StaleRevision => LedgerError::Precondition(format!(
                    "admission {no} left pending while it was being deleted"
                )),
                RepositoryError::NotFound => LedgerError::not_found("admission", no),
                other => other.into(),
            })?;
        let purged = purge(
            self.ctx.documents.as_ref(),
            removed.documents.iter().map(|doc| doc.url.as_str()),
            no.as_str(),
        );

        info!(
            admission = %removed.admission_no,
            actor = %actor.id,
            purged,
            "admission deleted"
        );
        self.ctx.events.publish(DomainEvent::AdmissionDeleted {
            admission: removed.clone(),
            actor: actor.id.clone(),
        });
        Ok(removed)
    }
}

/// Pending admissions are editable by their submitter; everything else needs an approver.
fn authorize_edit(actor: &Actor, admission: &Admission) -> Result<(), LedgerError> {
    if actor.role.is_approver() {
        return Ok(());
    }
    if admission.status == AdmissionStatus::Pending && admission.submitted_by == actor.id {
        return Ok(());
    }
    let reason = if admission.status == AdmissionStatus::Pending {
        format!(
            "only the submitting counsellor or an approver may change admission {}",
            admission.admission_no
        )
    } else {
        format!(
            "admission {} is {}; only approvers or admins may change it",
            admission.admission_no,
            admission.status.label()
        )
    };
    Err(LedgerError::Forbidden(reason))
}

fn active_admission_conflict(existing: &AdmissionNo) -> LedgerError {
    LedgerError::Conflict(format!(
        "an active admission {existing} already exists for this student and course"
    ))
}

fn not_deletable(no: &AdmissionNo, status: AdmissionStatus) -> LedgerError {
    LedgerError::Precondition(format!(
        "admission {no} is {}; only pending admissions can be deleted",
        status.label()
    ))
}

fn concurrent_change(no: &AdmissionNo, err: RepositoryError) -> LedgerError {
    match err {
        RepositoryError::StaleRevision => LedgerError::Conflict(format!(
            "admission {no} was changed by someone else, reload and retry"
        )),
        RepositoryError::NotFound => LedgerError::not_found("admission", no),
        other => other.into(),
    }
}
