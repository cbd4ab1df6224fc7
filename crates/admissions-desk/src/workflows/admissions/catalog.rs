use serde::{Deserialize, Serialize};
use tracing::info;

use super::context::{clean, require_approver, LedgerContext};
use super::documents::{purge, upload_all, DocumentUpload};
use super::domain::{Actor, Course, CourseId, Student, StudentId};
use super::error::{FieldError, LedgerError};
use super::repository::{LedgerRepository, RepositoryError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    pub id: StudentId,
    pub student_code: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub documents: Vec<DocumentUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCourse {
    pub id: CourseId,
    pub name: String,
    pub fee: u64,
    pub duration_months: u16,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

/// Student and course records with reference-guarded deletion.
pub struct CatalogService<R> {
    ctx: LedgerContext<R>,
}

impl<R> CatalogService<R>
where
    R: LedgerRepository + 'static,
{
    pub fn new(ctx: LedgerContext<R>) -> Self {
        Self { ctx }
    }

    pub fn register_student(&self, student: NewStudent) -> Result<Student, LedgerError> {
        let mut errors = Vec::new();
        if student.id.as_str().trim().is_empty() {
            errors.push(FieldError::new("id", "student id is required"));
        }
        if student.name.trim().is_empty() {
            errors.push(FieldError::new("name", "student name is required"));
        }
        if student.student_code.trim().is_empty() {
            errors.push(FieldError::new("student_code", "student code is required"));
        }
        let email = clean(student.email);
        if let Some(address) = email.as_deref() {
            if !address.contains('@') {
                errors.push(FieldError::new(
                    "email",
                    format!("'{address}' is not an email address"),
                ));
            }
        }
        if !errors.is_empty() {
            return Err(LedgerError::Validation(errors));
        }

        let documents = upload_all(self.ctx.documents.as_ref(), student.documents)
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;
        let document_urls: Vec<String> = documents.into_iter().map(|doc| doc.url).collect();

        let record = Student {
            id: student.id,
            student_code: student.student_code.trim().to_string(),
            name: student.name.trim().to_string(),
            email,
            phone: clean(student.phone),
            document_urls: document_urls.clone(),
            created_at: self.ctx.clock.now(),
        };

        match self.ctx.repository.insert_student(record) {
            Ok(stored) => {
                info!(student = %stored.id, "student registered");
                Ok(stored)
            }
            Err(err) => {
                purge(
                    self.ctx.documents.as_ref(),
                    document_urls.iter().map(String::as_str),
                    "rejected student",
                );
                Err(err.into())
            }
        }
    }

    pub fn student(&self, id: &StudentId) -> Result<Student, LedgerError> {
        self.ctx.student(id)
    }

    /// Removes the record, then best-effort removes its stored documents.
    pub fn delete_student(&self, actor: &Actor, id: &StudentId) -> Result<Student, LedgerError> {
        require_approver(actor, "delete students")?;
        let removed = self
            .ctx
            .repository
            .delete_student(id)
            .map_err(|err| match err {
                RepositoryError::NotFound => {
                    LedgerError::not_found("student", id)
                }
                other => other.into(),
            })?;
        let purged = purge(
            self.ctx.documents.as_ref(),
            removed.document_urls.iter().map(String::as_str),
            removed.id.as_str(),
        );
        info!(student = %removed.id, actor = %actor.id, purged, "student deleted");
        Ok(removed)
    }

    pub fn register_course(&self, course: NewCourse) -> Result<Course, LedgerError> {
        let mut errors = Vec::new();
        if course.id.as_str().trim().is_empty() {
            errors.push(FieldError::new("id", "course id is required"));
        }
        if course.name.trim().is_empty() {
            errors.push(FieldError::new("name", "course name is required"));
        }
        if course.fee == 0 {
            errors.push(FieldError::new("fee", "course fee must be greater than zero"));
        }
        if course.duration_months == 0 {
            errors.push(FieldError::new(
                "duration_months",
                "course duration must be at least one month",
            ));
        }
        if !errors.is_empty() {
            return Err(LedgerError::Validation(errors));
        }

        let stored = self.ctx.repository.insert_course(Course {
            id: course.id,
            name: course.name.trim().to_string(),
            fee: course.fee,
            duration_months: course.duration_months,
            active: course.active,
            created_at: self.ctx.clock.now(),
        })?;
        info!(course = %stored.id, fee = stored.fee, "course registered");
        Ok(stored)
    }

    pub fn course(&self, id: &CourseId) -> Result<Course, LedgerError> {
        self.ctx.course(id)
    }

    pub fn delete_course(&self, actor: &Actor, id: &CourseId) -> Result<Course, LedgerError> {
        require_approver(actor, "delete courses")?;
        let removed = self
            .ctx
            .repository
            .delete_course(id)
            .map_err(|err| match err {
                RepositoryError::NotFound => {
                    LedgerError::not_found("course", id)
                }
                other => other.into(),
            })?;
        info!(course = %removed.id, actor = %actor.id, "course deleted");
        Ok(removed)
    }
}
