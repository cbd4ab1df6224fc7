use super::domain::{
    Admission, AdmissionNo, AdmissionStatus, Course, CourseId, Enrollment, EnrollmentNo, Payment, PaymentNo,
    Student, StudentId, VerificationStatus,
};
use super::fees::{Settlement, SettlementError};
use super::sequencer::IdentifierKind;

/// Storage abstraction over the shared document store.
///
/// Every method is one round trip. Methods that guard an invariant under concurrency
/// (uniqueness, open-claim serialisation, settlement compare-and-set, optimistic revisions)
/// must perform their check and write atomically.
pub trait LedgerRepository: Send + Sync {
    /// Greatest identifier of `kind` matching `<PREFIX><year>NNNN`, if any.
    fn latest_identifier(
        &self,
        kind: IdentifierKind,
        year: i32,
    ) -> Result<Option<String>, RepositoryError>;
    /// Rows of `kind` created during the calendar `year`.
    fn count_created_in_year(&self, kind: IdentifierKind, year: i32)
        -> Result<u64, RepositoryError>;

    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError>;
    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError>;
    /// Fails with [`RepositoryError::Referenced`] while any admission points at the student.
    fn delete_student(&self, id: &StudentId) -> Result<Student, RepositoryError>;

    fn insert_course(&self, course: Course) -> Result<Course, RepositoryError>;
    fn fetch_course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError>;
    /// Fails with [`RepositoryError::Referenced`] while any admission or enrollment points at it.
    fn delete_course(&self, id: &CourseId) -> Result<Course, RepositoryError>;

    /// Unique on `admission_no`; refuses a second active admission for the same pair.
    fn insert_admission(&self, admission: Admission) -> Result<Admission, RepositoryError>;
    fn fetch_admission(&self, no: &AdmissionNo) -> Result<Option<Admission>, RepositoryError>;
    /// Compare-and-set on status and revision: stores `admission` only while the stored row is
    /// still in `expected` and still at `admission.revision`, so exactly one concurrent write
    /// from a given snapshot wins. Bumps the revision on success.
    fn update_admission(
        &self,
        admission: Admission,
        expected: AdmissionStatus,
    ) -> Result<Admission, RepositoryError>;
    /// Removes the admission only while it is still pending.
    fn delete_admission(&self, no: &AdmissionNo) -> Result<Admission, RepositoryError>;
    fn active_admission(
        &self,
        student: &StudentId,
        course: &CourseId,
    ) -> Result<Option<Admission>, RepositoryError>;

    /// Unique on `enrollment_no` and on the admission back-reference.
    fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, RepositoryError>;
    fn fetch_enrollment(&self, no: &EnrollmentNo) -> Result<Option<Enrollment>, RepositoryError>;
    fn enrollment_for_admission(
        &self,
        admission: &AdmissionNo,
    ) -> Result<Option<Enrollment>, RepositoryError>;
    /// Optimistic write: the stored revision must equal `enrollment.revision`.
    fn update_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, RepositoryError>;
    /// Fails with [`RepositoryError::Referenced`] while payments exist.
    fn delete_enrollment(&self, no: &EnrollmentNo) -> Result<Enrollment, RepositoryError>;

    /// Unique on `payment_no`; refuses a second open payment for the same (enrollment, slot).
    fn insert_payment(&self, payment: Payment) -> Result<Payment, RepositoryError>;
    fn fetch_payment(&self, no: &PaymentNo) -> Result<Option<Payment>, RepositoryError>;
    fn payments_for_enrollment(
        &self,
        enrollment: &EnrollmentNo,
    ) -> Result<Vec<Payment>, RepositoryError>;
    /// Apply `settlement` to the owning enrollment and store `approved` in one step.
    fn record_approval(
        &self,
        approved: Payment,
        settlement: &Settlement,
    ) -> Result<(Payment, Enrollment), RepositoryError>;
    /// Store `rejected` only if the stored payment is still pending.
    fn record_rejection(&self, rejected: Payment) -> Result<Payment, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("duplicate key {key}")]
    DuplicateKey { key: String },
    #[error("record not found")]
    NotFound,
    #[error("{entity} is still referenced by existing {by}")]
    Referenced {
        entity: &'static str,
        by: &'static str,
    },
    #[error("an active admission {0} already exists for this student and course")]
    ActiveAdmissionExists(AdmissionNo),
    #[error("admission {0} already has an enrollment")]
    EnrollmentExists(AdmissionNo),
    #[error("payment {0} is already awaiting verification for this fee slot")]
    OpenClaim(PaymentNo),
    #[error("payment {0} is already {}", .1.label())]
    AlreadyFinalized(PaymentNo, VerificationStatus),
    #[error("record was modified concurrently, reload and retry")]
    StaleRevision,
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
