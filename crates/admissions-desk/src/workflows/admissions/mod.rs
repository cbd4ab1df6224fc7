//! Admission, enrollment and payment lifecycle.
//!
//! Services are synchronous and talk to storage through [`LedgerRepository`]; every
//! invariant that must hold under concurrent requests is enforced by a single repository call.
//! Side effects (confirmation email, activity log) hang off the [`EventBus`] and never fail
//! the operation that produced the event.

pub mod admission;
pub mod approval;
pub mod catalog;
pub mod clock;
pub(crate) mod context;
pub mod desk;
pub mod documents;
pub mod domain;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod fees;
pub mod memory;
pub mod notifications;
pub mod repository;
pub mod router;
pub mod sequencer;
pub mod validator;

#[cfg(test)]
mod tests;

pub use admission::{AdmissionChanges, AdmissionService, NewAdmission};
pub use approval::{BulkApprovalReport, BulkFailure, PaymentService, PaymentSubmission};
pub use catalog::{CatalogService, NewCourse, NewStudent};
pub use clock::{Clock, FixedClock, SystemClock};
pub use context::LedgerContext;
pub use desk::AdmissionsDesk;
pub use documents::{DocumentError, DocumentStore, DocumentUpload};
pub use domain::{
    AcademicStatus, Actor, Admission, AdmissionNo, AdmissionSource, AdmissionStatus, Attendance,
    BatchSnapshot, CounsellorRef, Course, CourseId, DocumentKind, DocumentRef, EmiNumber, EmiSlot,
    Enrollment, EnrollmentNo, FeeStructure, FeeType, InstallmentPlan, Payment, PaymentMode,
    PaymentNo, PaymentSummary, Priority, Role, StaffId, Student, StudentId, VerificationStatus,
};
pub use enrollment::{AttendanceUpdate, BatchTerms, EnrollmentService, NewEnrollment};
pub use error::{FieldError, LedgerError};
pub use events::{
    ActivityLogSubscriber, AdmissionApproved, DomainEvent, EventBus, EventSubscriber,
    PaymentApproved, SubscriberError,
};
pub use fees::{FeeTerms, InstallmentTerms, Settlement, SettlementError};
pub use memory::{InMemoryDocumentStore, InMemoryLedger};
pub use notifications::{
    EmailMessage, NotificationDispatcher, NotificationError, NotificationSubscriber,
};
pub use repository::{LedgerRepository, RepositoryError};
pub use router::{actor_from_headers, office_router};
pub use sequencer::{IdentifierKind, SequenceCode, Sequencer};
pub use validator::{validate_payment, PaymentRejection, ProposedPayment};
