use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::config::NotificationConfig;
use crate::workflows::admissions::fees::{FeeTerms, InstallmentTerms, Settlement};
use crate::workflows::admissions::{
    Actor, Admission, AdmissionNo, AdmissionStatus, AdmissionsDesk, Course, CourseId,
    DocumentKind, DocumentUpload, DomainEvent, EmailMessage, EmiNumber, Enrollment,
    EnrollmentNo, EventBus, EventSubscriber, FeeType, FixedClock, IdentifierKind,
    InMemoryDocumentStore, InMemoryLedger, LedgerContext, LedgerRepository, NewAdmission,
    NewCourse, NewEnrollment, NewStudent, NotificationDispatcher, NotificationError,
    NotificationSubscriber, Payment, PaymentMode, PaymentNo, PaymentSubmission, RepositoryError,
    Role, Sequencer, Student, StudentId, SubscriberError,
};
use crate::workflows::admissions::enrollment::BatchTerms;

pub(super) fn fixed_clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2025, 3, 15, 10, 0, 0).unwrap())
}

pub(super) fn counsellor() -> Actor {
    Actor::new("staff-c1", "Asha Counsellor", Role::Counsellor)
}

pub(super) fn other_counsellor() -> Actor {
    Actor::new("staff-c2", "Ravi Counsellor", Role::Counsellor)
}

pub(super) fn approver() -> Actor {
    Actor::new("staff-a1", "Meera Approver", Role::Approver)
}

pub(super) fn admin() -> Actor {
    Actor::new("staff-x1", "Office Admin", Role::Admin)
}

pub(super) fn notification_config() -> NotificationConfig {
    NotificationConfig {
        institute_name: "Skyline Institute".to_string(),
        bcc_address: None,
    }
}

#[derive(Default)]
pub(super) struct RecordingDispatcher {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub(super) fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().expect("dispatcher mutex poisoned").clone()
    }

    pub(super) fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("smtp relay refused".to_string()));
        }
        self.sent
            .lock()
            .expect("dispatcher mutex poisoned")
            .push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct RecordingSubscriber {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSubscriber {
    pub(super) fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .expect("subscriber mutex poisoned")
            .iter()
            .map(DomainEvent::name)
            .collect()
    }

    pub(super) fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError> {
        self.events
            .lock()
            .expect("subscriber mutex poisoned")
            .push(event.clone());
        Ok(())
    }
}

pub(super) struct FailingSubscriber;

impl EventSubscriber for FailingSubscriber {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn handle(&self, _event: &DomainEvent) -> Result<(), SubscriberError> {
        Err(SubscriberError::Other("audit sink offline".to_string()))
    }
}

pub(super) struct Harness<R> {
    pub(super) desk: Arc<AdmissionsDesk<R>>,
    pub(super) ledger: Arc<R>,
    pub(super) documents: Arc<InMemoryDocumentStore>,
    pub(super) mailer: Arc<RecordingDispatcher>,
    pub(super) events: Arc<RecordingSubscriber>,
}

pub(super) fn harness() -> Harness<InMemoryLedger> {
    harness_with(InMemoryLedger::new())
}

pub(super) fn harness_with<R>(ledger: R) -> Harness<R>
where
    R: LedgerRepository + 'static,
{
    let ledger = Arc::new(ledger);
    let documents = Arc::new(InMemoryDocumentStore::new());
    let mailer = Arc::new(RecordingDispatcher::default());
    let events = Arc::new(RecordingSubscriber::default());
    let bus = EventBus::new()
        .with_subscriber(Arc::new(FailingSubscriber))
        .with_subscriber(events.clone())
        .with_subscriber(Arc::new(NotificationSubscriber::new(
            mailer.clone(),
            notification_config(),
        )));
    let ctx = LedgerContext::new(ledger.clone(), documents.clone(), bus)
        .with_clock(Arc::new(fixed_clock()))
        .with_sequencer(Sequencer::new(5));

    Harness {
        desk: Arc::new(AdmissionsDesk::new(ctx)),
        ledger,
        documents,
        mailer,
        events,
    }
}

pub(super) fn student_request(id: &str) -> NewStudent {
    NewStudent {
        id: StudentId(id.to_string()),
        student_code: format!("STU-{id}"),
        name: "Kiran Patel".to_string(),
        email: Some("kiran@example.com".to_string()),
        phone: Some("+91 98765 43210".to_string()),
        documents: Vec::new(),
    }
}

pub(super) fn course_request(id: &str) -> NewCourse {
    NewCourse {
        id: CourseId(id.to_string()),
        name: "Full Stack Development".to_string(),
        fee: 50_000,
        duration_months: 6,
        active: true,
    }
}

pub(super) fn seed<R>(harness: &Harness<R>) -> (Student, Course)
where
    R: LedgerRepository + 'static,
{
    let student = harness
        .desk
        .catalog
        .register_student(student_request("stu-1"))
        .expect("student registered");
    let course = harness
        .desk
        .catalog
        .register_course(course_request("course-1"))
        .expect("course registered");
    (student, course)
}

pub(super) fn admission_request(student: &Student, course: &Course) -> NewAdmission {
    NewAdmission {
        student: student.id.clone(),
        course: course.id.clone(),
        training_branch: "Pune Central".to_string(),
        counsellor: None,
        documents: vec![DocumentUpload {
            kind: DocumentKind::IdentityProof,
            name: "aadhaar.pdf".to_string(),
            content: b"%PDF-1.4 identity".to_vec(),
        }],
        priority: Default::default(),
        applied_batch: Some("Morning Batch A".to_string()),
        source: Default::default(),
        notes: None,
        email_verified: true,
        admission_date: None,
    }
}

pub(super) fn approved_admission<R>(harness: &Harness<R>) -> Admission
where
    R: LedgerRepository + 'static,
{
    let (student, course) = seed(harness);
    let admission = harness
        .desk
        .admissions
        .create(&counsellor(), admission_request(&student, &course))
        .expect("admission created");
    harness
        .desk
        .admissions
        .transition(
            &approver(),
            &admission.admission_no,
            AdmissionStatus::Approved,
            None,
        )
        .expect("admission approved")
}

pub(super) fn one_time_terms() -> FeeTerms {
    FeeTerms {
        total_amount: Some(55_000),
        discount: 5_000,
        fee_type: FeeType::OneTime,
        installments: Vec::new(),
    }
}

pub(super) fn installment_terms() -> FeeTerms {
    FeeTerms {
        total_amount: Some(50_000),
        discount: 0,
        fee_type: FeeType::Installment,
        installments: vec![
            InstallmentTerms {
                slot: EmiNumber::First,
                amount: 20_000,
                due_date: NaiveDate::from_ymd_opt(2025, 4, 1),
            },
            InstallmentTerms {
                slot: EmiNumber::Second,
                amount: 20_000,
                due_date: NaiveDate::from_ymd_opt(2025, 5, 1),
            },
            InstallmentTerms {
                slot: EmiNumber::Third,
                amount: 10_000,
                due_date: NaiveDate::from_ymd_opt(2025, 6, 1),
            },
        ],
    }
}

pub(super) fn enrollment_request(admission: &Admission, fee: FeeTerms) -> NewEnrollment {
    NewEnrollment {
        admission: admission.admission_no.clone(),
        batch: BatchTerms {
            name: "FSD-MAR-25".to_string(),
            branch: None,
            start_date: NaiveDate::from_ymd_opt(2025, 3, 20),
            end_date: NaiveDate::from_ymd_opt(2025, 9, 20),
        },
        fee,
        counsellor: None,
    }
}

pub(super) fn enrolled<R>(harness: &Harness<R>, fee: FeeTerms) -> Enrollment
where
    R: LedgerRepository + 'static,
{
    let admission = approved_admission(harness);
    harness
        .desk
        .enrollments
        .create(&counsellor(), enrollment_request(&admission, fee))
        .expect("enrollment created")
}

pub(super) fn payment_for(
    enrollment: &Enrollment,
    amount: u64,
    emi: Option<EmiNumber>,
) -> PaymentSubmission {
    PaymentSubmission {
        enrollment: enrollment.enrollment_no.clone(),
        amount_received: amount,
        fee_type: enrollment.fee_structure.fee_type,
        emi_number: emi,
        payment_mode: PaymentMode::Upi,
        payment_date: None,
        transaction_reference: Some("UPI-4471".to_string()),
        notes: None,
    }
}

/// Ledger that reports a duplicate key for the first `collisions` identifier inserts, as if
/// another request had claimed the same number between derivation and insert.
pub(super) struct CollidingLedger {
    pub(super) inner: InMemoryLedger,
    collisions: AtomicU32,
    approve_before_delete: AtomicBool,
}

impl CollidingLedger {
    pub(super) fn new(collisions: u32) -> Self {
        Self {
            inner: InMemoryLedger::new(),
            collisions: AtomicU32::new(collisions),
            approve_before_delete: AtomicBool::new(false),
        }
    }

    /// Approves the admission inside `delete_admission`, as a concurrent approver would.
    pub(super) fn approving_before_delete(self) -> Self {
        self.approve_before_delete.store(true, Ordering::SeqCst);
        self
    }

    fn collide(&self, key: &str) -> Result<(), RepositoryError> {
        let remaining = self.collisions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.collisions.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::DuplicateKey {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

impl LedgerRepository for CollidingLedger {
    fn latest_identifier(
        &self,
        kind: IdentifierKind,
        year: i32,
    ) -> Result<Option<String>, RepositoryError> {
        self.inner.latest_identifier(kind, year)
    }

    fn count_created_in_year(
        &self,
        kind: IdentifierKind,
        year: i32,
    ) -> Result<u64, RepositoryError> {
        self.inner.count_created_in_year(kind, year)
    }

    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError> {
        self.inner.insert_student(student)
    }

    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        self.inner.fetch_student(id)
    }

    fn delete_student(&self, id: &StudentId) -> Result<Student, RepositoryError> {
        self.inner.delete_student(id)
    }

    fn insert_course(&self, course: Course) -> Result<Course, RepositoryError> {
        self.inner.insert_course(course)
    }

    fn fetch_course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError> {
        self.inner.fetch_course(id)
    }

    fn delete_course(&self, id: &CourseId) -> Result<Course, RepositoryError> {
        self.inner.delete_course(id)
    }

    fn insert_admission(&self, admission: Admission) -> Result<Admission, RepositoryError> {
        self.collide(admission.admission_no.as_str())?;
        self.inner.insert_admission(admission)
    }

    fn fetch_admission(&self, no: &AdmissionNo) -> Result<Option<Admission>, RepositoryError> {
        self.inner.fetch_admission(no)
    }

    fn update_admission(
        &self,
        admission: Admission,
        expected: AdmissionStatus,
    ) -> Result<Admission, RepositoryError> {
        self.inner.update_admission(admission, expected)
    }

    fn delete_admission(&self, no: &AdmissionNo) -> Result<Admission, RepositoryError> {
        if self.approve_before_delete.load(Ordering::SeqCst) {
            if let Some(mut row) = self.inner.fetch_admission(no)? {
                row.status = AdmissionStatus::Approved;
                self.inner.update_admission(row, AdmissionStatus::Pending)?;
            }
        }
        self.inner.delete_admission(no)
    }

    fn active_admission(
        &self,
        student: &StudentId,
        course: &CourseId,
    ) -> Result<Option<Admission>, RepositoryError> {
        self.inner.active_admission(student, course)
    }

    fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, RepositoryError> {
        self.collide(enrollment.enrollment_no.as_str())?;
        self.inner.insert_enrollment(enrollment)
    }

    fn fetch_enrollment(&self, no: &EnrollmentNo) -> Result<Option<Enrollment>, RepositoryError> {
        self.inner.fetch_enrollment(no)
    }

    fn enrollment_for_admission(
        &self,
        admission: &AdmissionNo,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        self.inner.enrollment_for_admission(admission)
    }

    fn update_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, RepositoryError> {
        self.inner.update_enrollment(enrollment)
    }

    fn delete_enrollment(&self, no: &EnrollmentNo) -> Result<Enrollment, RepositoryError> {
        self.inner.delete_enrollment(no)
    }

    fn insert_payment(&self, payment: Payment) -> Result<Payment, RepositoryError> {
        self.collide(payment.payment_no.as_str())?;
        self.inner.insert_payment(payment)
    }

    fn fetch_payment(&self, no: &PaymentNo) -> Result<Option<Payment>, RepositoryError> {
        self.inner.fetch_payment(no)
    }

    fn payments_for_enrollment(
        &self,
        enrollment: &EnrollmentNo,
    ) -> Result<Vec<Payment>, RepositoryError> {
        self.inner.payments_for_enrollment(enrollment)
    }

    fn record_approval(
        &self,
        approved: Payment,
        settlement: &Settlement,
    ) -> Result<(Payment, Enrollment), RepositoryError> {
        self.inner.record_approval(approved, settlement)
    }

    fn record_rejection(&self, rejected: Payment) -> Result<Payment, RepositoryError> {
        self.inner.record_rejection(rejected)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
