use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Datelike;

use super::documents::{DocumentError, DocumentStore};
use super::domain::{
    Admission, AdmissionNo, AdmissionStatus, Course, CourseId, Enrollment, EnrollmentNo, Payment,
    PaymentNo, Student, StudentId, VerificationStatus,
};
use super::fees::Settlement;
use super::repository::{LedgerRepository, RepositoryError};
use super::sequencer::{IdentifierKind, SequenceCode};

#[derive(Debug, Default)]
struct LedgerState {
    students: BTreeMap<StudentId, Student>,
    courses: BTreeMap<CourseId, Course>,
    admissions: BTreeMap<AdmissionNo, Admission>,
    enrollments: BTreeMap<EnrollmentNo, Enrollment>,
    payments: BTreeMap<PaymentNo, Payment>,
}

impl LedgerState {
    fn keys_and_years(&self, kind: IdentifierKind) -> Vec<(&str, i32)> {
        match kind {
            IdentifierKind::Admission => self
                .admissions
                .values()
                .map(|row| (row.admission_no.as_str(), row.created_at.year()))
                .collect(),
            IdentifierKind::Enrollment => self
                .enrollments
                .values()
                .map(|row| (row.enrollment_no.as_str(), row.created_at.year()))
                .collect(),
            IdentifierKind::Payment => self
                .payments
                .values()
                .map(|row| (row.payment_no.as_str(), row.created_at.year()))
                .collect(),
        }
    }
}

/// Mutex-backed ledger used by the API service, the demo and the tests.
///
/// Every trait method takes the lock once, so each guarded check-and-write is atomic.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a lost datastore connection; every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    fn state(&self) -> Result<MutexGuard<'_, LedgerState>, RepositoryError> {
        if self.is_offline() {
            return Err(RepositoryError::Unavailable(
                "ledger connection lost".to_string(),
            ));
        }
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("ledger lock poisoned".to_string()))
    }
}

impl LedgerRepository for InMemoryLedger {
    fn latest_identifier(
        &self,
        kind: IdentifierKind,
        year: i32,
    ) -> Result<Option<String>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .keys_and_years(kind)
            .into_iter()
            .filter_map(|(key, _)| SequenceCode::parse(kind, year, key).map(|code| (code, key)))
            .max_by_key(|(code, _)| code.sequence)
            .map(|(_, key)| key.to_string()))
    }

    fn count_created_in_year(
        &self,
        kind: IdentifierKind,
        year: i32,
    ) -> Result<u64, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .keys_and_years(kind)
            .into_iter()
            .filter(|(_, created)| *created == year)
            .count() as u64)
    }

    fn insert_student(&self, student: Student) -> Result<Student, RepositoryError> {
        let mut state = self.state()?;
        if state.students.contains_key(&student.id) {
            return Err(RepositoryError::DuplicateKey {
                key: student.id.to_string(),
            });
        }
        state.students.insert(student.id.clone(), student.clone());
        Ok(student)
    }

    fn fetch_student(&self, id: &StudentId) -> Result<Option<Student>, RepositoryError> {
        Ok(self.state()?.students.get(id).cloned())
    }

    fn delete_student(&self, id: &StudentId) -> Result<Student, RepositoryError> {
        let mut state = self.state()?;
        if state.admissions.values().any(|row| &row.student == id) {
            return Err(RepositoryError::Referenced {
                entity: "student",
                by: "admissions",
            });
        }
        state.students.remove(id).ok_or(RepositoryError::NotFound)
    }

    fn insert_course(&self, course: Course) -> Result<Course, RepositoryError> {
        let mut state = self.state()?;
        if state.courses.contains_key(&course.id) {
            return Err(RepositoryError::DuplicateKey {
                key: course.id.to_string(),
            });
        }
        state.courses.insert(course.id.clone(), course.clone());
        Ok(course)
    }

    fn fetch_course(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError> {
        Ok(self.state()?.courses.get(id).cloned())
    }

    fn delete_course(&self, id: &CourseId) -> Result<Course, RepositoryError> {
        let mut state = self.state()?;
        if state.admissions.values().any(|row| &row.course == id) {
            return Err(RepositoryError::Referenced {
                entity: "course",
                by: "admissions",
            });
        }
        if state.enrollments.values().any(|row| &row.course == id) {
            return Err(RepositoryError::Referenced {
                entity: "course",
                by: "enrollments",
            });
        }
        state.courses.remove(id).ok_or(RepositoryError::NotFound)
    }

    fn insert_admission(&self, admission: Admission) -> Result<Admission, RepositoryError> {
        let mut state = self.state()?;
        if state.admissions.contains_key(&admission.admission_no) {
            return Err(RepositoryError::DuplicateKey {
                key: admission.admission_no.to_string(),
            });
        }
        if let Some(active) = state
            .admissions
            .values()
            .find(|row| row.status.is_active() && row.pair() == admission.pair())
        {
            return Err(RepositoryError::ActiveAdmissionExists(
                active.admission_no.clone(),
            ));
        }
        state
            .admissions
            .insert(admission.admission_no.clone(), admission.clone());
        Ok(admission)
    }

    fn fetch_admission(&self, no: &AdmissionNo) -> Result<Option<Admission>, RepositoryError> {
        Ok(self.state()?.admissions.get(no).cloned())
    }

    fn update_admission(
        &self,
        mut admission: Admission,
        expected: AdmissionStatus,
    ) -> Result<Admission, RepositoryError> {
        let mut state = self.state()?;
        let stored = state
            .admissions
            .get_mut(&admission.admission_no)
            .ok_or(RepositoryError::NotFound)?;
        if stored.status != expected || stored.revision != admission.revision {
            return Err(RepositoryError::StaleRevision);
        }
        admission.revision += 1;
        *stored = admission.clone();
        Ok(admission)
    }

    fn delete_admission(&self, no: &AdmissionNo) -> Result<Admission, RepositoryError> {
        let mut state = self.state()?;
        let status = state
            .admissions
            .get(no)
            .map(|row| row.status)
            .ok_or(RepositoryError::NotFound)?;
        if status != AdmissionStatus::Pending {
            return Err(RepositoryError::StaleRevision);
        }
        state.admissions.remove(no).ok_or(RepositoryError::NotFound)
    }

    fn active_admission(
        &self,
        student: &StudentId,
        course: &CourseId,
    ) -> Result<Option<Admission>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .admissions
            .values()
            .find(|row| row.status.is_active() && row.pair() == (student, course))
            .cloned())
    }

    fn insert_enrollment(&self, mut enrollment: Enrollment) -> Result<Enrollment, RepositoryError> {
        let mut state = self.state()?;
        if state.enrollments.contains_key(&enrollment.enrollment_no) {
            return Err(RepositoryError::DuplicateKey {
                key: enrollment.enrollment_no.to_string(),
            });
        }
        if state
            .enrollments
            .values()
            .any(|row| row.admission == enrollment.admission)
        {
            return Err(RepositoryError::EnrollmentExists(enrollment.admission));
        }
        enrollment.refresh_balance();
        state
            .enrollments
            .insert(enrollment.enrollment_no.clone(), enrollment.clone());
        Ok(enrollment)
    }

    fn fetch_enrollment(&self, no: &EnrollmentNo) -> Result<Option<Enrollment>, RepositoryError> {
        Ok(self.state()?.enrollments.get(no).cloned())
    }

    fn enrollment_for_admission(
        &self,
        admission: &AdmissionNo,
    ) -> Result<Option<Enrollment>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .enrollments
            .values()
            .find(|row| &row.admission == admission)
            .cloned())
    }

    fn update_enrollment(&self, mut enrollment: Enrollment) -> Result<Enrollment, RepositoryError> {
        let mut state = self.state()?;
        let stored = state
            .enrollments
            .get_mut(&enrollment.enrollment_no)
            .ok_or(RepositoryError::NotFound)?;
        if stored.revision != enrollment.revision {
            return Err(RepositoryError::StaleRevision);
        }
        enrollment.revision += 1;
        enrollment.refresh_balance();
        *stored = enrollment.clone();
        Ok(enrollment)
    }

    fn delete_enrollment(&self, no: &EnrollmentNo) -> Result<Enrollment, RepositoryError> {
        let mut state = self.state()?;
        if state.payments.values().any(|row| &row.enrollment == no) {
            return Err(RepositoryError::Referenced {
                entity: "enrollment",
                by: "payments",
            });
        }
        state.enrollments.remove(no).ok_or(RepositoryError::NotFound)
    }

    fn insert_payment(&self, payment: Payment) -> Result<Payment, RepositoryError> {
        let mut state = self.state()?;
        if state.payments.contains_key(&payment.payment_no) {
            return Err(RepositoryError::DuplicateKey {
                key: payment.payment_no.to_string(),
            });
        }
        if let Some(claim) = state.payments.values().find(|row| {
            row.enrollment == payment.enrollment
                && row.emi_number == payment.emi_number
                && row.is_open()
        }) {
            return Err(RepositoryError::OpenClaim(claim.payment_no.clone()));
        }
        state
            .payments
            .insert(payment.payment_no.clone(), payment.clone());
        Ok(payment)
    }

    fn fetch_payment(&self, no: &PaymentNo) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.state()?.payments.get(no).cloned())
    }

    fn payments_for_enrollment(
        &self,
        enrollment: &EnrollmentNo,
    ) -> Result<Vec<Payment>, RepositoryError> {
        let state = self.state()?;
        Ok(state
            .payments
            .values()
            .filter(|row| &row.enrollment == enrollment)
            .cloned()
            .collect())
    }

    fn record_approval(
        &self,
        approved: Payment,
        settlement: &Settlement,
    ) -> Result<(Payment, Enrollment), RepositoryError> {
        let mut state = self.state()?;
        let stored = state
            .payments
            .get(&approved.payment_no)
            .ok_or(RepositoryError::NotFound)?;
        if stored.verification_status != VerificationStatus::Pending {
            return Err(RepositoryError::AlreadyFinalized(
                stored.payment_no.clone(),
                stored.verification_status,
            ));
        }

        let mut enrollment = state
            .enrollments
            .get(&approved.enrollment)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        settlement.apply(&mut enrollment)?;
        enrollment.revision += 1;
        if let Some(at) = approved.verified_at {
            enrollment.updated_at = at;
        }

        state
            .enrollments
            .insert(enrollment.enrollment_no.clone(), enrollment.clone());
        state
            .payments
            .insert(approved.payment_no.clone(), approved.clone());
        Ok((approved, enrollment))
    }

    fn record_rejection(&self, rejected: Payment) -> Result<Payment, RepositoryError> {
        let mut state = self.state()?;
        let stored = state
            .payments
            .get_mut(&rejected.payment_no)
            .ok_or(RepositoryError::NotFound)?;
        if stored.verification_status != VerificationStatus::Pending {
            return Err(RepositoryError::AlreadyFinalized(
                stored.payment_no.clone(),
                stored.verification_status,
            ));
        }
        *stored = rejected.clone();
        Ok(rejected)
    }
}

/// Document store keeping uploads in memory under `memory://<folder>/<n>` URLs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    sequence: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn urls(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn objects(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>, DocumentError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DocumentError::Unavailable(
                "document store offline".to_string(),
            ));
        }
        self.objects
            .lock()
            .map_err(|_| DocumentError::Unavailable("document store lock poisoned".to_string()))
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn store(&self, bytes: &[u8], folder_hint: &str) -> Result<String, DocumentError> {
        let mut objects = self.objects()?;
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let url = format!("memory://{folder_hint}/{id:06}");
        objects.insert(url.clone(), bytes.to_vec());
        Ok(url)
    }

    fn delete(&self, url: &str) -> Result<(), DocumentError> {
        let mut objects = self.objects()?;
        objects
            .remove(url)
            .map(|_| ())
            .ok_or_else(|| DocumentError::Missing(url.to_string()))
    }
}
