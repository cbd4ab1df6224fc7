use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Stable identity of a student record.
    StudentId
);
identifier!(
    /// Stable identity of a catalog course.
    CourseId
);
identifier!(
    /// Stable identity of a staff member (counsellor, approver, admin).
    StaffId
);
identifier!(
    /// `ADM<YYYY><NNNN>` admission number, also the admission's primary key.
    AdmissionNo
);
identifier!(
    /// `ENR<YYYY><NNNN>` enrollment number, also the enrollment's primary key.
    EnrollmentNo
);
identifier!(
    /// `PAY<YYYY><NNNN>` payment number, also the payment's primary key.
    PaymentNo
);

/// Staff roles recognised by the back office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Counsellor,
    Approver,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Counsellor => "counsellor",
            Role::Approver => "approver",
            Role::Admin => "admin",
        }
    }

    /// Approvers and admins may verify payments and act on any admission.
    pub const fn is_approver(self) -> bool {
        matches!(self, Role::Approver | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "counsellor" | "counselor" => Ok(Role::Counsellor),
            "approver" => Ok(Role::Approver),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownValue::new("role", other)),
        }
    }
}

/// Authenticated staff member performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: StaffId,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: StaffId(id.into()),
            name: name.into(),
            role,
        }
    }

    pub fn as_counsellor(&self) -> CounsellorRef {
        CounsellorRef {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Counsellor identity snapshot: the id is authoritative, the name is display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounsellorRef {
    pub id: StaffId,
    pub name: String,
}

/// Raised when a string does not name a known enum member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a recognised {field}")]
pub struct UnknownValue {
    pub field: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

/// Illegal move in one of the lifecycle state machines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub student_code: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub document_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    pub fee: u64,
    pub duration_months: u16,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Photo,
    IdentityProof,
    AddressProof,
    Qualification,
    Other,
}

impl DocumentKind {
    pub const fn folder_hint(self) -> &'static str {
        match self {
            DocumentKind::Photo => "admissions/photos",
            DocumentKind::IdentityProof => "admissions/identity",
            DocumentKind::AddressProof => "admissions/address",
            DocumentKind::Qualification => "admissions/qualifications",
            DocumentKind::Other => "admissions/misc",
        }
    }
}

/// Stored document pointer; the bytes live in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: DocumentKind,
    pub name: String,
    pub url: String,
}

/// Admission workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    Pending,
    Approved,
    Rejected,
    WaitingList,
}

impl AdmissionStatus {
    pub const ALL: [AdmissionStatus; 4] = [
        AdmissionStatus::Pending,
        AdmissionStatus::Approved,
        AdmissionStatus::Rejected,
        AdmissionStatus::WaitingList,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            AdmissionStatus::Pending => "pending",
            AdmissionStatus::Approved => "approved",
            AdmissionStatus::Rejected => "rejected",
            AdmissionStatus::WaitingList => "waiting_list",
        }
    }

    /// Pending and approved admissions block a second attempt for the same pair.
    pub const fn is_active(self) -> bool {
        matches!(self, AdmissionStatus::Pending | AdmissionStatus::Approved)
    }

    pub const fn allowed_targets(self) -> &'static [AdmissionStatus] {
        match self {
            AdmissionStatus::Pending => &[
                AdmissionStatus::Approved,
                AdmissionStatus::Rejected,
                AdmissionStatus::WaitingList,
            ],
            AdmissionStatus::Approved
            | AdmissionStatus::Rejected
            | AdmissionStatus::WaitingList => &[],
        }
    }

    pub fn transition(self, target: AdmissionStatus) -> Result<AdmissionStatus, TransitionError> {
        if self.allowed_targets().contains(&target) {
            Ok(target)
        } else {
            Err(TransitionError {
                entity: "admission",
                from: self.label(),
                to: target.label(),
            })
        }
    }
}

impl FromStr for AdmissionStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(AdmissionStatus::Pending),
            "approved" => Ok(AdmissionStatus::Approved),
            "rejected" => Ok(AdmissionStatus::Rejected),
            "waiting_list" | "waiting-list" | "waitlist" => Ok(AdmissionStatus::WaitingList),
            other => Err(UnknownValue::new("admission status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionSource {
    #[default]
    WalkIn,
    Website,
    Referral,
    Campaign,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub admission_no: AdmissionNo,
    pub student: StudentId,
    pub course: CourseId,
    pub status: AdmissionStatus,
    pub training_branch: String,
    pub counsellor: CounsellorRef,
    pub submitted_by: StaffId,
    pub documents: Vec<DocumentRef>,
    pub priority: Priority,
    pub applied_batch: Option<String>,
    pub source: AdmissionSource,
    pub notes: Option<String>,
    pub email_verified: bool,
    pub admission_date: NaiveDate,
    pub status_notes: Option<String>,
    /// Bumped on every stored edit; writes from an older snapshot are refused.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Admission {
    pub fn pair(&self) -> (&StudentId, &CourseId) {
        (&self.student, &self.course)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeType {
    #[serde(rename = "one-time", alias = "one_time")]
    OneTime,
    #[serde(rename = "installment")]
    Installment,
}

impl FeeType {
    pub const fn label(self) -> &'static str {
        match self {
            FeeType::OneTime => "one-time",
            FeeType::Installment => "installment",
        }
    }
}

/// Which of the three installment slots a payment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmiNumber {
    First,
    Second,
    Third,
}

impl EmiNumber {
    pub const ALL: [EmiNumber; 3] = [EmiNumber::First, EmiNumber::Second, EmiNumber::Third];

    pub const fn ordinal(self) -> u8 {
        match self {
            EmiNumber::First => 1,
            EmiNumber::Second => 2,
            EmiNumber::Third => 3,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            EmiNumber::First => "first",
            EmiNumber::Second => "second",
            EmiNumber::Third => "third",
        }
    }
}

impl fmt::Display for EmiNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EMI {}", self.ordinal())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmiSlot {
    pub amount: u64,
    pub pending: u64,
    pub due_date: Option<NaiveDate>,
}

impl EmiSlot {
    pub fn open(amount: u64, due_date: Option<NaiveDate>) -> Self {
        Self {
            amount,
            pending: amount,
            due_date,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.pending == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub first: EmiSlot,
    pub second: EmiSlot,
    pub third: EmiSlot,
}

impl InstallmentPlan {
    pub fn slot(&self, emi: EmiNumber) -> &EmiSlot {
        match emi {
            EmiNumber::First => &self.first,
            EmiNumber::Second => &self.second,
            EmiNumber::Third => &self.third,
        }
    }

    pub fn slot_mut(&mut self, emi: EmiNumber) -> &mut EmiSlot {
        match emi {
            EmiNumber::First => &mut self.first,
            EmiNumber::Second => &mut self.second,
            EmiNumber::Third => &mut self.third,
        }
    }

    pub fn slots(&self) -> impl Iterator<Item = (EmiNumber, &EmiSlot)> + '_ {
        EmiNumber::ALL
            .into_iter()
            .map(move |emi| (emi, self.slot(emi)))
    }

    /// Sum of the slot amounts; `None` when it does not fit in a `u64`.
    pub fn total(&self) -> Option<u64> {
        self.slots()
            .try_fold(0u64, |sum, (_, slot)| sum.checked_add(slot.amount))
    }

    pub fn outstanding(&self) -> Vec<(EmiNumber, EmiSlot)> {
        self.slots()
            .filter(|(_, slot)| !slot.is_settled())
            .map(|(emi, slot)| (emi, *slot))
            .collect()
    }
}

/// Committed fee plan, snapshotted into the enrollment at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeStructure {
    pub total_amount: u64,
    pub discount: u64,
    pub final_amount: u64,
    pub fee_type: FeeType,
    pub installments: Option<InstallmentPlan>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub total_paid: u64,
    pub pending_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub name: String,
    pub branch: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcademicStatus {
    #[default]
    Active,
    OnHold,
    Completed,
    Dropped,
}

impl AcademicStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AcademicStatus::Active => "active",
            AcademicStatus::OnHold => "on_hold",
            AcademicStatus::Completed => "completed",
            AcademicStatus::Dropped => "dropped",
        }
    }

    pub const fn allowed_targets(self) -> &'static [AcademicStatus] {
        match self {
            AcademicStatus::Active => &[
                AcademicStatus::OnHold,
                AcademicStatus::Completed,
                AcademicStatus::Dropped,
            ],
            AcademicStatus::OnHold => &[AcademicStatus::Active, AcademicStatus::Dropped],
            AcademicStatus::Completed | AcademicStatus::Dropped => &[],
        }
    }

    pub fn transition(self, target: AcademicStatus) -> Result<AcademicStatus, TransitionError> {
        if self.allowed_targets().contains(&target) {
            Ok(target)
        } else {
            Err(TransitionError {
                entity: "enrollment",
                from: self.label(),
                to: target.label(),
            })
        }
    }
}

impl FromStr for AcademicStatus {
    type Err = UnknownValue;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AcademicStatus::Active),
            "on_hold" | "on-hold" => Ok(AcademicStatus::OnHold),
            "completed" => Ok(AcademicStatus::Completed),
            "dropped" => Ok(AcademicStatus::Dropped),
            other => Err(UnknownValue::new("academic status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub sessions_held: u32,
    pub sessions_attended: u32,
}

impl Attendance {
    pub fn percentage(&self) -> Option<u8> {
        if self.sessions_held == 0 {
            return None;
        }
        let attended = self.sessions_attended.min(self.sessions_held) as u64;
        Some(((attended * 100) / self.sessions_held as u64) as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_no: EnrollmentNo,
    pub student: StudentId,
    pub course: CourseId,
    pub admission: AdmissionNo,
    pub batch: BatchSnapshot,
    pub fee_structure: FeeStructure,
    pub payment: PaymentSummary,
    pub academic_status: AcademicStatus,
    pub attendance: Attendance,
    pub counsellor: CounsellorRef,
    /// Payments whose amounts are already folded into `payment.total_paid`.
    pub settled_payments: Vec<PaymentNo>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    /// Re-derive `pending_amount`; called on every persist.
    pub fn refresh_balance(&mut self) {
        self.payment.pending_amount = self
            .fee_structure
            .final_amount
            .saturating_sub(self.payment.total_paid);
    }

    pub fn has_approved_payments(&self) -> bool {
        !self.settled_payments.is_empty()
    }

    pub fn is_fully_paid(&self) -> bool {
        self.payment.total_paid >= self.fee_structure.final_amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    Upi,
    Card,
    BankTransfer,
    Cheque,
}

impl PaymentMode {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Upi => "UPI",
            PaymentMode::Card => "card",
            PaymentMode::BankTransfer => "bank transfer",
            PaymentMode::Cheque => "cheque",
        }
    }
}

/// Two-party approval state of a payment; approved and rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn transition(self, target: VerificationStatus) -> Result<Self, TransitionError> {
        match (self, target) {
            (VerificationStatus::Pending, VerificationStatus::Approved)
            | (VerificationStatus::Pending, VerificationStatus::Rejected) => Ok(target),
            _ => Err(TransitionError {
                entity: "payment",
                from: self.label(),
                to: target.label(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_no: PaymentNo,
    pub enrollment: EnrollmentNo,
    pub student: StudentId,
    pub amount_received: u64,
    pub fee_type: FeeType,
    pub emi_number: Option<EmiNumber>,
    pub payment_mode: PaymentMode,
    pub payment_date: NaiveDate,
    pub transaction_reference: Option<String>,
    pub notes: Option<String>,
    pub received_by: StaffId,
    pub counsellor: CounsellorRef,
    pub verification_status: VerificationStatus,
    pub verified_by: Option<StaffId>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Pending and approved payments hold a claim on their fee slot.
    pub fn is_open(&self) -> bool {
        self.verification_status != VerificationStatus::Rejected
    }

    /// Produce the verified copy; the stored row is swapped by the repository.
    pub fn verified(
        &self,
        outcome: VerificationStatus,
        verifier: &StaffId,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Payment, TransitionError> {
        let status = self.verification_status.transition(outcome)?;
        let mut next = self.clone();
        next.verification_status = status;
        next.verified_by = Some(verifier.clone());
        next.verified_at = Some(at);
        next.verification_notes = notes;
        Ok(next)
    }
}
