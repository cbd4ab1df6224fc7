use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::admission::{AdmissionChanges, NewAdmission};
use super::approval::{BulkApprovalReport, PaymentSubmission};
use super::catalog::{NewCourse, NewStudent};
use super::desk::AdmissionsDesk;
use super::documents::DocumentUpload;
use super::domain::{
    Actor, Admission, AdmissionNo, Course, CourseId, Enrollment, EnrollmentNo, Payment,
    PaymentNo, Role, StaffId, Student, StudentId,
};
use super::enrollment::{AttendanceUpdate, NewEnrollment};
use super::error::LedgerError;
use super::fees::FeeTerms;
use super::repository::LedgerRepository;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

type Desk<R> = State<Arc<AdmissionsDesk<R>>>;
type Reply<T> = Result<(StatusCode, Json<T>), LedgerError>;

/// HTTP surface for the admissions back office.
pub fn office_router<R>(desk: Arc<AdmissionsDesk<R>>) -> Router
where
    R: LedgerRepository + 'static,
{
    Router::new()
        .route("/api/v1/students", post(register_student::<R>))
        .route(
            "/api/v1/students/:student_id",
            get(get_student::<R>).delete(delete_student::<R>),
        )
        .route("/api/v1/courses", post(register_course::<R>))
        .route(
            "/api/v1/courses/:course_id",
            get(get_course::<R>).delete(delete_course::<R>),
        )
        .route("/api/v1/admissions", post(create_admission::<R>))
        .route(
            "/api/v1/admissions/:admission_no",
            get(get_admission::<R>)
                .patch(update_admission::<R>)
                .delete(delete_admission::<R>),
        )
        .route(
            "/api/v1/admissions/:admission_no/status",
            post(transition_admission::<R>),
        )
        .route(
            "/api/v1/admissions/:admission_no/documents",
            post(attach_documents::<R>),
        )
        .route("/api/v1/enrollments", post(create_enrollment::<R>))
        .route(
            "/api/v1/enrollments/:enrollment_no",
            get(get_enrollment::<R>).delete(delete_enrollment::<R>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_no/fee-structure",
            put(revise_fee_structure::<R>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_no/academic-status",
            post(update_academic_status::<R>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_no/attendance",
            post(record_attendance::<R>),
        )
        .route(
            "/api/v1/enrollments/:enrollment_no/payments",
            get(enrollment_payments::<R>),
        )
        .route("/api/v1/payments", post(submit_payment::<R>))
        .route("/api/v1/payments/bulk-approve", post(bulk_approve::<R>))
        .route("/api/v1/payments/:payment_no", get(get_payment::<R>))
        .route(
            "/api/v1/payments/:payment_no/approve",
            post(approve_payment::<R>),
        )
        .route(
            "/api/v1/payments/:payment_no/reject",
            post(reject_payment::<R>),
        )
        .with_state(desk)
}

/// Resolve the authenticated staff member from the identity headers.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, LedgerError> {
    let id = header_value(headers, ACTOR_ID_HEADER).ok_or(LedgerError::Unauthenticated)?;
    let role = header_value(headers, ACTOR_ROLE_HEADER)
        .ok_or(LedgerError::Unauthenticated)?
        .parse::<Role>()
        .map_err(|_| LedgerError::Unauthenticated)?;
    let name = header_value(headers, ACTOR_NAME_HEADER).unwrap_or(id);

    Ok(Actor {
        id: StaffId(id.to_string()),
        name: name.to_string(),
        role,
    })
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusChange {
    status: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentBatch {
    documents: Vec<DocumentUpload>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct VerificationRequest {
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkApprovalRequest {
    payment_nos: Vec<PaymentNo>,
    #[serde(default)]
    notes: Option<String>,
}

async fn register_student<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Json(request): Json<NewStudent>,
) -> Reply<Student>
where
    R: LedgerRepository + 'static,
{
    actor_from_headers(&headers)?;
    let student = desk.catalog.register_student(request)?;
    Ok((StatusCode::CREATED, Json(student)))
}

async fn get_student<R>(State(desk): Desk<R>, Path(id): Path<String>) -> Reply<Student>
where
    R: LedgerRepository + 'static,
{
    Ok((StatusCode::OK, Json(desk.catalog.student(&StudentId(id))?)))
}

async fn delete_student<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<Student>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let removed = desk.catalog.delete_student(&actor, &StudentId(id))?;
    Ok((StatusCode::OK, Json(removed)))
}

async fn register_course<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Json(request): Json<NewCourse>,
) -> Reply<Course>
where
    R: LedgerRepository + 'static,
{
    actor_from_headers(&headers)?;
    let course = desk.catalog.register_course(request)?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn get_course<R>(State(desk): Desk<R>, Path(id): Path<String>) -> Reply<Course>
where
    R: LedgerRepository + 'static,
{
    Ok((StatusCode::OK, Json(desk.catalog.course(&CourseId(id))?)))
}

async fn delete_course<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<Course>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let removed = desk.catalog.delete_course(&actor, &CourseId(id))?;
    Ok((StatusCode::OK, Json(removed)))
}

pub(crate) async fn create_admission<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Json(request): Json<NewAdmission>,
) -> Reply<Admission>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let admission = desk.admissions.create(&actor, request)?;
    Ok((StatusCode::CREATED, Json(admission)))
}

async fn get_admission<R>(State(desk): Desk<R>, Path(no): Path<String>) -> Reply<Admission>
where
    R: LedgerRepository + 'static,
{
    Ok((StatusCode::OK, Json(desk.admissions.get(&AdmissionNo(no))?)))
}

async fn update_admission<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
    Json(changes): Json<AdmissionChanges>,
) -> Reply<Admission>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let admission = desk.admissions.update(&actor, &AdmissionNo(no), changes)?;
    Ok((StatusCode::OK, Json(admission)))
}

async fn transition_admission<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
    Json(change): Json<StatusChange>,
) -> Reply<Admission>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let admission =
        desk.admissions
            .transition_status(&actor, &AdmissionNo(no), &change.status, change.notes)?;
    Ok((StatusCode::OK, Json(admission)))
}

async fn attach_documents<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
    Json(batch): Json<DocumentBatch>,
) -> Reply<Admission>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let admission = desk
        .admissions
        .attach_documents(&actor, &AdmissionNo(no), batch.documents)?;
    Ok((StatusCode::OK, Json(admission)))
}

async fn delete_admission<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
) -> Reply<Admission>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let removed = desk.admissions.delete(&actor, &AdmissionNo(no))?;
    Ok((StatusCode::OK, Json(removed)))
}

async fn create_enrollment<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Json(request): Json<NewEnrollment>,
) -> Reply<Enrollment>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let enrollment = desk.enrollments.create(&actor, request)?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

async fn get_enrollment<R>(State(desk): Desk<R>, Path(no): Path<String>) -> Reply<Enrollment>
where
    R: LedgerRepository + 'static,
{
    Ok((StatusCode::OK, Json(desk.enrollments.get(&EnrollmentNo(no))?)))
}

async fn delete_enrollment<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
) -> Reply<Enrollment>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let removed = desk.enrollments.delete(&actor, &EnrollmentNo(no))?;
    Ok((StatusCode::OK, Json(removed)))
}

async fn revise_fee_structure<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
    Json(terms): Json<FeeTerms>,
) -> Reply<Enrollment>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let enrollment = desk
        .enrollments
        .revise_fee_structure(&actor, &EnrollmentNo(no), terms)?;
    Ok((StatusCode::OK, Json(enrollment)))
}

async fn update_academic_status<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
    Json(change): Json<StatusChange>,
) -> Reply<Enrollment>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let enrollment =
        desk.enrollments
            .update_academic_status(&actor, &EnrollmentNo(no), &change.status)?;
    Ok((StatusCode::OK, Json(enrollment)))
}

async fn record_attendance<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
    Json(update): Json<AttendanceUpdate>,
) -> Reply<Enrollment>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let enrollment = desk
        .enrollments
        .record_attendance(&actor, &EnrollmentNo(no), update)?;
    Ok((StatusCode::OK, Json(enrollment)))
}

async fn enrollment_payments<R>(
    State(desk): Desk<R>,
    Path(no): Path<String>,
) -> Reply<Vec<Payment>>
where
    R: LedgerRepository + 'static,
{
    let payments = desk.payments.for_enrollment(&EnrollmentNo(no))?;
    Ok((StatusCode::OK, Json(payments)))
}

pub(crate) async fn submit_payment<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Json(submission): Json<PaymentSubmission>,
) -> Reply<Payment>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let payment = desk.payments.submit(&actor, submission)?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn get_payment<R>(State(desk): Desk<R>, Path(no): Path<String>) -> Reply<Payment>
where
    R: LedgerRepository + 'static,
{
    Ok((StatusCode::OK, Json(desk.payments.get(&PaymentNo(no))?)))
}

async fn approve_payment<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
    request: Option<Json<VerificationRequest>>,
) -> Reply<Value>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let request = request.map(|Json(body)| body).unwrap_or_default();
    let (payment, enrollment) = desk
        .payments
        .approve(&actor, &PaymentNo(no), request.notes)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "payment": payment,
            "enrollment": enrollment,
        })),
    ))
}

async fn reject_payment<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Path(no): Path<String>,
    request: Option<Json<VerificationRequest>>,
) -> Reply<Payment>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let request = request.map(|Json(body)| body).unwrap_or_default();
    let payment = desk
        .payments
        .reject(&actor, &PaymentNo(no), request.notes)?;
    Ok((StatusCode::OK, Json(payment)))
}

async fn bulk_approve<R>(
    State(desk): Desk<R>,
    headers: HeaderMap,
    Json(request): Json<BulkApprovalRequest>,
) -> Reply<BulkApprovalReport>
where
    R: LedgerRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let report = desk
        .payments
        .bulk_approve(&actor, &request.payment_nos, request.notes)?;
    Ok((StatusCode::OK, Json(report)))
}
