use std::sync::Arc;

use admissions_desk::config::NotificationConfig;
use admissions_desk::error::AppError;
use admissions_desk::workflows::admissions::notifications::describe;
use admissions_desk::workflows::admissions::{
    Actor, Admission, AdmissionsDesk, BatchTerms, CourseId, DocumentKind, DocumentUpload,
    EmiNumber, Enrollment, EventBus, FeeTerms, FeeType, FixedClock, InMemoryDocumentStore,
    InMemoryLedger, InstallmentTerms, LedgerContext, NewAdmission, NewCourse, NewEnrollment,
    NewStudent, NotificationSubscriber, PaymentMode, PaymentSubmission, Role, StudentId,
};
use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use clap::Args;

use crate::infra::LoggingMailer;

type Desk = AdmissionsDesk<InMemoryLedger>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Calendar year used for identifiers and dates (defaults to the current year)
    #[arg(long)]
    pub(crate) year: Option<i32>,
    /// Skip the installment portion of the demo
    #[arg(long)]
    pub(crate) skip_installments: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let year = args.year.unwrap_or_else(|| Utc::now().year());
    let Some(now) = Utc.with_ymd_and_hms(year, 6, 2, 9, 30, 0).single() else {
        println!("Year {year} is outside the supported calendar range");
        return Ok(());
    };

    let notifications = NotificationConfig {
        institute_name: "Skyline Institute".to_string(),
        bcc_address: Some("admissions@skyline.example".to_string()),
    };
    let mailer = Arc::new(LoggingMailer::new(&notifications));
    let events = EventBus::new().with_subscriber(Arc::new(NotificationSubscriber::new(
        mailer.clone(),
        notifications,
    )));
    let ctx = LedgerContext::new(
        Arc::new(InMemoryLedger::new()),
        Arc::new(InMemoryDocumentStore::new()),
        events,
    )
    .with_clock(Arc::new(FixedClock(now)));
    let desk = AdmissionsDesk::new(ctx);

    let counsellor = Actor::new("staff-c1", "Asha Rao", Role::Counsellor);
    let approver = Actor::new("staff-a1", "Meera Iyer", Role::Approver);

    println!("Admissions desk demo ({year})");
    desk.catalog.register_course(NewCourse {
        id: CourseId("course-fsd".to_string()),
        name: "Full Stack Development".to_string(),
        fee: 50_000,
        duration_months: 6,
        active: true,
    })?;

    println!("\nOne-time fee");
    let admission = admit(&desk, &counsellor, &approver, "stu-100", "Kiran Patel")?;
    let enrollment = desk.enrollments.create(
        &counsellor,
        enrollment_request(&admission, one_time_terms()),
    )?;
    print_balance(&enrollment);

    let payment = desk.payments.submit(
        &counsellor,
        payment_request(&enrollment, 50_000, None, PaymentMode::Upi),
    )?;
    println!(
        "- Recorded {} for ₹{} ({})",
        payment.payment_no,
        payment.amount_received,
        payment.verification_status.label()
    );
    let (payment, enrollment) = desk.payments.approve(&approver, &payment.payment_no, None)?;
    println!("- {} verified by {}", payment.payment_no, approver.name);
    print_balance(&enrollment);
    match desk.payments.submit(
        &counsellor,
        payment_request(&enrollment, 5_000, None, PaymentMode::Cash),
    ) {
        Ok(extra) => println!("- Unexpectedly accepted {}", extra.payment_no),
        Err(err) => println!("- Second payment refused: {err}"),
    }

    if !args.skip_installments {
        println!("\nThree installments");
        let admission = admit(&desk, &counsellor, &approver, "stu-101", "Neha Joshi")?;
        let enrollment = desk.enrollments.create(
            &counsellor,
            enrollment_request(&admission, installment_terms(year)),
        )?;
        print_balance(&enrollment);

        match desk.payments.submit(
            &counsellor,
            payment_request(&enrollment, 15_000, Some(EmiNumber::First), PaymentMode::Card),
        ) {
            Ok(extra) => println!("- Unexpectedly accepted {}", extra.payment_no),
            Err(err) => println!("- Partial EMI refused: {err}"),
        }

        let payment = desk.payments.submit(
            &counsellor,
            payment_request(&enrollment, 20_000, Some(EmiNumber::First), PaymentMode::Card),
        )?;
        let (_, enrollment) = desk.payments.approve(&approver, &payment.payment_no, None)?;
        println!("- {} verified for EMI 1", payment.payment_no);
        print_balance(&enrollment);

        match desk.payments.submit(
            &counsellor,
            payment_request(&enrollment, 20_000, Some(EmiNumber::First), PaymentMode::Card),
        ) {
            Ok(extra) => println!("- Unexpectedly accepted {}", extra.payment_no),
            Err(err) => println!("- Repeat EMI refused: {err}"),
        }
    }

    println!("\nConfirmation emails");
    for message in mailer.sent() {
        println!("- {}", describe(&message));
    }
    Ok(())
}

fn admit(
    desk: &Desk,
    counsellor: &Actor,
    approver: &Actor,
    student_id: &str,
    name: &str,
) -> Result<Admission, AppError> {
    let student = desk.catalog.register_student(NewStudent {
        id: StudentId(student_id.to_string()),
        student_code: student_id.to_ascii_uppercase(),
        name: name.to_string(),
        email: Some(format!("{student_id}@example.com")),
        phone: None,
        documents: Vec::new(),
    })?;
    let admission = desk.admissions.create(
        counsellor,
        NewAdmission {
            student: student.id.clone(),
            course: CourseId("course-fsd".to_string()),
            training_branch: "Pune Central".to_string(),
            counsellor: None,
            documents: vec![DocumentUpload {
                kind: DocumentKind::IdentityProof,
                name: "id-proof.pdf".to_string(),
                content: b"%PDF-1.4".to_vec(),
            }],
            priority: Default::default(),
            applied_batch: Some("Weekday Morning".to_string()),
            source: Default::default(),
            notes: None,
            email_verified: true,
            admission_date: None,
        },
    )?;
    println!("- {} admitted as {}", student.name, admission.admission_no);
    let admission = desk.admissions.transition_status(
        approver,
        &admission.admission_no,
        "approved",
        Some("documents verified".to_string()),
    )?;
    println!("- {} approved by {}", admission.admission_no, approver.name);
    Ok(admission)
}

fn one_time_terms() -> FeeTerms {
    FeeTerms {
        total_amount: Some(55_000),
        discount: 5_000,
        fee_type: FeeType::OneTime,
        installments: Vec::new(),
    }
}

fn installment_terms(year: i32) -> FeeTerms {
    let slot = |slot, amount, month| InstallmentTerms {
        slot,
        amount,
        due_date: NaiveDate::from_ymd_opt(year, month, 5),
    };
    FeeTerms {
        total_amount: None,
        discount: 0,
        fee_type: FeeType::Installment,
        installments: vec![
            slot(EmiNumber::First, 20_000, 7),
            slot(EmiNumber::Second, 20_000, 8),
            slot(EmiNumber::Third, 10_000, 9),
        ],
    }
}

fn enrollment_request(admission: &Admission, fee: FeeTerms) -> NewEnrollment {
    NewEnrollment {
        admission: admission.admission_no.clone(),
        batch: BatchTerms {
            name: "FSD-WDM".to_string(),
            branch: None,
            start_date: None,
            end_date: None,
        },
        fee,
        counsellor: None,
    }
}

fn payment_request(
    enrollment: &Enrollment,
    amount: u64,
    emi: Option<EmiNumber>,
    mode: PaymentMode,
) -> PaymentSubmission {
    PaymentSubmission {
        enrollment: enrollment.enrollment_no.clone(),
        amount_received: amount,
        fee_type: enrollment.fee_structure.fee_type,
        emi_number: emi,
        payment_mode: mode,
        payment_date: None,
        transaction_reference: None,
        notes: None,
    }
}

fn print_balance(enrollment: &Enrollment) {
    println!(
        "  {} [{}] final ₹{} | paid ₹{} | pending ₹{}",
        enrollment.enrollment_no,
        enrollment.fee_structure.fee_type.label(),
        enrollment.fee_structure.final_amount,
        enrollment.payment.total_paid,
        enrollment.payment.pending_amount
    );
    if let Some(plan) = enrollment.fee_structure.installments {
        for (emi, slot) in plan.slots() {
            let due = slot
                .due_date
                .map(|date| date.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("    {emi}: ₹{} pending of ₹{} (due {due})", slot.pending, slot.amount);
        }
    }
}
