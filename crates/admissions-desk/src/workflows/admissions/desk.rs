use super::admission::AdmissionService;
use super::approval::PaymentService;
use super::catalog::CatalogService;
use super::context::LedgerContext;
use super::enrollment::EnrollmentService;
use super::repository::LedgerRepository;

/// Every back-office service over one shared ledger.
pub struct AdmissionsDesk<R> {
    pub catalog: CatalogService<R>,
    pub admissions: AdmissionService<R>,
    pub enrollments: EnrollmentService<R>,
    pub payments: PaymentService<R>,
}

impl<R> AdmissionsDesk<R>
where
    R: LedgerRepository + 'static,
{
    pub fn new(ctx: LedgerContext<R>) -> Self {
        Self {
            catalog: CatalogService::new(ctx.clone()),
            admissions: AdmissionService::new(ctx.clone()),
            enrollments: EnrollmentService::new(ctx.clone()),
            payments: PaymentService::new(ctx),
        }
    }
}
