//! Strict payment validation, run before a payment row is recorded as pending.

use super::domain::{EmiNumber, Enrollment, FeeType, Payment};

/// The `(amount, fee type, slot)` triple a counsellor is about to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposedPayment {
    pub amount_received: u64,
    pub fee_type: FeeType,
    pub emi_number: Option<EmiNumber>,
}

/// Specific rule a proposed payment violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentRejection {
    #[error("payment amount must be greater than zero")]
    ZeroAmount,
    #[error("enrollment uses {} fees but the payment was submitted as {}", .expected.label(), .submitted.label())]
    FeeTypeMismatch { expected: FeeType, submitted: FeeType },
    #[error("enrollment already has payments; the one-time fee cannot be paid again")]
    AlreadyHasPayments,
    #[error("one-time fee requires exact payment of ₹{expected}, received ₹{received}")]
    OneTimeAmountMismatch { expected: u64, received: u64 },
    #[error("one-time payments cannot target an installment")]
    UnexpectedEmi,
    #[error("installment payments must specify which EMI they pay")]
    MissingEmiNumber,
    #[error("{0} is not defined for this enrollment")]
    EmiSlotMissing(EmiNumber),
    #[error("{0} is already paid")]
    EmiAlreadyPaid(EmiNumber),
    #[error("{emi} requires exact payment of ₹{expected}, received ₹{received}")]
    EmiAmountMismatch {
        emi: EmiNumber,
        expected: u64,
        received: u64,
    },
}

impl PaymentRejection {
    /// Stable machine-readable reason for API clients.
    pub const fn code(&self) -> &'static str {
        match self {
            PaymentRejection::ZeroAmount => "zero_amount",
            PaymentRejection::FeeTypeMismatch { .. } => "fee_type_mismatch",
            PaymentRejection::AlreadyHasPayments => "already_has_payments",
            PaymentRejection::OneTimeAmountMismatch { .. } => "amount_mismatch",
            PaymentRejection::UnexpectedEmi => "unexpected_emi",
            PaymentRejection::MissingEmiNumber => "missing_emi_number",
            PaymentRejection::EmiSlotMissing(_) => "emi_slot_missing",
            PaymentRejection::EmiAlreadyPaid(_) => "already_paid",
            PaymentRejection::EmiAmountMismatch { .. } => "amount_mismatch",
        }
    }
}

/// Accept only payments that exactly match what the fee structure expects next.
///
/// `existing` is every payment recorded against the enrollment; for one-time fees any open
/// (pending or approved) payment blocks another submission. Installment slots are judged on
/// the slot's own `pending` amount, which only drops on approval.
pub fn validate_payment(
    enrollment: &Enrollment,
    existing: &[Payment],
    proposed: &ProposedPayment,
) -> Result<(), PaymentRejection> {
    if proposed.amount_received == 0 {
        return Err(PaymentRejection::ZeroAmount);
    }

    let structure = &enrollment.fee_structure;
    if proposed.fee_type != structure.fee_type {
        return Err(PaymentRejection::FeeTypeMismatch {
            expected: structure.fee_type,
            submitted: proposed.fee_type,
        });
    }

    match structure.fee_type {
        FeeType::OneTime => {
            if proposed.emi_number.is_some() {
                return Err(PaymentRejection::UnexpectedEmi);
            }
            if enrollment.payment.total_paid > 0 || existing.iter().any(Payment::is_open) {
                return Err(PaymentRejection::AlreadyHasPayments);
            }
            if proposed.amount_received != structure.final_amount {
                return Err(PaymentRejection::OneTimeAmountMismatch {
                    expected: structure.final_amount,
                    received: proposed.amount_received,
                });
            }
        }
        FeeType::Installment => {
            let emi = proposed
                .emi_number
                .ok_or(PaymentRejection::MissingEmiNumber)?;
            let slot = structure
                .installments
                .as_ref()
                .map(|plan| *plan.slot(emi))
                .ok_or(PaymentRejection::EmiSlotMissing(emi))?;
            if slot.is_settled() {
                return Err(PaymentRejection::EmiAlreadyPaid(emi));
            }
            if proposed.amount_received != slot.amount {
                return Err(PaymentRejection::EmiAmountMismatch {
                    emi,
                    expected: slot.amount,
                    received: proposed.amount_received,
                });
            }
        }
    }

    Ok(())
}
