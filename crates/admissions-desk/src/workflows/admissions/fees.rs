use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{
    EmiNumber, EmiSlot, Enrollment, FeeStructure, FeeType, InstallmentPlan, Payment, PaymentNo,
};
use super::error::{FieldError, LedgerError};

/// Staff-supplied terms for a fee structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTerms {
    /// Defaults to the course fee snapshot when omitted.
    #[serde(default)]
    pub total_amount: Option<u64>,
    #[serde(default)]
    pub discount: u64,
    pub fee_type: FeeType,
    #[serde(default)]
    pub installments: Vec<InstallmentTerms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentTerms {
    pub slot: EmiNumber,
    pub amount: u64,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

/// Build a fresh fee structure. `fallback_total` is the course fee snapshot.
pub fn build_fee_structure(
    terms: &FeeTerms,
    fallback_total: u64,
) -> Result<FeeStructure, LedgerError> {
    let mut errors = Vec::new();
    let total_amount = terms.total_amount.unwrap_or(fallback_total);

    if total_amount == 0 {
        errors.push(FieldError::new(
            "total_amount",
            "total amount must be greater than zero",
        ));
    }
    if terms.discount > total_amount {
        errors.push(FieldError::new(
            "discount",
            format!(
                "discount of ₹{} exceeds the total amount of ₹{}",
                terms.discount, total_amount
            ),
        ));
    }
    let final_amount = total_amount.saturating_sub(terms.discount);

    let installments = match terms.fee_type {
        FeeType::OneTime => {
            if !terms.installments.is_empty() {
                errors.push(FieldError::new(
                    "installments",
                    "one-time fees cannot carry an installment schedule",
                ));
            }
            None
        }
        FeeType::Installment => installment_plan(&terms.installments, final_amount, &mut errors),
    };

    if !errors.is_empty() {
        return Err(LedgerError::Validation(errors));
    }

    Ok(FeeStructure {
        total_amount,
        discount: terms.discount,
        final_amount,
        fee_type: terms.fee_type,
        installments,
    })
}

fn installment_plan(
    terms: &[InstallmentTerms],
    final_amount: u64,
    errors: &mut Vec<FieldError>,
) -> Option<InstallmentPlan> {
    let mut slots: [Option<&InstallmentTerms>; 3] = [None, None, None];
    let mut well_formed = true;

    for term in terms {
        let index = usize::from(term.slot.ordinal() - 1);
        if slots[index].replace(term).is_some() {
            errors.push(FieldError::new(
                format!("installments.{}", term.slot.label()),
                format!("{} is defined more than once", term.slot),
            ));
            well_formed = false;
        }
        if term.amount == 0 {
            errors.push(FieldError::new(
                format!("installments.{}", term.slot.label()),
                format!("{} amount must be greater than zero", term.slot),
            ));
            well_formed = false;
        }
    }

    let [Some(first), Some(second), Some(third)] = slots else {
        errors.push(FieldError::new(
            "installments",
            "installment fees require exactly three installments (first, second, third)",
        ));
        return None;
    };

    let plan = InstallmentPlan {
        first: EmiSlot::open(first.amount, first.due_date),
        second: EmiSlot::open(second.amount, second.due_date),
        third: EmiSlot::open(third.amount, third.due_date),
    };

    match plan.total() {
        Some(sum) if sum == final_amount => {}
        Some(sum) => {
            errors.push(FieldError::new(
                "installments",
                format!(
                    "installment amounts sum to ₹{sum} but the final amount is ₹{final_amount}"
                ),
            ));
            well_formed = false;
        }
        None => {
            errors.push(FieldError::new(
                "installments",
                "installment amounts are too large to add up",
            ));
            well_formed = false;
        }
    }

    let due_dates: Vec<NaiveDate> = plan.slots().filter_map(|(_, slot)| slot.due_date).collect();
    if due_dates.windows(2).any(|pair| pair[1] < pair[0]) {
        errors.push(FieldError::new(
            "installments",
            "installment due dates must be in slot order",
        ));
        well_formed = false;
    }

    well_formed.then_some(plan)
}

/// Rebuild the fee structure of an existing enrollment.
///
/// The fee type is locked once any payment has been approved, the final amount may not drop
/// below what has already been paid, and settled installment slots keep their amount.
pub fn revise_fee_structure(
    enrollment: &Enrollment,
    terms: &FeeTerms,
) -> Result<FeeStructure, LedgerError> {
    let current = &enrollment.fee_structure;
    if enrollment.has_approved_payments() && terms.fee_type != current.fee_type {
        return Err(LedgerError::Conflict(format!(
            "fee type of {} is locked to {} because a payment has already been approved",
            enrollment.enrollment_no,
            current.fee_type.label()
        )));
    }

    let mut next = build_fee_structure(terms, current.total_amount)?;
    let mut errors = Vec::new();

    if next.final_amount < enrollment.payment.total_paid {
        errors.push(FieldError::new(
            "total_amount",
            format!(
                "final amount ₹{} is below the ₹{} already paid",
                next.final_amount, enrollment.payment.total_paid
            ),
        ));
    }

    if let (Some(previous), Some(plan)) = (current.installments, next.installments.as_mut()) {
        for (emi, slot) in previous.slots() {
            if !slot.is_settled() {
                continue;
            }
            let revised = plan.slot_mut(emi);
            if revised.amount != slot.amount {
                errors.push(FieldError::new(
                    format!("installments.{}", emi.label()),
                    format!("{emi} is already paid; its amount of ₹{} cannot change", slot.amount),
                ));
            }
            revised.pending = 0;
        }
    }

    if !errors.is_empty() {
        return Err(LedgerError::Validation(errors));
    }
    Ok(next)
}

/// Ledger effect of approving a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub payment_no: PaymentNo,
    pub amount: u64,
    pub fee_type: FeeType,
    pub slot: Option<EmiNumber>,
}

impl Settlement {
    pub fn for_payment(payment: &Payment) -> Self {
        Self {
            payment_no: payment.payment_no.clone(),
            amount: payment.amount_received,
            fee_type: payment.fee_type,
            slot: payment.emi_number,
        }
    }

    /// Fold the payment into the enrollment balance. Leaves `enrollment` untouched on error.
    pub fn apply(&self, enrollment: &mut Enrollment) -> Result<(), SettlementError> {
        if enrollment.settled_payments.contains(&self.payment_no) {
            return Err(SettlementError::AlreadyApplied(self.payment_no.clone()));
        }

        let structure = &enrollment.fee_structure;
        if structure.fee_type != self.fee_type {
            return Err(SettlementError::FeeTypeChanged {
                expected: structure.fee_type,
                found: self.fee_type,
            });
        }

        let remaining = structure
            .final_amount
            .saturating_sub(enrollment.payment.total_paid);
        if self.amount > remaining {
            return Err(SettlementError::Overpayment {
                amount: self.amount,
                remaining,
            });
        }

        match self.fee_type {
            FeeType::OneTime => {
                if self.amount != remaining || enrollment.payment.total_paid > 0 {
                    return Err(SettlementError::OneTimeAmountChanged {
                        expected: remaining,
                        received: self.amount,
                    });
                }
            }
            FeeType::Installment => {
                let emi = self.slot.ok_or(SettlementError::MissingSlot)?;
                let plan = enrollment
                    .fee_structure
                    .installments
                    .as_mut()
                    .ok_or(SettlementError::MissingSlot)?;
                let slot = plan.slot_mut(emi);
                if slot.is_settled() {
                    return Err(SettlementError::SlotSettled(emi));
                }
                if slot.pending != self.amount {
                    return Err(SettlementError::SlotAmountChanged {
                        emi,
                        expected: slot.pending,
                        received: self.amount,
                    });
                }
                slot.pending = 0;
            }
        }

        enrollment.payment.total_paid += self.amount;
        enrollment.settled_payments.push(self.payment_no.clone());
        enrollment.refresh_balance();
        Ok(())
    }
}

/// Reasons an approval can no longer be folded into the balance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("payment {0} has already been applied to the enrollment balance")]
    AlreadyApplied(PaymentNo),
    #[error("enrollment now uses {} fees but the payment was recorded as {}", .expected.label(), .found.label())]
    FeeTypeChanged { expected: FeeType, found: FeeType },
    #[error("payment of ₹{amount} exceeds the outstanding balance of ₹{remaining}")]
    Overpayment { amount: u64, remaining: u64 },
    #[error("one-time fee now requires ₹{expected}; this payment of ₹{received} is stale")]
    OneTimeAmountChanged { expected: u64, received: u64 },
    #[error("installment payment does not reference an installment slot")]
    MissingSlot,
    #[error("{0} was already settled by another approved payment; reject this payment instead")]
    SlotSettled(EmiNumber),
    #[error("{emi} now requires ₹{expected}; this payment of ₹{received} is stale")]
    SlotAmountChanged {
        emi: EmiNumber,
        expected: u64,
        received: u64,
    },
}
