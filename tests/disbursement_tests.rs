/// Unit tests for the disbursement gate
/// Covers the eligibility predicate truth table (including the all-failed
/// retry allowance) and bank-details validation.
use bigdecimal::BigDecimal;
use chrono::Utc;
use crm_workflow_api::disbursement::{
    check_eligibility, is_eligible, settle_disbursement, validate_bank_details,
};
use crm_workflow_api::payment_gateway::DisbursementResult;
use crm_workflow_api::models::{
    AccountType, BankDetails, Disbursement, DisbursementStatus, Lead, ServiceType,
};

fn verified_bank() -> BankDetails {
    BankDetails {
        account_holder_name: "Mary Williams".to_string(),
        account_number: "123456789012".to_string(),
        bank_name: "State Bank".to_string(),
        ifsc_code: "SBIN0001234".to_string(),
        branch_name: Some("MG Road".to_string()),
        account_type: AccountType::Savings,
        verified_by: Some("2".to_string()),
        verified_at: Some(Utc::now()),
    }
}

fn disbursement(status: DisbursementStatus) -> Disbursement {
    Disbursement {
        id: format!("disb-{}", status),
        amount: BigDecimal::from(500_000),
        reference_id: String::new(),
        status,
        initiated_by: "2".to_string(),
        initiated_at: Utc::now(),
        completed_at: None,
        failure_reason: None,
        gateway_response: None,
    }
}

fn loan_lead(status: &str) -> Lead {
    Lead {
        id: "LEAD-TEST".to_string(),
        name: "Mary Williams".to_string(),
        email: "mary.williams@example.com".to_string(),
        phone: "+919876500151".to_string(),
        service_type: ServiceType::Loan,
        sub_category: "Home Loan".to_string(),
        status: status.to_string(),
        value: BigDecimal::from(500_000),
        assigned_to: "1".to_string(),
        documents: vec![],
        history: vec![],
        bank_details: Some(verified_bank()),
        disbursements: vec![],
        created_at: Utc::now(),
        version: 1,
    }
}

#[cfg(test)]
mod eligibility_tests {
    use super::*;

    #[test]
    fn approved_loan_with_verified_bank_is_eligible() {
        let lead = loan_lead("Approved");
        assert!(is_eligible(&lead));
    }

    #[test]
    fn non_loan_leads_are_never_eligible() {
        let mut lead = loan_lead("Approved");
        lead.service_type = ServiceType::Investment;
        lead.status = "Activated".to_string();
        assert!(!is_eligible(&lead));

        lead.status = "Approved".to_string();
        assert!(!is_eligible(&lead));
    }

    #[test]
    fn status_must_be_exactly_approved() {
        for status in ["New", "Eligibility Check", "Rejected", "Disbursed", "approved"] {
            let lead = loan_lead(status);
            assert!(!is_eligible(&lead), "status '{}' must not be eligible", status);
        }
    }

    #[test]
    fn missing_bank_details_block_disbursement() {
        let mut lead = loan_lead("Approved");
        lead.bank_details = None;
        assert!(!is_eligible(&lead));
    }

    #[test]
    fn unverified_bank_details_block_disbursement() {
        let mut lead = loan_lead("Approved");
        if let Some(bank) = lead.bank_details.as_mut() {
            bank.verified_by = None;
            bank.verified_at = None;
        }
        assert!(!is_eligible(&lead));
    }

    #[test]
    fn partial_verification_is_not_verification() {
        let mut lead = loan_lead("Approved");
        if let Some(bank) = lead.bank_details.as_mut() {
            bank.verified_at = None;
        }
        assert!(!is_eligible(&lead));

        let mut lead = loan_lead("Approved");
        if let Some(bank) = lead.bank_details.as_mut() {
            bank.verified_by = None;
        }
        assert!(!is_eligible(&lead));
    }

    #[test]
    fn failed_disbursements_allow_retry() {
        let mut lead = loan_lead("Approved");
        lead.disbursements.push(disbursement(DisbursementStatus::Failed));
        assert!(is_eligible(&lead));

        lead.disbursements.push(disbursement(DisbursementStatus::Failed));
        assert!(is_eligible(&lead));
    }

    #[test]
    fn completed_disbursement_blocks_forever() {
        let mut lead = loan_lead("Approved");
        lead.disbursements.push(disbursement(DisbursementStatus::Completed));
        assert!(!is_eligible(&lead));

        // Even alongside failed attempts.
        let mut lead = loan_lead("Approved");
        lead.disbursements.push(disbursement(DisbursementStatus::Failed));
        lead.disbursements.push(disbursement(DisbursementStatus::Completed));
        assert!(!is_eligible(&lead));
    }

    #[test]
    fn non_failed_records_block_disbursement() {
        for status in [DisbursementStatus::Initiated, DisbursementStatus::Processing] {
            let mut lead = loan_lead("Approved");
            lead.disbursements.push(disbursement(status));
            assert!(!is_eligible(&lead), "{} record must block", status);
        }
    }

    #[test]
    fn report_names_every_failing_check() {
        let mut lead = loan_lead("New");
        lead.service_type = ServiceType::Insurance;
        lead.bank_details = None;
        lead.disbursements.push(disbursement(DisbursementStatus::Completed));

        let report = check_eligibility(&lead);
        assert!(!report.eligible);
        assert!(!report.is_loan);
        assert!(!report.is_approved);
        assert!(!report.bank_details_verified);
        assert!(!report.no_blocking_disbursements);
        assert_eq!(report.reasons.len(), 4);
    }

    #[test]
    fn report_is_clean_for_eligible_lead() {
        let report = check_eligibility(&loan_lead("Approved"));
        assert!(report.eligible);
        assert!(report.reasons.is_empty());
    }
}

#[cfg(test)]
mod settlement_tests {
    use super::*;

    #[test]
    fn successful_transfer_completes_and_flips_status() {
        // Approved loan, verified bank, no prior disbursements: one
        // successful payout yields exactly one completed record.
        let mut lead = loan_lead("Approved");
        let result = DisbursementResult {
            success: true,
            reference_id: "pout_1".to_string(),
            error: None,
            gateway_response: Some(serde_json::json!({ "status": "processing" })),
        };

        settle_disbursement(&mut lead, disbursement(DisbursementStatus::Initiated), result, "2");

        assert_eq!(lead.status, "Disbursed");
        assert_eq!(lead.disbursements.len(), 1);
        let record = &lead.disbursements[0];
        assert_eq!(record.status, DisbursementStatus::Completed);
        assert_eq!(record.reference_id, "pout_1");
        assert!(record.completed_at.is_some());
        assert!(record.failure_reason.is_none());

        let entry = lead.history.last().expect("history entry written");
        assert_eq!(entry.status, "Disbursed");
        assert_eq!(entry.user, "2");
        let remarks = entry.remarks.as_deref().unwrap();
        assert!(remarks.contains("500000"));
        assert!(remarks.contains("pout_1"));

        // Terminal: no further disbursement is ever possible.
        assert!(!is_eligible(&lead));
    }

    #[test]
    fn failed_transfer_keeps_status_and_permits_retry() {
        let mut lead = loan_lead("Approved");
        let result = DisbursementResult::failure("insufficient gateway balance");

        settle_disbursement(&mut lead, disbursement(DisbursementStatus::Initiated), result, "2");

        assert_eq!(lead.status, "Approved");
        assert_eq!(lead.disbursements.len(), 1);
        let record = &lead.disbursements[0];
        assert_eq!(record.status, DisbursementStatus::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("insufficient gateway balance"));

        let entry = lead.history.last().expect("history entry written");
        assert_eq!(entry.status, "Approved");
        assert!(entry.remarks.as_deref().unwrap().contains("insufficient gateway balance"));

        // A second attempt is permitted and appends a second record.
        assert!(is_eligible(&lead));
        let retry = DisbursementResult {
            success: true,
            reference_id: "pout_2".to_string(),
            error: None,
            gateway_response: None,
        };
        settle_disbursement(&mut lead, disbursement(DisbursementStatus::Initiated), retry, "2");

        assert_eq!(lead.disbursements.len(), 2);
        assert_eq!(lead.status, "Disbursed");
        let completed = lead
            .disbursements
            .iter()
            .filter(|d| d.status == DisbursementStatus::Completed)
            .count();
        assert_eq!(completed, 1);
    }

    #[test]
    fn settlement_always_appends_exactly_one_record() {
        let mut lead = loan_lead("Approved");
        settle_disbursement(
            &mut lead,
            disbursement(DisbursementStatus::Initiated),
            DisbursementResult::failure("declined"),
            "2",
        );
        settle_disbursement(
            &mut lead,
            disbursement(DisbursementStatus::Initiated),
            DisbursementResult::failure("declined again"),
            "2",
        );
        assert_eq!(lead.disbursements.len(), 2);
        assert_eq!(lead.history.len(), 2);
    }
}

#[cfg(test)]
mod bank_validation_tests {
    use super::*;

    #[test]
    fn valid_details_pass() {
        assert!(validate_bank_details(&verified_bank()).is_empty());
    }

    #[test]
    fn short_holder_name_fails() {
        let mut bank = verified_bank();
        bank.account_holder_name = "M".to_string();
        let errors = validate_bank_details(&bank);
        assert!(errors.iter().any(|e| e.contains("Account holder name")));
    }

    #[test]
    fn short_account_number_fails() {
        let mut bank = verified_bank();
        bank.account_number = "1234567".to_string();
        assert!(!validate_bank_details(&bank).is_empty());
    }

    #[test]
    fn non_numeric_account_number_fails() {
        let mut bank = verified_bank();
        bank.account_number = "12345678AB".to_string();
        assert!(!validate_bank_details(&bank).is_empty());
    }

    #[test]
    fn ifsc_format_is_enforced() {
        let mut bank = verified_bank();
        bank.ifsc_code = "SBIN1001234".to_string(); // fifth char must be 0
        assert!(validate_bank_details(&bank)
            .iter()
            .any(|e| e.contains("IFSC")));

        bank.ifsc_code = "SB0001234".to_string();
        assert!(!validate_bank_details(&bank).is_empty());
    }

    #[test]
    fn missing_bank_name_fails() {
        let mut bank = verified_bank();
        bank.bank_name = " ".to_string();
        assert!(validate_bank_details(&bank)
            .iter()
            .any(|e| e.contains("Bank name")));
    }
}
