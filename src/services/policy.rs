//! Scan policy: which categories are scanned, in which order, and how
//! per-target verdicts fold into an admit/deny decision.
//!
//! Requests are checked form files, then body, then metadata, so a failing
//! upload stops the pipeline before the full body is scanned. Responses have
//! no form files and are checked body, then metadata.

use crate::models::scan::{Decision, DenyCause, DenyReason, ScanCategory, ScanOutcome, Verdict};
use crate::models::transaction::TransactionKind;

const REQUEST_ORDER: [ScanCategory; 3] = [
    ScanCategory::FormFile,
    ScanCategory::Body,
    ScanCategory::Metadata,
];
const RESPONSE_ORDER: [ScanCategory; 2] = [ScanCategory::Body, ScanCategory::Metadata];

/// Per-category scan switches. Every category is enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPolicy {
    pub scan_metadata: bool,
    pub scan_body: bool,
    pub scan_form_files: bool,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            scan_metadata: true,
            scan_body: true,
            scan_form_files: true,
        }
    }
}

impl ScanPolicy {
    pub fn is_enabled(&self, category: ScanCategory) -> bool {
        match category {
            ScanCategory::FormFile => self.scan_form_files,
            ScanCategory::Body => self.scan_body,
            ScanCategory::Metadata => self.scan_metadata,
        }
    }

    /// Enabled categories for a transaction leg, in evaluation order.
    pub fn categories(&self, kind: TransactionKind) -> Vec<ScanCategory> {
        let order: &[ScanCategory] = match kind {
            TransactionKind::Request => &REQUEST_ORDER,
            TransactionKind::Response => &RESPONSE_ORDER,
        };
        order
            .iter()
            .copied()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }

    /// Fold outcomes into a decision. The first failing outcome of an enabled
    /// category wins; outcomes of disabled categories are ignored.
    pub fn decide(&self, outcomes: &[ScanOutcome]) -> Decision {
        for outcome in outcomes {
            let category = outcome.target.category;
            if !self.is_enabled(category) {
                continue;
            }
            let cause = match &outcome.verdict {
                Verdict::Clean => continue,
                Verdict::Infected { .. } => DenyCause::Flagged,
                Verdict::ScanError(_) => DenyCause::ScanError,
            };
            return Decision::Deny(DenyReason {
                category,
                cause,
                target: outcome.target.label.clone(),
            });
        }
        Decision::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scan::ScanTarget;

    fn outcome(target: ScanTarget, verdict: Verdict) -> ScanOutcome {
        ScanOutcome { target, verdict }
    }

    fn infected() -> Verdict {
        Verdict::Infected {
            signature: "Eicar-Test-Signature".to_string(),
        }
    }

    #[test]
    fn request_order_is_files_body_metadata() {
        let policy = ScanPolicy::default();
        assert_eq!(
            policy.categories(TransactionKind::Request),
            vec![ScanCategory::FormFile, ScanCategory::Body, ScanCategory::Metadata]
        );
        assert_eq!(
            policy.categories(TransactionKind::Response),
            vec![ScanCategory::Body, ScanCategory::Metadata]
        );
    }

    #[test]
    fn disabled_categories_are_skipped() {
        let policy = ScanPolicy {
            scan_metadata: true,
            scan_body: false,
            scan_form_files: false,
        };
        assert_eq!(
            policy.categories(TransactionKind::Request),
            vec![ScanCategory::Metadata]
        );
        let decision = policy.decide(&[outcome(ScanTarget::request_body(), infected())]);
        assert_eq!(decision, Decision::Admit);
    }

    #[test]
    fn all_clean_admits() {
        let policy = ScanPolicy::default();
        let decision = policy.decide(&[
            outcome(ScanTarget::form_file("a", "a.txt"), Verdict::Clean),
            outcome(ScanTarget::metadata(), Verdict::Clean),
        ]);
        assert!(decision.is_admit());
        assert!(policy.decide(&[]).is_admit());
    }

    #[test]
    fn infection_denies_with_category() {
        let policy = ScanPolicy::default();
        let decision = policy.decide(&[
            outcome(ScanTarget::form_file("a", "a.txt"), Verdict::Clean),
            outcome(ScanTarget::form_file("b", "b.exe"), infected()),
        ]);
        match decision {
            Decision::Deny(reason) => {
                assert_eq!(reason.category, ScanCategory::FormFile);
                assert_eq!(reason.cause, DenyCause::Flagged);
                assert_eq!(reason.target, "form file b/b.exe");
            }
            Decision::Admit => panic!("expected deny"),
        }
    }

    #[test]
    fn scan_error_fails_closed() {
        let policy = ScanPolicy::default();
        let decision = policy.decide(&[outcome(
            ScanTarget::metadata(),
            Verdict::ScanError("connection refused".to_string()),
        )]);
        match decision {
            Decision::Deny(reason) => assert_eq!(reason.cause, DenyCause::ScanError),
            Decision::Admit => panic!("scan errors must deny"),
        }
    }
}
