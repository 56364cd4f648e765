//! Scan targets, verdicts and policy decisions.

use std::fmt;

use serde::Serialize;

// -- Categories --

/// Group of scan targets that policy enables or disables as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanCategory {
    FormFile,
    Body,
    Metadata,
}

impl ScanCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormFile => "form-file",
            Self::Body => "body",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ScanCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Targets --

/// A named, independently scannable byte stream derived from a transaction.
///
/// The label is only used for logging and error attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub category: ScanCategory,
    pub label: String,
}

impl ScanTarget {
    pub fn request_body() -> Self {
        Self {
            category: ScanCategory::Body,
            label: "request body".to_string(),
        }
    }

    pub fn response_body() -> Self {
        Self {
            category: ScanCategory::Body,
            label: "response body".to_string(),
        }
    }

    pub fn form_file(field: &str, filename: &str) -> Self {
        Self {
            category: ScanCategory::FormFile,
            label: format!("form file {field}/{filename}"),
        }
    }

    pub fn metadata() -> Self {
        Self {
            category: ScanCategory::Metadata,
            label: "metadata".to_string(),
        }
    }
}

// -- Verdicts --

/// Outcome of scanning one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Infected { signature: String },
    /// The scanner could not produce a result. Treated as a detection.
    ScanError(String),
}

impl Verdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Infected { .. } => "infected",
            Self::ScanError(_) => "scan-error",
        }
    }
}

/// A target together with the verdict the scanner gave it.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub target: ScanTarget,
    pub verdict: Verdict,
}

// -- Decisions --

/// Why a category denied the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyCause {
    /// The scanner reported an infection.
    Flagged,
    /// The scanner was unreachable or answered with an error.
    ScanError,
}

/// Denial attributed to a category.
///
/// The display form names the category and whether the content was flagged
/// or the scan service failed; signature names are never part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyReason {
    pub category: ScanCategory,
    pub cause: DenyCause,
    /// Label of the target that failed, for logs only.
    pub target: String,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            DenyCause::Flagged => write!(f, "virus found in {}", self.category),
            DenyCause::ScanError => {
                write!(f, "scan-error: scan service failed while checking {}", self.category)
            }
        }
    }
}

/// Overall admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Self::Admit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names() {
        assert_eq!(ScanCategory::FormFile.to_string(), "form-file");
        assert_eq!(ScanCategory::Body.to_string(), "body");
        assert_eq!(
            serde_json::to_value(ScanCategory::Metadata).unwrap(),
            "metadata"
        );
    }

    #[test]
    fn form_file_target_label() {
        let target = ScanTarget::form_file("upload", "report.pdf");
        assert_eq!(target.category, ScanCategory::FormFile);
        assert_eq!(target.label, "form file upload/report.pdf");
    }

    #[test]
    fn deny_reason_hides_signature() {
        let reason = DenyReason {
            category: ScanCategory::Body,
            cause: DenyCause::Flagged,
            target: "request body".to_string(),
        };
        assert_eq!(reason.to_string(), "virus found in body");
    }

    #[test]
    fn deny_reason_for_scan_error() {
        let reason = DenyReason {
            category: ScanCategory::Metadata,
            cause: DenyCause::ScanError,
            target: "metadata".to_string(),
        };
        let message = reason.to_string();
        assert!(message.starts_with("scan-error"));
        assert!(message.contains("metadata"));
    }
}
