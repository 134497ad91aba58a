pub mod agent_log;
pub mod assignment;
pub mod business_unit;
pub mod delegation;
pub mod fact;
pub mod routing;
pub mod rules;

use crate::errors::DomainError;

pub const MIN_REJECTION_REASON_CHARS: usize = 5;

/// Shared guard for BU/synergy and delegation rejections: a rejection must
/// carry a reason of at least five characters (after trimming).
pub fn validate_rejection_reason(reason: Option<&str>) -> Result<String, DomainError> {
    let trimmed = reason.unwrap_or_default().trim();
    if trimmed.chars().count() < MIN_REJECTION_REASON_CHARS {
        return Err(DomainError::RejectionReasonTooShort { minimum: MIN_REJECTION_REASON_CHARS });
    }
    Ok(trimmed.to_string())
}
