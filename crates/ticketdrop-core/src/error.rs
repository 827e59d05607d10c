use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    TicketNotFound,
    IllegalTransition,
    ValidationFailed,
    DuplicateTimestamp,
    SequenceExhausted,
    InvalidFieldValue,
    ReconciliationConflict,
    ReconciliationFailed,
    ExportPartialFailure,
    StorageUnavailable,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::TicketNotFound => "E2001",
            Self::IllegalTransition => "E2002",
            Self::ValidationFailed => "E2003",
            Self::DuplicateTimestamp => "E2004",
            Self::SequenceExhausted => "E2005",
            Self::InvalidFieldValue => "E2006",
            Self::ReconciliationConflict => "E3001",
            Self::ReconciliationFailed => "E3002",
            Self::ExportPartialFailure => "E4001",
            Self::StorageUnavailable => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::TicketNotFound => "Ticket not found",
            Self::IllegalTransition => "Mutation not allowed in the current stage",
            Self::ValidationFailed => "Ticket failed validation",
            Self::DuplicateTimestamp => "Field timestamp already recorded",
            Self::SequenceExhausted => "Daily ticket sequence exhausted",
            Self::InvalidFieldValue => "Invalid field value",
            Self::ReconciliationConflict => "Stale offline update discarded",
            Self::ReconciliationFailed => "Offline update needs manual reconciliation",
            Self::ExportPartialFailure => "Export batch partially recorded",
            Self::StorageUnavailable => "Ticket storage unavailable",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `td init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .ticketdrop/config.toml and retry."),
            Self::TicketNotFound => None,
            Self::IllegalTransition => Some(
                "Follow the lifecycle: pending -> assigned -> in_progress -> completed -> exported.",
            ),
            Self::ValidationFailed => Some("Correct the named fields and resubmit."),
            Self::DuplicateTimestamp => {
                Some("Timestamps are append-only; record corrections in the ticket notes.")
            }
            Self::SequenceExhausted => {
                Some("999 tickets already exist for this date; an operator must intervene.")
            }
            Self::InvalidFieldValue => Some("Check the field name and value format."),
            Self::ReconciliationConflict => None,
            Self::ReconciliationFailed => {
                Some("Inspect `td queue failed` and re-apply the update by hand.")
            }
            Self::ExportPartialFailure => {
                Some("Check the batch report; unmarked tickets can be re-exported.")
            }
            Self::StorageUnavailable => Some("Check disk space and write permissions, then retry."),
            Self::LockContention => Some("Retry after the other `td` process releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotInitialized,
            ErrorCode::ConfigParseError,
            ErrorCode::TicketNotFound,
            ErrorCode::IllegalTransition,
            ErrorCode::ValidationFailed,
            ErrorCode::DuplicateTimestamp,
            ErrorCode::SequenceExhausted,
            ErrorCode::InvalidFieldValue,
            ErrorCode::ReconciliationConflict,
            ErrorCode::ReconciliationFailed,
            ErrorCode::ExportPartialFailure,
            ErrorCode::StorageUnavailable,
            ErrorCode::LockContention,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::DuplicateTimestamp.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn informational_codes_have_no_hint() {
        assert!(ErrorCode::ReconciliationConflict.hint().is_none());
        assert!(ErrorCode::SequenceExhausted.hint().is_some());
    }
}
