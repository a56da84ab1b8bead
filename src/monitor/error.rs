// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Monitor error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Alert rule not found: {0}")]
    RuleNotFound(String),

    #[error("Alert rule already exists: {0}")]
    DuplicateRule(String),

    #[error("Invalid alert rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("No active alert with id {0}")]
    AlertNotFound(String),
}

impl MonitorError {
    pub fn invalid_rule(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = MonitorError::invalid_rule("slow", "threshold must be finite");
        assert_eq!(
            err.to_string(),
            "Invalid alert rule 'slow': threshold must be finite"
        );
        assert_eq!(
            MonitorError::RuleNotFound("x".into()).to_string(),
            "Alert rule not found: x"
        );
    }
}
