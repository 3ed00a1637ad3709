//! External Account Records
//!
//! User-linked registered counterparty accounts at the upstream bank.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registered external counterparty account
///
/// Unique per `(user_id, account_number, routing_number)`. The validated
/// flag is upgraded exactly once on successful upstream validation and is
/// never automatically cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_holder_name: String,
    pub account_number: String,
    pub routing_number: String,
    pub institution_name: Option<String>,
    pub validated: bool,
    pub validation_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalAccount {
    /// Mark the account validated at the given time.
    ///
    /// Has no effect on an already-validated account.
    pub fn mark_validated(&mut self, at: DateTime<Utc>) {
        if !self.validated {
            self.validated = true;
            self.validation_time = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn account() -> ExternalAccount {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        ExternalAccount {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            account_holder_name: "Pat Q. Holder".to_string(),
            account_number: "000123456789".to_string(),
            routing_number: "110000000".to_string(),
            institution_name: None,
            validated: false,
            validation_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_mark_validated_is_idempotent() {
        let mut acct = account();
        let first = Utc.with_ymd_and_hms(2024, 6, 2, 9, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();

        acct.mark_validated(first);
        assert!(acct.validated);
        assert_eq!(acct.validation_time, Some(first));

        // A later call must not move the validation timestamp.
        acct.mark_validated(second);
        assert_eq!(acct.validation_time, Some(first));
    }
}
