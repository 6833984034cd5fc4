//! Task definition reference catalog, seeded once at first run.

use crate::models::{TaskCategory, TaskDefinition};

/// Equal share of the 0–100 total per task (8 tasks → 12.5 each).
pub const TASK_SHARE: f64 = 100.0 / 8.0;

fn def(
    id: &str,
    title: &str,
    description: &str,
    category: TaskCategory,
    required: bool,
    verification_required: bool,
) -> TaskDefinition {
    TaskDefinition {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        category,
        points: TASK_SHARE,
        required,
        verification_required,
    }
}

/// The full reference set. Order is the presentation order and is
/// preserved by the seeded rowids.
pub fn task_catalog() -> Vec<TaskDefinition> {
    vec![
        def(
            "add-contact-details",
            "Add contact details",
            "Add your address and phone number so services can reach you.",
            TaskCategory::Contact,
            true,
            false,
        ),
        def(
            "verify-email",
            "Verify your email",
            "Confirm the verification link sent to your email address.",
            TaskCategory::Contact,
            false,
            true,
        ),
        def(
            "add-identity-document",
            "Add an identity document",
            "Register a passport, ID card or driving licence.",
            TaskCategory::Identity,
            true,
            true,
        ),
        def(
            "confirm-identity",
            "Confirm your identity",
            "Complete an identity check against your registered document.",
            TaskCategory::Verification,
            false,
            true,
        ),
        def(
            "register-services",
            "Register for services",
            "Connect the services you want to use with your profile.",
            TaskCategory::Services,
            false,
            false,
        ),
        def(
            "add-cv-summary",
            "Add a CV summary",
            "Add a short professional summary to your profile.",
            TaskCategory::Services,
            false,
            false,
        ),
        def(
            "set-pin",
            "Set a PIN",
            "Protect your profile with a PIN code.",
            TaskCategory::Security,
            true,
            false,
        ),
        def(
            "enable-account-recovery",
            "Enable account recovery",
            "Configure a recovery option in case you lose access.",
            TaskCategory::Security,
            false,
            false,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_eight_unique_tasks() {
        let catalog = task_catalog();
        assert_eq!(catalog.len(), 8);
        let mut ids: Vec<_> = catalog.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        for d in &catalog {
            assert_eq!(d.points, TASK_SHARE);
        }
    }
}
