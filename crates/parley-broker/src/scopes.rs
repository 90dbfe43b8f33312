//! Static scope templates
//!
//! A scope names an interaction category and maps to default permission and
//! exclusion sets. Unknown scopes resolve to empty sets: nothing is ever
//! implicitly allowed.

/// Default permission/exclusion template for a named scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeTemplate {
    pub default_permissions: Vec<String>,
    pub default_exclusions: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ScopeRegistry {
    templates: Vec<(String, ScopeTemplate)>,
}

impl ScopeRegistry {
    /// Registry with the built-in interaction scopes.
    pub fn builtin() -> Self {
        let mut registry = Self {
            templates: Vec::new(),
        };
        registry.insert(
            "flight-rebooking",
            &[
                "read_bookings",
                "search_alternatives",
                "request_rebooking",
                "charge_payment_on_file",
            ],
            &[
                "loyalty_transfers",
                "personal_documents",
                "e_credit_access",
                "account_changes",
            ],
        );
        registry.insert(
            "prescription-refill",
            &["read_prescriptions", "request_refill", "confirm_pharmacy"],
            &["medical_records", "insurance_details", "provider_notes"],
        );
        registry
    }

    fn insert(&mut self, scope: &str, permissions: &[&str], exclusions: &[&str]) {
        self.templates.push((
            scope.to_string(),
            ScopeTemplate {
                default_permissions: permissions.iter().map(|s| s.to_string()).collect(),
                default_exclusions: exclusions.iter().map(|s| s.to_string()).collect(),
            },
        ));
    }

    pub fn template(&self, scope: &str) -> Option<&ScopeTemplate> {
        self.templates
            .iter()
            .find(|(name, _)| name == scope)
            .map(|(_, t)| t)
    }

    /// Resolve a requested scope into (permissions, exclusions).
    ///
    /// An explicit permission request overrides the template's defaults;
    /// exclusions always come from the template.
    pub fn resolve(
        &self,
        scope: &str,
        requested_permissions: Option<&[String]>,
    ) -> (Vec<String>, Vec<String>) {
        let template = self.template(scope);
        let permissions = match requested_permissions {
            Some(requested) => requested.to_vec(),
            None => template
                .map(|t| t.default_permissions.clone())
                .unwrap_or_default(),
        };
        let excluded = template
            .map(|t| t.default_exclusions.clone())
            .unwrap_or_default();
        (permissions, excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_scopes_present() {
        let registry = ScopeRegistry::builtin();
        let flight = registry.template("flight-rebooking").unwrap();
        assert!(flight
            .default_permissions
            .contains(&"read_bookings".to_string()));
        assert!(flight
            .default_exclusions
            .contains(&"loyalty_transfers".to_string()));
        assert!(registry.template("prescription-refill").is_some());
    }

    #[test]
    fn unknown_scope_resolves_to_empty_sets() {
        let registry = ScopeRegistry::builtin();
        let (permissions, excluded) = registry.resolve("dog-walking", None);
        assert!(permissions.is_empty());
        assert!(excluded.is_empty());
    }

    #[test]
    fn requested_permissions_override_defaults() {
        let registry = ScopeRegistry::builtin();
        let requested = vec!["read_bookings".to_string()];
        let (permissions, excluded) = registry.resolve("flight-rebooking", Some(&requested));
        assert_eq!(permissions, requested);
        // Exclusions still come from the template.
        assert!(excluded.contains(&"loyalty_transfers".to_string()));
    }
}
