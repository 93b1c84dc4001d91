use std::collections::BTreeMap;

use validator::Validate;

/// The contact form as submitted. Every field may be missing.
#[derive(Debug, Clone, Default, FromForm)]
pub struct ContactForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
}

/// A contact form that passed validation, with surrounding whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct ContactFields {
    #[validate(length(min = 1, message = "The name field is required."))]
    pub name: String,
    #[validate(
        length(min = 1, message = "The email field is required."),
        email(message = "The email field must be a valid email address.")
    )]
    pub email: String,
    #[validate(length(min = 1, message = "The message field is required."))]
    pub message: String,
}

/// Field name to message, one message per failing field.
#[derive(Debug, Default, Clone, PartialEq, Eq, thiserror::Error)]
#[error("the given data was invalid")]
pub struct ValidationError {
    errors: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors
            .iter()
            .map(|(field, message)| (field.as_str(), message.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

}

impl From<validator::ValidationErrors> for ValidationError {
    /// Keeps one message per field; a missing value wins over a malformed one.
    fn from(errors: validator::ValidationErrors) -> Self {
        let errors = errors
            .field_errors()
            .into_iter()
            .filter_map(|(field, failures)| {
                let first = failures
                    .iter()
                    .find(|e| e.code == "length")
                    .or_else(|| failures.first())?;
                let message = first
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("The {} field is invalid.", field));

                Some((field.to_string(), message))
            })
            .collect();

        Self { errors }
    }
}

pub trait Validator: Send + Sync {
    fn validate(&self, form: &ContactForm) -> Result<ContactFields, ValidationError>;
}

/// name required, email required and well formed, message required.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContactRules;

impl Validator for ContactRules {
    fn validate(&self, form: &ContactForm) -> Result<ContactFields, ValidationError> {
        let fields = ContactFields {
            name: trimmed(&form.name),
            email: trimmed(&form.email),
            message: trimmed(&form.message),
        };

        fields.validate()?;
        Ok(fields)
    }
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, email: &str, message: &str) -> ContactForm {
        ContactForm {
            name: Some(name.into()),
            email: Some(email.into()),
            message: Some(message.into()),
        }
    }

    #[test]
    fn valid_form_is_trimmed() {
        let fields = ContactRules
            .validate(&form(" Jane ", "jane@example.com ", "Hello"))
            .expect("valid");

        assert_eq!(
            ContactFields {
                name: "Jane".into(),
                email: "jane@example.com".into(),
                message: "Hello".into(),
            },
            fields
        );
    }

    #[test]
    fn missing_fields_are_required() {
        let errors = ContactRules
            .validate(&ContactForm::default())
            .unwrap_err();

        assert_eq!(Some("The name field is required."), errors.get("name"));
        assert_eq!(Some("The email field is required."), errors.get("email"));
        assert_eq!(Some("The message field is required."), errors.get("message"));
    }

    #[test]
    fn blank_message_is_required() {
        let errors = ContactRules
            .validate(&form("Jane", "jane@example.com", "   "))
            .unwrap_err();

        assert_eq!(
            vec![("message", "The message field is required.")],
            errors.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn malformed_email_is_rejected() {
        for email in ["not-an-email", "jane@", "@example.com", "ja ne@example.com"] {
            let errors = ContactRules
                .validate(&form("Jane", email, "Hello"))
                .unwrap_err();

            assert_eq!(
                Some("The email field must be a valid email address."),
                errors.get("email"),
                "{}",
                email
            );
        }
    }

    #[test]
    fn address_without_a_dot_in_the_domain_is_accepted() {
        let fields = ContactRules
            .validate(&form("Jane", "jane@example", "Hello"))
            .expect("valid");

        assert_eq!("jane@example", fields.email);
    }

    #[test]
    fn blank_email_reports_only_required() {
        let errors = ContactRules
            .validate(&form("Jane", "  ", "Hello"))
            .unwrap_err();

        assert_eq!(
            vec![("email", "The email field is required.")],
            errors.iter().collect::<Vec<_>>()
        );
    }
}
