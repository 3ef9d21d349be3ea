use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

pub const PASSWORD_MIN_LEN: usize = 6;
pub const PASSWORD_MAX_LEN: usize = 128;
pub const USERNAME_MAX_LEN: usize = 64;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn field_error(label: &str, reason: &str) -> String {
    format!("Error in the {label} field - {reason}")
}

/// Registration form body.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl RegisterForm {
    /// Normalise the fields in place and return the validation messages.
    pub fn validate(&mut self) -> Vec<String> {
        self.email = self.email.trim().to_lowercase();
        self.username = self.username.trim().to_string();

        let mut errors = Vec::new();
        if self.email.is_empty() {
            errors.push(field_error("Email", "This field is required."));
        } else if !is_valid_email(&self.email) {
            errors.push(field_error("Email", "Invalid email address."));
        }

        let name_len = self.username.chars().count();
        if name_len == 0 {
            errors.push(field_error("Username", "This field is required."));
        } else if name_len > USERNAME_MAX_LEN {
            errors.push(field_error(
                "Username",
                &format!("Field cannot be longer than {USERNAME_MAX_LEN} characters."),
            ));
        }

        let pass_len = self.password.chars().count();
        if pass_len < PASSWORD_MIN_LEN || pass_len > PASSWORD_MAX_LEN {
            errors.push(field_error(
                "Password",
                &format!(
                    "Field must be between {PASSWORD_MIN_LEN} and {PASSWORD_MAX_LEN} characters long."
                ),
            ));
        }
        errors
    }
}

/// Login form body.
#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl LoginForm {
    pub fn validate(&mut self) -> Vec<String> {
        self.email = self.email.trim().to_lowercase();

        let mut errors = Vec::new();
        if self.email.is_empty() {
            errors.push(field_error("Email", "This field is required."));
        } else if !is_valid_email(&self.email) {
            errors.push(field_error("Email", "Invalid email address."));
        }
        if self.password.is_empty() {
            errors.push(field_error("Password", "This field is required."));
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_form_normalises_and_accepts() {
        let mut form = RegisterForm {
            email: "  A@X.com ".into(),
            username: " alice ".into(),
            password: "secret1".into(),
        };
        assert!(form.validate().is_empty());
        assert_eq!(form.email, "a@x.com");
        assert_eq!(form.username, "alice");
    }

    #[test]
    fn register_form_reports_each_bad_field() {
        let mut form = RegisterForm {
            email: "not-an-email".into(),
            username: "".into(),
            password: "123".into(),
        };
        let errors = form.validate();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("Error in the Email field"));
        assert!(errors[1].starts_with("Error in the Username field"));
        assert!(errors[2].starts_with("Error in the Password field"));
    }

    #[test]
    fn login_form_requires_both_fields() {
        let mut form = LoginForm::default();
        assert_eq!(form.validate().len(), 2);
    }

    #[test]
    fn email_regex() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a b@x.com"));
    }
}
