use crate::model::{SchoolConfig, TeacherProfile};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Password given to teachers created without one.
pub const DEFAULT_TEACHER_PASSWORD: &str = "password123";

/// Step-up password on a fresh workspace.
pub const DEFAULT_SCHOOL_PASSWORD: &str = "admin123";

/// Universal login password accepted only under `LoginPolicy::legacy_fallback`.
/// Reproduced for parity with the system this daemon replaces; it lets anyone
/// who knows a staff id sign in as that teacher.
pub const LEGACY_FALLBACK_PASSWORD: &str = "admin123";

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Deliberately does not say which half of the pair was wrong.
    #[error("invalid identifier or password")]
    InvalidCredentials,
    #[error("school password confirmation failed")]
    StepUpRejected,
    #[error("{0}")]
    Validation(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "auth_failed",
            AuthError::StepUpRejected => "step_up_failed",
            AuthError::Validation(_) => "validation_failed",
        }
    }
}

/// A stored secret. Plain values only appear in data imported from older
/// exports; everything this daemon writes is salted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    Salted { salt: String, hash: String },
    Plain(String),
}

impl Credential {
    pub fn new(password: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let hash = digest(&salt, password);
        Credential::Salted { salt, hash }
    }

    pub fn verify(&self, password: &str) -> bool {
        match self {
            Credential::Salted { salt, hash } => constant_eq(&digest(salt, password), hash),
            Credential::Plain(value) => constant_eq(value, password),
        }
    }

    pub fn is_legacy_plain(&self) -> bool {
        matches!(self, Credential::Plain(_))
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut h = Sha256::new();
    h.update(salt.as_bytes());
    h.update(password.as_bytes());
    hex::encode(h.finalize())
}

fn constant_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginPolicy {
    pub legacy_fallback: bool,
}

/// Resolve an identifier (staff id or email) and password to a teacher.
pub fn login(
    teachers: &[TeacherProfile],
    identifier: &str,
    password: &str,
    policy: LoginPolicy,
) -> Result<TeacherProfile, AuthError> {
    let ident = identifier.trim();
    if ident.is_empty() || password.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }
    let found = teachers.iter().find(|t| {
        t.staff_id.trim() == ident
            || (!t.email.trim().is_empty() && t.email.trim().eq_ignore_ascii_case(ident))
    });
    let Some(teacher) = found else {
        tracing::info!("login rejected");
        return Err(AuthError::InvalidCredentials);
    };
    let accepted = teacher.password.verify(password)
        || (policy.legacy_fallback && password == LEGACY_FALLBACK_PASSWORD);
    if !accepted {
        tracing::info!("login rejected");
        return Err(AuthError::InvalidCredentials);
    }
    if teacher.password.is_legacy_plain() {
        tracing::warn!(teacher_id = %teacher.id, "login accepted with an unhashed credential");
    } else {
        tracing::info!(teacher_id = %teacher.id, "login accepted");
    }
    Ok(teacher.clone())
}

/// Second challenge before destructive bulk actions.
pub fn confirm_step_up(config: &SchoolConfig, supplied: Option<&str>) -> Result<(), AuthError> {
    match supplied {
        Some(p) if config.school_password.verify(p) => Ok(()),
        _ => {
            tracing::warn!("step-up confirmation rejected");
            Err(AuthError::StepUpRejected)
        }
    }
}

/// Validate a new/confirm pair and build the credential that replaces `current`.
pub fn change_password(
    current: &Credential,
    current_password: &str,
    new_password: &str,
    confirm_password: &str,
    min_len: usize,
) -> Result<Credential, AuthError> {
    if !current.verify(current_password) {
        return Err(AuthError::InvalidCredentials);
    }
    new_credential(new_password, confirm_password, min_len)
}

pub fn new_credential(
    new_password: &str,
    confirm_password: &str,
    min_len: usize,
) -> Result<Credential, AuthError> {
    if new_password != confirm_password {
        return Err(AuthError::Validation(
            "new password and confirmation do not match".into(),
        ));
    }
    if new_password.chars().count() < min_len {
        return Err(AuthError::Validation(format!(
            "password must be at least {} characters",
            min_len
        )));
    }
    Ok(Credential::new(new_password))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher(staff_id: &str, email: &str, password: Credential) -> TeacherProfile {
        TeacherProfile {
            id: format!("t-{}", staff_id),
            name: "Cikgu Test".into(),
            staff_id: staff_id.into(),
            email: email.into(),
            department: String::new(),
            roles: vec![],
            subjects: vec![],
            is_admin: false,
            password,
            merits_given: 0,
            demerits_given: 0,
            avatar: String::new(),
        }
    }

    #[test]
    fn salted_credential_verifies_only_its_password() {
        let c = Credential::new("rahsia99");
        assert!(c.verify("rahsia99"));
        assert!(!c.verify("rahsia98"));
        assert!(!c.is_legacy_plain());
        let Credential::Salted { salt, hash } = &c else {
            panic!("expected salted credential");
        };
        assert_eq!(salt.len(), 32);
        assert_eq!(hash.len(), 64);
        assert_ne!(Credential::new("rahsia99"), c, "salt must differ per call");
    }

    #[test]
    fn plain_credentials_deserialize_from_bare_strings() {
        let c: Credential = serde_json::from_str("\"hello\"").expect("parse");
        assert_eq!(c, Credential::Plain("hello".into()));
        assert!(c.verify("hello"));
    }

    #[test]
    fn login_matches_staff_id_or_email() {
        let teachers = vec![teacher("T100", "Aminah@School.edu.my", Credential::new("secret1"))];
        let policy = LoginPolicy::default();
        assert!(login(&teachers, "T100", "secret1", policy).is_ok());
        assert!(login(&teachers, "aminah@school.edu.my", "secret1", policy).is_ok());
        assert!(login(&teachers, "  T100 ", "secret1", policy).is_ok());
    }

    #[test]
    fn login_failures_are_indistinguishable() {
        let teachers = vec![teacher("T100", "a@b.c", Credential::new("secret1"))];
        let policy = LoginPolicy::default();
        let wrong_pw = login(&teachers, "T100", "nope", policy).unwrap_err();
        let unknown = login(&teachers, "T999", "secret1", policy).unwrap_err();
        assert_eq!(wrong_pw, unknown);
        assert_eq!(wrong_pw.to_string(), unknown.to_string());
        assert_eq!(wrong_pw.code(), "auth_failed");
    }

    #[test]
    fn universal_fallback_requires_legacy_policy() {
        let teachers = vec![teacher("T100", "", Credential::new("secret1"))];
        assert!(login(&teachers, "T100", LEGACY_FALLBACK_PASSWORD, LoginPolicy::default()).is_err());
        let legacy = LoginPolicy {
            legacy_fallback: true,
        };
        assert!(login(&teachers, "T100", LEGACY_FALLBACK_PASSWORD, legacy).is_ok());
        assert!(login(&teachers, "T999", LEGACY_FALLBACK_PASSWORD, legacy).is_err());
    }

    #[test]
    fn change_password_checks_current_and_confirmation() {
        let current = Credential::new("oldpass");
        assert_eq!(
            change_password(&current, "wrong", "newpass1", "newpass1", MIN_PASSWORD_LEN),
            Err(AuthError::InvalidCredentials)
        );
        assert!(matches!(
            change_password(&current, "oldpass", "newpass1", "newpass2", MIN_PASSWORD_LEN),
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            change_password(&current, "oldpass", "abc", "abc", MIN_PASSWORD_LEN),
            Err(AuthError::Validation(_))
        ));
        let next = change_password(&current, "oldpass", "newpass1", "newpass1", MIN_PASSWORD_LEN)
            .expect("changed");
        assert!(next.verify("newpass1"));
    }
}
