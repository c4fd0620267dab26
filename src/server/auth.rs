//! Credential verification seam. The original dynamically loads a plugin exposing
//! `verifyToken`/`verifyUsernameAndPassword`; dynamic loading itself is out of scope, but
//! the same two-method contract is kept as a trait object so a real verifier can be
//! plugged in without touching `ServerCore`.

pub trait Verifier: Send + Sync {
    fn verify_token(&self, token: &str) -> Option<String>;
    fn verify_username_and_password(&self, username: &str, password: &str) -> bool;
}

/// Default verifier used when no `--auth-plugin` is configured: any credential
/// succeeds, using whatever name the client supplied.
pub struct AllowAllVerifier;

impl Verifier for AllowAllVerifier {
    fn verify_token(&self, token: &str) -> Option<String> {
        Some(token.to_string())
    }

    fn verify_username_and_password(&self, _username: &str, _password: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_accepts_anything() {
        let v = AllowAllVerifier;
        assert_eq!(v.verify_token("anything").as_deref(), Some("anything"));
        assert!(v.verify_username_and_password("a", "b"));
    }
}
