use std::fmt;

/// Account name and secret as presented by the caller (HTTP basic auth).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("username", &self.username).field("password", &"<redacted>").finish()
    }
}

/// Caller identity for one request. Immutable once built; never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityToken {
    account: String,
    secret: String,
    is_admin: bool,
}

impl IdentityToken {
    /// `is_admin` is an exact match of both account and secret against the configured pair.
    pub fn new(creds: &Credentials, admin_user: &str, admin_password: &str) -> Self {
        let is_admin = creds.username == admin_user && creds.password == admin_password;
        Self { account: creds.username.clone(), secret: creds.password.clone(), is_admin }
    }

    /// The configured administrator identity, used for credential refresh.
    pub fn administrator(admin_user: &str, admin_password: &str) -> Self {
        Self { account: admin_user.to_string(), secret: admin_password.to_string(), is_admin: true }
    }

    pub fn account(&self) -> &str { &self.account }
    pub fn secret(&self) -> &str { &self.secret }
    pub fn is_admin(&self) -> bool { self.is_admin }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_requires_both_name_and_secret() {
        assert!(IdentityToken::new(&Credentials::new("admin", "pw"), "admin", "pw").is_admin());
        assert!(!IdentityToken::new(&Credentials::new("admin", "nope"), "admin", "pw").is_admin());
        assert!(!IdentityToken::new(&Credentials::new("bob", "pw"), "admin", "pw").is_admin());
    }

    #[test]
    fn debug_hides_secret() {
        let t = IdentityToken::new(&Credentials::new("bob", "hunter2"), "admin", "pw");
        assert!(!format!("{:?}", t).contains("hunter2"));
        assert!(!format!("{:?}", Credentials::new("bob", "hunter2")).contains("hunter2"));
    }
}
