//! Cluster types backing a controller.
//! Each controller record names one `ClusterKind`; the kind selects the `ClusterType`
//! implementation that builds its login credential and answers capability questions
//! (supported OS series, LXD placement). Selection is an explicit match, never a
//! string lookup at call time.

use std::fmt;

use serde::{Deserialize, Serialize};

mod kinds;

pub use kinds::{AwsCluster, GoogleCluster, LxdCluster, MaasCluster, ManualCluster};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    Aws,
    Google,
    Maas,
    Lxd,
    Manual,
}

impl ClusterKind {
    pub const ALL: [ClusterKind; 5] = [ClusterKind::Aws, ClusterKind::Google, ClusterKind::Maas, ClusterKind::Lxd, ClusterKind::Manual];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterKind::Aws => "aws",
            ClusterKind::Google => "google",
            ClusterKind::Maas => "maas",
            ClusterKind::Lxd => "lxd",
            ClusterKind::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// The handler for this kind.
    pub fn handler(&self) -> &'static dyn ClusterType {
        match self {
            ClusterKind::Aws => &AwsCluster,
            ClusterKind::Google => &GoogleCluster,
            ClusterKind::Maas => &MaasCluster,
            ClusterKind::Lxd => &LxdCluster,
            ClusterKind::Manual => &ManualCluster,
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Login material for one remote endpoint. The secret never appears in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialToken {
    pub kind: ClusterKind,
    pub endpoint: String,
    pub account: String,
    /// Entity tag presented to the controller, e.g. `user-alice`.
    pub auth_tag: String,
    pub secret: String,
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialToken")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("auth_tag", &self.auth_tag)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Per-cloud behaviour. One implementation per `ClusterKind`.
pub trait ClusterType: Send + Sync {
    fn kind(&self) -> ClusterKind;

    /// OS series machines and applications may use on this cloud.
    fn supported_series(&self) -> &'static [&'static str];

    /// Whether `lxd:` placements are allowed.
    fn supports_lxd(&self) -> bool { true }

    /// Build the login credential for `account` against `endpoint`.
    fn credential(&self, endpoint: &str, account: &str, secret: &str) -> CredentialToken {
        CredentialToken {
            kind: self.kind(),
            endpoint: endpoint.to_string(),
            account: account.to_string(),
            auth_tag: user_tag(account),
            secret: secret.to_string(),
        }
    }

    fn supports_series(&self, series: &str) -> bool {
        self.supported_series().iter().any(|s| s.eq_ignore_ascii_case(series))
    }

    /// Cloud name the client bootstraps onto.
    fn cloud(&self) -> &'static str { self.kind().as_str() }

    /// `bootstrap` arguments for a new controller named `name`.
    fn bootstrap_args(&self, name: &str, region: Option<&str>, credential: Option<&str>) -> Vec<String> {
        let cloud = match region {
            Some(r) => format!("{}/{}", self.cloud(), r),
            None => self.cloud().to_string(),
        };
        let mut argv = vec!["bootstrap".to_string(), cloud, name.to_string()];
        if let Some(c) = credential {
            argv.push("--credential".into());
            argv.push(c.to_string());
        }
        argv
    }
}

/// Local accounts are tagged `user-<name>`; external ones (`bob@external`) keep the domain.
pub fn user_tag(account: &str) -> String {
    format!("user-{}", account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_and_handler_agree() {
        for k in ClusterKind::ALL {
            assert_eq!(ClusterKind::parse(k.as_str()), Some(k));
            assert_eq!(k.handler().kind(), k);
        }
        assert_eq!(ClusterKind::parse(" AWS "), Some(ClusterKind::Aws));
        assert_eq!(ClusterKind::parse("openstack"), None);
    }

    #[test]
    fn credential_tags_account_and_hides_secret() {
        let tok = ClusterKind::Maas.handler().credential("10.0.0.2:17070", "alice", "s3cret");
        assert_eq!(tok.auth_tag, "user-alice");
        assert_eq!(tok.kind, ClusterKind::Maas);
        assert!(!format!("{:?}", tok).contains("s3cret"));
    }

    #[test]
    fn bootstrap_targets_the_cloud_and_region() {
        assert_eq!(
            ClusterKind::Aws.handler().bootstrap_args("prod", Some("eu-west-1"), Some("ops")),
            vec!["bootstrap", "aws/eu-west-1", "prod", "--credential", "ops"]
        );
        assert_eq!(ClusterKind::Lxd.handler().bootstrap_args("edge", None, None), vec!["bootstrap", "localhost", "edge"]);
    }

    #[test]
    fn manual_clouds_refuse_lxd() {
        assert!(!ClusterKind::Manual.handler().supports_lxd());
        assert!(ClusterKind::Lxd.handler().supports_lxd());
        assert!(ClusterKind::Aws.handler().supports_series("xenial"));
        assert!(!ClusterKind::Google.handler().supports_series("precise"));
    }
}
