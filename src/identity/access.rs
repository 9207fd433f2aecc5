//! Access levels at controller and model granularity.
//! Both enumerations are totally ordered by declaration order; `None` is the bottom
//! element and never authorizes anything.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerAccess {
    #[default]
    None,
    Login,
    AddModel,
    Superuser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelAccess {
    #[default]
    None,
    Read,
    Write,
    Admin,
}

impl ControllerAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerAccess::None => "none",
            ControllerAccess::Login => "login",
            ControllerAccess::AddModel => "add-model",
            ControllerAccess::Superuser => "superuser",
        }
    }

    /// Lenient parse used for remote and stored values; anything unknown is `None`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "login" => ControllerAccess::Login,
            "add-model" | "addmodel" => ControllerAccess::AddModel,
            "superuser" => ControllerAccess::Superuser,
            _ => ControllerAccess::None,
        }
    }

    /// Strict parse for grant requests; `none` and unknown strings are rejected.
    pub fn parse_grant(s: &str) -> AppResult<Self> {
        match Self::parse(s) {
            ControllerAccess::None => Err(AppError::invalid(format!(
                "'{}' is not a controller access level (login, add-model, superuser)", s.trim()))),
            lvl => Ok(lvl),
        }
    }

    pub fn is_valid(&self) -> bool { *self != ControllerAccess::None }
}

impl ModelAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelAccess::None => "none",
            ModelAccess::Read => "read",
            ModelAccess::Write => "write",
            ModelAccess::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => ModelAccess::Read,
            "write" => ModelAccess::Write,
            "admin" => ModelAccess::Admin,
            _ => ModelAccess::None,
        }
    }

    pub fn parse_grant(s: &str) -> AppResult<Self> {
        match Self::parse(s) {
            ModelAccess::None => Err(AppError::invalid(format!(
                "'{}' is not a model access level (read, write, admin)", s.trim()))),
            lvl => Ok(lvl),
        }
    }

    pub fn is_valid(&self) -> bool { *self != ModelAccess::None }
}

impl fmt::Display for ControllerAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl fmt::Display for ModelAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_total() {
        assert!(ControllerAccess::None < ControllerAccess::Login);
        assert!(ControllerAccess::Login < ControllerAccess::AddModel);
        assert!(ControllerAccess::AddModel < ControllerAccess::Superuser);
        assert!(ModelAccess::None < ModelAccess::Read);
        assert!(ModelAccess::Read < ModelAccess::Write);
        assert!(ModelAccess::Write < ModelAccess::Admin);
    }

    #[test]
    fn parse_is_lenient_and_grant_is_strict() {
        assert_eq!(ControllerAccess::parse("ADD-MODEL"), ControllerAccess::AddModel);
        assert_eq!(ControllerAccess::parse("owner"), ControllerAccess::None);
        assert!(ControllerAccess::parse_grant("none").is_err());
        assert_eq!(ModelAccess::parse_grant(" write ").unwrap(), ModelAccess::Write);
        assert!(ModelAccess::parse_grant("root").is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        assert_eq!(serde_json::to_value(ControllerAccess::AddModel).unwrap(), "add-model");
        let m: ModelAccess = serde_json::from_value(serde_json::json!("admin")).unwrap();
        assert_eq!(m, ModelAccess::Admin);
    }
}
