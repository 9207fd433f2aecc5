//! Name validation for path and body parameters
//! ---------------------------------------------
//! Single source of truth for what a controller, model, application or account
//! name may look like before it is handed to the remote cluster or the CLI.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AppError, AppResult};

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-zA-Z]([0-9a-zA-Z.-]*[0-9a-zA-Z])?$").expect("static name pattern"))
}

fn machine_re() -> &'static Regex {
    // "0", "3/lxd/1"
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+(/(lxd|kvm)/[0-9]+)?$").expect("static machine pattern"))
}

/// Validate a controller/model/application/account name. Returns the trimmed name.
pub fn check_name<'a>(what: &str, raw: &'a str) -> AppResult<&'a str> {
    let s = raw.trim();
    if s.is_empty() { return Err(AppError::invalid(format!("{} name is empty", what))); }
    if !name_re().is_match(s) {
        return Err(AppError::invalid(format!("{} name '{}' does not have the correct format", what, s)));
    }
    Ok(s)
}

/// Optional variant used for body fields such as `series` or `target`.
pub fn check_opt_name<'a>(what: &str, raw: Option<&'a str>) -> AppResult<Option<&'a str>> {
    match raw {
        Some(s) if !s.trim().is_empty() => check_name(what, s).map(Some),
        _ => Ok(None),
    }
}

/// Machine ids are numeric, optionally with a container suffix (`2/lxd/0`).
pub fn check_machine(raw: &str) -> AppResult<&str> {
    let s = raw.trim();
    if !machine_re().is_match(s) {
        return Err(AppError::invalid(format!("machine '{}' is not a valid machine id", s)));
    }
    Ok(s)
}

/// Placement directive for deploy/add-unit: a machine id or `lxd:<machine>`.
pub fn check_placement(raw: &str) -> AppResult<&str> {
    let s = raw.trim();
    let machine = s.strip_prefix("lxd:").unwrap_or(s);
    if s == "lxd" || machine_re().is_match(machine) { Ok(s) } else {
        Err(AppError::invalid(format!("target '{}' is not a valid placement", s)))
    }
}

/// True when a placement or machine id asks for an LXD container.
pub fn wants_lxd(placement: &str) -> bool {
    placement == "lxd" || placement.starts_with("lxd:") || placement.contains("/lxd/")
}

/// Unit names are `<application>/<number>`.
pub fn unit_name(app: &str, number: &str) -> AppResult<String> {
    let n = number.trim();
    if n.is_empty() || !n.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::invalid(format!("unit number '{}' is not numeric", n)));
    }
    Ok(format!("{}/{}", app, n))
}
