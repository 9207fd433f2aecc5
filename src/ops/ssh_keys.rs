//! SSH keys authorized on a model, mirrored into the caller's user record.

use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{authorize, check_bulk, require_model};
use crate::error::{AppError, AppResult};
use crate::identity::{IdentityToken, ModelAccess, RequestContext};
use crate::invoker::{ProcessCall, SessionCall};
use crate::remote::{first_result, Phase, RpcRequest};
use crate::session::ModelSession;

const KEY_TYPES: [&str; 6] = ["ssh-rsa", "ssh-dss", "ssh-ed25519", "ecdsa-sha2-nistp256", "ecdsa-sha2-nistp384", "ecdsa-sha2-nistp521"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshKey {
    pub fingerprint: String,
    pub comment: Option<String>,
    pub key: String,
}

impl SshKey {
    pub fn parse(line: &str) -> AppResult<Self> {
        let line = validate_key(line)?;
        let mut parts = line.split_whitespace();
        let _kind = parts.next();
        let body = parts.next().unwrap_or_default();
        let comment = parts.collect::<Vec<_>>().join(" ");
        Ok(Self {
            fingerprint: fingerprint(body)?,
            comment: if comment.is_empty() { None } else { Some(comment) },
            key: line.to_string(),
        })
    }
}

/// `<type> <base64> [comment]` with a known key type.
pub fn validate_key(raw: &str) -> AppResult<&str> {
    let line = raw.trim();
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(kind), Some(body)) if KEY_TYPES.contains(&kind) && !body.is_empty() => Ok(line),
        _ => Err(AppError::invalid("ssh key must look like '<type> <base64 key> [comment]'")),
    }
}

/// OpenSSH-style `SHA256:<unpadded base64>` fingerprint of the key body.
pub fn fingerprint(body: &str) -> AppResult<String> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|_| AppError::invalid("ssh key body is not valid base64"))?;
    let digest = Sha256::digest(&raw);
    Ok(format!("SHA256:{}", base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest)))
}

/// `juju ssh-keys --full` prints a header line followed by one key per line.
fn keys_from_cli(out: &str) -> Vec<String> {
    out.lines().map(str::trim).filter(|l| validate_key(l).is_ok()).map(String::from).collect()
}

fn keys_from_api(v: &Value) -> AppResult<Vec<String>> {
    let result = first_result(v).map_err(|e| e.classify(Phase::Call))?;
    Ok(result.as_array().into_iter().flatten().filter_map(Value::as_str).map(String::from).collect())
}

async fn fetch(ctx: &RequestContext, msession: &ModelSession) -> AppResult<Vec<SshKey>> {
    let admin = ctx.config().admin_user.clone();
    let primary = SessionCall::new(
        "list ssh keys",
        RpcRequest::new("KeyManager", 1, "ListKeys", json!({"entities": {"entities": [{"tag": crate::cluster::user_tag(&admin)}]}, "mode": true})),
        |v| keys_from_api(&v),
    );
    let fallback = ProcessCall::text(&["ssh-keys", "--full"], |out| Ok(keys_from_cli(out)));
    let keys = ctx.invoker().invoke(msession, primary, fallback).await?;
    Ok(keys.iter().filter_map(|k| SshKey::parse(k).ok()).collect())
}

pub async fn list(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str) -> AppResult<Vec<SshKey>> {
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    require_model(msession, ModelAccess::Admin, "listing ssh keys")?;
    fetch(ctx, msession).await
}

/// Authorize `key` on an already-open model session and record it for the caller.
pub(crate) async fn add_to_session(ctx: &RequestContext, token: &IdentityToken, msession: &ModelSession, key: &str) -> AppResult<()> {
    let key = validate_key(key)?.to_string();
    let admin = ctx.config().admin_user.clone();
    let primary = SessionCall::new(
        "add ssh key",
        RpcRequest::new("KeyManager", 1, "AddKeys", json!({"user": admin, "ssh-keys": [key]})),
        |v| check_bulk(&v),
    );
    let fallback = ProcessCall::text(&["add-ssh-key", key.as_str()], |_| Ok(()));
    ctx.invoker().invoke(msession, primary, fallback).await?;
    ctx.store().add_ssh_key(token.account(), &key).await
}

pub async fn add(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, key: &str) -> AppResult<Vec<SshKey>> {
    validate_key(key)?;
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    require_model(msession, ModelAccess::Admin, "adding an ssh key")?;
    add_to_session(ctx, token, msession, key).await?;
    fetch(ctx, msession).await
}

pub async fn remove(ctx: &RequestContext, token: &IdentityToken, controller: &str, model: &str, key: &str) -> AppResult<Vec<SshKey>> {
    let parsed = SshKey::parse(key)?;
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    require_model(msession, ModelAccess::Admin, "removing an ssh key")?;
    // the controller deletes keys by comment or by its own fingerprint format
    let selector = parsed.comment.clone().unwrap_or_else(|| parsed.key.clone());
    let admin = ctx.config().admin_user.clone();
    let primary = SessionCall::new(
        "remove ssh key",
        RpcRequest::new("KeyManager", 1, "DeleteKeys", json!({"user": admin, "ssh-keys": [selector]})),
        |v| check_bulk(&v),
    );
    let fallback = ProcessCall::text(&["remove-ssh-key", selector.as_str()], |_| Ok(()));
    ctx.invoker().invoke(msession, primary, fallback).await?;
    ctx.store().remove_ssh_key(token.account(), &parsed.key).await?;
    fetch(ctx, msession).await
}

/// Keys recorded for `user`. Only the user or the administrator may read them.
pub async fn user_keys(ctx: &RequestContext, token: &IdentityToken, user: &str) -> AppResult<Vec<SshKey>> {
    let user = crate::ident::check_name("user", user)?;
    if !token.is_admin() && token.account() != user {
        return Err(AppError::forbidden("only the account itself or the administrator can read its keys"));
    }
    let keys = ctx.store().ssh_keys(user).await?;
    Ok(keys.iter().filter_map(|k| SshKey::parse(k).ok()).collect())
}
