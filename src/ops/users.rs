//! Accounts and their access.
//! Account lifecycle (create, remove, password) is applied on every registered
//! controller as the administrator. Grants and revokes target one controller. In both
//! cases the remote change happens first; the permission store is written only after
//! the controller accepted it.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{authorize, check_bulk};
use crate::cluster::user_tag;
use crate::error::{AppError, AppResult};
use crate::ident::check_name;
use crate::identity::{ControllerAccess, IdentityToken, ModelAccess, RequestContext};
use crate::invoker::{ProcessCall, SessionCall};
use crate::permissions::PermissionRecord;
use crate::remote::RpcRequest;
use crate::session::{ControllerSession, Session};

#[derive(Debug, Clone, Deserialize)]
pub struct ModelGrant {
    pub name: String,
    pub access: String,
}

#[derive(Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser").field("username", &self.username).field("password", &"<redacted>").finish()
    }
}

/// One account with every controller record it holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserView {
    pub name: String,
    pub controllers: Vec<PermissionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelAccessView {
    pub user: String,
    pub controller: String,
    pub model: String,
    pub access: ModelAccess,
}

fn not_administrator(ctx: &RequestContext, user: &str) -> AppResult<()> {
    if user == ctx.config().admin_user {
        return Err(AppError::forbidden("the administrator account cannot be modified"));
    }
    Ok(())
}

fn is_controller_superuser(token: &IdentityToken, session: &ControllerSession) -> bool {
    token.is_admin() || session.access() == ControllerAccess::Superuser
}

async fn modify_model_access(
    ctx: &RequestContext,
    csession: &ControllerSession,
    user: &str,
    model: &str,
    uuid: &str,
    action: &'static str,
    access: ModelAccess,
) -> AppResult<()> {
    let primary = SessionCall::new(
        "modify model access",
        RpcRequest::new(
            "ModelManager",
            5,
            "ModifyModelAccess",
            json!({"changes": [{"user-tag": user_tag(user), "action": action, "access": access.as_str(), "model-tag": format!("model-{}", uuid)}]}),
        ),
        |v| check_bulk(&v),
    );
    let fallback = ProcessCall::text(&[action, user, access.as_str(), model], |_| Ok(())).controller_scoped();
    ctx.invoker().invoke(csession, primary, fallback).await
}

/// Grant `user` a controller level. Only the administrator or a controller superuser may.
pub async fn grant_controller(ctx: &RequestContext, token: &IdentityToken, user: &str, controller: &str, access: &str) -> AppResult<PermissionRecord> {
    let user = check_name("user", user)?;
    let access = ControllerAccess::parse_grant(access)?;
    not_administrator(ctx, user)?;
    let auth = authorize(ctx, token, controller, None).await?;
    let csession = &auth.controller;
    if !is_controller_superuser(token, csession) {
        return Err(AppError::forbidden(format!("granting controller access requires superuser on {}", csession.name())));
    }
    let primary = SessionCall::new(
        "grant controller access",
        RpcRequest::new(
            "Controller",
            3,
            "ModifyControllerAccess",
            json!({"changes": [{"user-tag": user_tag(user), "action": "grant", "access": access.as_str()}]}),
        ),
        |v| check_bulk(&v),
    );
    let fallback = ProcessCall::text(&["grant", user, access.as_str()], |_| Ok(())).controller_scoped();
    ctx.invoker().invoke(csession, primary, fallback).await?;
    ctx.store().set_controller_access(csession.name(), user, access).await?;
    info!(target: "sojobo::ops", "{} granted {} on {} to {}", token.account(), access, csession.name(), user);
    Ok(ctx.store().record(csession.name(), user).await?.unwrap_or_default())
}

/// Grant `user` levels on several models of one controller. The caller must be a
/// controller superuser or hold `admin` on every model named.
pub async fn grant_models(ctx: &RequestContext, token: &IdentityToken, user: &str, controller: &str, grants: &[ModelGrant]) -> AppResult<PermissionRecord> {
    let user = check_name("user", user)?;
    not_administrator(ctx, user)?;
    if grants.is_empty() {
        return Err(AppError::invalid("no model grants given"));
    }
    let mut parsed = Vec::with_capacity(grants.len());
    for g in grants {
        parsed.push((check_name("model", &g.name)?.to_string(), ModelAccess::parse_grant(&g.access)?));
    }
    let auth = authorize(ctx, token, controller, None).await?;
    let csession = &auth.controller;
    let resolver = ctx.resolver();
    let superuser = is_controller_superuser(token, csession);
    let mut targets = Vec::with_capacity(parsed.len());
    for (model, access) in parsed {
        let summary = ctx.connections().find_model(csession, &model).await?;
        if !superuser {
            match resolver.cached_model_access(token, csession.name(), &model).await? {
                ModelAccess::Admin => {}
                ModelAccess::None => return Err(AppError::not_found("model")),
                _ => return Err(AppError::forbidden(format!("granting access requires admin on model {}", model))),
            }
        }
        targets.push((summary, access));
    }
    for (summary, access) in targets {
        modify_model_access(ctx, csession, user, &summary.name, &summary.uuid, "grant", access).await?;
        ctx.store().set_model_access(csession.name(), &summary.name, user, access).await?;
        info!(target: "sojobo::ops", "{} granted {} on {}:{} to {}", token.account(), access, csession.name(), summary.name, user);
    }
    Ok(ctx.store().record(csession.name(), user).await?.unwrap_or_default())
}

/// The level `user` holds on `controller:model`. Readable by the user, the
/// administrator and controller superusers.
pub async fn model_access(ctx: &RequestContext, token: &IdentityToken, user: &str, controller: &str, model: &str) -> AppResult<ModelAccessView> {
    let user = check_name("user", user)?;
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    if token.account() != user && !is_controller_superuser(token, &auth.controller) {
        return Err(AppError::forbidden("only the account itself or a controller superuser can read its access"));
    }
    let msession = auth.model()?;
    let access = ctx.store().get_model_access(auth.controller.name(), msession.name(), user).await?;
    Ok(ModelAccessView { user: user.to_string(), controller: auth.controller.name().to_string(), model: msession.name().to_string(), access })
}

/// Remove every level `user` holds on the model. Requires model admin or controller superuser.
pub async fn revoke_model(ctx: &RequestContext, token: &IdentityToken, user: &str, controller: &str, model: &str) -> AppResult<()> {
    let user = check_name("user", user)?;
    not_administrator(ctx, user)?;
    let auth = authorize(ctx, token, controller, Some(model)).await?;
    let msession = auth.model()?;
    if !is_controller_superuser(token, &auth.controller) && msession.access() != ModelAccess::Admin {
        return Err(AppError::forbidden(format!("revoking access requires admin on model {}", msession.name())));
    }
    // revoking read removes every model level
    modify_model_access(ctx, &auth.controller, user, msession.name(), msession.uuid(), "revoke", ModelAccess::Read).await?;
    ctx.store().set_model_access(auth.controller.name(), msession.name(), user, ModelAccess::None).await?;
    info!(target: "sojobo::ops", "{} revoked {} on {}", token.account(), user, msession.target().label());
    Ok(())
}

/// Every controller record of `user`. Readable by the user and the administrator.
pub async fn user_records(ctx: &RequestContext, token: &IdentityToken, user: &str) -> AppResult<Vec<PermissionRecord>> {
    let user = check_name("user", user)?;
    if !token.is_admin() && token.account() != user {
        return Err(AppError::forbidden("only the account itself or the administrator can read its grants"));
    }
    records_of(ctx, user).await
}

fn require_administrator(token: &IdentityToken, action: &str) -> AppResult<()> {
    if token.is_admin() { Ok(()) } else { Err(AppError::forbidden(format!("only the administrator can {}", action))) }
}

/// Remote duplicate-name failures read as `Conflict`.
fn exists_as_conflict(kind: &'static str) -> impl Fn(AppError) -> AppError {
    move |e| match e {
        AppError::RemoteCallFailed { message } if message.contains("already exists") => AppError::conflict(kind),
        other => other,
    }
}

async fn records_of(ctx: &RequestContext, user: &str) -> AppResult<Vec<PermissionRecord>> {
    let mut out = Vec::new();
    for name in ctx.registry().names() {
        if let Some(rec) = ctx.store().record(&name, user).await? {
            out.push(rec);
        }
    }
    Ok(out)
}

/// Administrator sessions on every registered controller, opened one at a time. Each
/// is closed after `apply` ran on it.
async fn on_every_controller<F, Fut>(ctx: &RequestContext, mut apply: F) -> AppResult<()>
where
    F: FnMut(ControllerSession) -> Fut,
    Fut: std::future::Future<Output = AppResult<()>>,
{
    let admin = ctx.connections().administrator().clone();
    for name in ctx.registry().names() {
        let auth = authorize(ctx, &admin, &name, None).await?;
        let session = auth.controller.clone();
        let out = apply(auth.controller).await;
        ctx.connections().close(&session).await;
        out?;
    }
    Ok(())
}

async fn set_password(ctx: &RequestContext, csession: &ControllerSession, user: &str, password: &str) -> AppResult<()> {
    let primary = SessionCall::new(
        "set password",
        RpcRequest::new("UserManager", 2, "SetPassword", json!({"changes": [{"tag": user_tag(user), "password": password}]})),
        |v| check_bulk(&v),
    );
    // the client prompts twice
    let fallback = ProcessCall::text(&["change-user-password", user], |_| Ok(()))
        .controller_scoped()
        .with_input(format!("{}\n{}\n", password, password));
    ctx.invoker().invoke(csession, primary, fallback).await
}

/// Every account the caller may see: all of them for the administrator, otherwise
/// only the caller.
pub async fn list_users(ctx: &RequestContext, token: &IdentityToken) -> AppResult<Vec<UserView>> {
    let names = if token.is_admin() { ctx.store().accounts().await? } else { vec![token.account().to_string()] };
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let controllers = records_of(ctx, &name).await?;
        out.push(UserView { name, controllers });
    }
    Ok(out)
}

/// One account with its records. Readable by the account and the administrator.
pub async fn get_user(ctx: &RequestContext, token: &IdentityToken, user: &str) -> AppResult<UserView> {
    let controllers = user_records(ctx, token, user).await?;
    Ok(UserView { name: check_name("user", user)?.to_string(), controllers })
}

/// Create `username` on every registered controller with `password`. The new account
/// holds no grants, so no controller is visible to it yet.
pub async fn create_user(ctx: &RequestContext, token: &IdentityToken, req: &NewUser) -> AppResult<UserView> {
    let user = check_name("user", &req.username)?;
    if req.password.is_empty() {
        return Err(AppError::invalid("password must not be empty"));
    }
    require_administrator(token, "create accounts")?;
    if user == ctx.config().admin_user {
        return Err(AppError::conflict("user"));
    }
    on_every_controller(ctx, |csession| async move {
        let primary = SessionCall::new(
            "add user",
            RpcRequest::new("UserManager", 2, "AddUser", json!({"users": [{"username": user, "display-name": user}]})),
            |v| check_bulk(&v),
        );
        let fallback = ProcessCall::text(&["add-user", user], |_| Ok(())).controller_scoped();
        ctx.invoker().invoke(&csession, primary, fallback).await.map_err(exists_as_conflict("user"))?;
        set_password(ctx, &csession, user, &req.password).await
    })
    .await?;
    info!(target: "sojobo::ops", "account {} created by {}", user, token.account());
    Ok(UserView { name: user.to_string(), controllers: Vec::new() })
}

/// Remove `user` from every registered controller and forget its grants and keys.
pub async fn delete_user(ctx: &RequestContext, token: &IdentityToken, user: &str) -> AppResult<()> {
    let user = check_name("user", user)?;
    require_administrator(token, "remove accounts")?;
    not_administrator(ctx, user)?;
    on_every_controller(ctx, |csession| async move {
        let primary = SessionCall::new(
            "remove user",
            RpcRequest::new("UserManager", 2, "RemoveUser", json!({"entities": [{"tag": user_tag(user)}]})),
            |v| check_bulk(&v),
        );
        let fallback = ProcessCall::text(&["remove-user", user, "-y"], |_| Ok(())).controller_scoped();
        ctx.invoker().invoke(&csession, primary, fallback).await
    })
    .await?;
    ctx.store().forget_account(user).await?;
    info!(target: "sojobo::ops", "account {} removed by {}", user, token.account());
    Ok(())
}

/// Change `user`'s password on every registered controller. Allowed for the account
/// itself and the administrator; the administrator's own password is configuration.
pub async fn change_password(ctx: &RequestContext, token: &IdentityToken, user: &str, password: &str) -> AppResult<()> {
    let user = check_name("user", user)?;
    if password.is_empty() {
        return Err(AppError::invalid("password must not be empty"));
    }
    if !token.is_admin() && token.account() != user {
        return Err(AppError::forbidden("only the account itself or the administrator can change its password"));
    }
    not_administrator(ctx, user)?;
    on_every_controller(ctx, |csession| async move { set_password(ctx, &csession, user, password).await }).await?;
    info!(target: "sojobo::ops", "password of {} changed by {}", user, token.account());
    Ok(())
}
