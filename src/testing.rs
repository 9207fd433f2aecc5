//! In-process fakes for the remote transport and the command runner.
//! Both count what they are asked to do so tests can assert on connection and call
//! traffic without a controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::bridge::GatewayServices;
use crate::charmstore::CharmStore;
use crate::cluster::CredentialToken;
use crate::config::{DefaultSettings, GatewayConfig, SettingsLayer};
use crate::invoker::{CommandRunner, ProcessInvocation};
use crate::permissions::PermissionStore;
use crate::registry::{ControllerRecord, ControllerRegistry};
use crate::remote::{ClusterTransport, RemoteConnection, RemoteError, RpcRequest};

pub const API_KEY: &str = "test-api-key";
pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-secret";

/// What a scripted call handler sees.
#[derive(Debug, Clone)]
pub struct FakeCall {
    pub account: String,
    pub model_uuid: Option<String>,
    pub request: RpcRequest,
}

type CallHandler = Arc<dyn Fn(&FakeCall) -> Result<Value, RemoteError> + Send + Sync>;
type CommandHandler = Arc<dyn Fn(&ProcessInvocation) -> Result<String, RemoteError> + Send + Sync>;

#[derive(Default)]
struct TransportShared {
    connects: AtomicUsize,
    closes: AtomicUsize,
    handlers: Mutex<HashMap<String, CallHandler>>,
    rejected: Mutex<Vec<String>>,
    connected_as: Mutex<Vec<(String, Option<String>)>>,
    calls: Mutex<Vec<FakeCall>>,
}

/// Transport whose connections answer from per-method handlers keyed by
/// `Facade.Request`. Methods without a handler report `Unsupported`.
#[derive(Clone, Default)]
pub struct FakeTransport {
    shared: Arc<TransportShared>,
}

impl FakeTransport {
    pub fn new() -> Self { Self::default() }

    pub fn on<F>(&self, method: &str, handler: F) -> &Self
    where
        F: Fn(&FakeCall) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        self.shared.handlers.lock().insert(method.to_string(), Arc::new(handler));
        self
    }

    /// Always answer `method` with `reply`.
    pub fn reply(&self, method: &str, reply: Value) -> &Self {
        self.on(method, move |_| Ok(reply.clone()))
    }

    /// Always fail `method` with `err`.
    pub fn fail(&self, method: &str, err: RemoteError) -> &Self {
        self.on(method, move |_| Err(err.clone()))
    }

    /// Refuse logins for `account`.
    pub fn reject_login(&self, account: &str) -> &Self {
        self.shared.rejected.lock().push(account.to_string());
        self
    }

    pub fn connects(&self) -> usize { self.shared.connects.load(Ordering::SeqCst) }
    pub fn closes(&self) -> usize { self.shared.closes.load(Ordering::SeqCst) }
    /// Connections opened and not yet closed.
    pub fn open(&self) -> usize { self.connects().saturating_sub(self.closes()) }
    /// `(account, model uuid)` for every successful connect, in order.
    pub fn connected_as(&self) -> Vec<(String, Option<String>)> { self.shared.connected_as.lock().clone() }
    /// Every call issued, in order.
    pub fn calls(&self) -> Vec<FakeCall> { self.shared.calls.lock().clone() }
    pub fn calls_to(&self, method: &str) -> usize {
        self.shared.calls.lock().iter().filter(|c| c.request.method() == method).count()
    }
}

#[async_trait]
impl ClusterTransport for FakeTransport {
    async fn connect(&self, cred: &CredentialToken, model_uuid: Option<&str>) -> Result<Box<dyn RemoteConnection>, RemoteError> {
        if self.shared.rejected.lock().iter().any(|a| a == &cred.account) {
            return Err(RemoteError::AuthFault("invalid entity name or password".into()));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.connected_as.lock().push((cred.account.clone(), model_uuid.map(String::from)));
        Ok(Box::new(FakeConnection {
            shared: self.shared.clone(),
            account: cred.account.clone(),
            model_uuid: model_uuid.map(String::from),
            closed: false,
        }))
    }
}

struct FakeConnection {
    shared: Arc<TransportShared>,
    account: String,
    model_uuid: Option<String>,
    closed: bool,
}

#[async_trait]
impl RemoteConnection for FakeConnection {
    async fn call(&mut self, req: &RpcRequest) -> Result<Value, RemoteError> {
        let call = FakeCall { account: self.account.clone(), model_uuid: self.model_uuid.clone(), request: req.clone() };
        self.shared.calls.lock().push(call.clone());
        let handler = self.shared.handlers.lock().get(&req.method()).cloned();
        match handler {
            Some(h) => h(&call),
            None => Err(RemoteError::Unsupported(format!("{} is not implemented", req.method()))),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Command runner keyed on the first argument of the command.
#[derive(Clone, Default)]
pub struct FakeRunner {
    handlers: Arc<Mutex<HashMap<String, CommandHandler>>>,
    runs: Arc<Mutex<Vec<ProcessInvocation>>>,
}

impl FakeRunner {
    pub fn new() -> Self { Self::default() }

    pub fn on<F>(&self, command: &str, handler: F) -> &Self
    where
        F: Fn(&ProcessInvocation) -> Result<String, RemoteError> + Send + Sync + 'static,
    {
        self.handlers.lock().insert(command.to_string(), Arc::new(handler));
        self
    }

    pub fn output(&self, command: &str, stdout: &str) -> &Self {
        let out = stdout.to_string();
        self.on(command, move |_| Ok(out.clone()))
    }

    pub fn runs(&self) -> Vec<ProcessInvocation> { self.runs.lock().clone() }
    pub fn runs_of(&self, command: &str) -> usize {
        self.runs.lock().iter().filter(|r| r.args.first().map(String::as_str) == Some(command)).count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, inv: &ProcessInvocation) -> Result<String, RemoteError> {
        self.runs.lock().push(inv.clone());
        let cmd = inv.args.first().cloned().unwrap_or_default();
        let handler = self.handlers.lock().get(&cmd).cloned();
        match handler {
            Some(h) => h(inv),
            None => Err(RemoteError::Failed(format!("ERROR unrecognized command: juju {}", cmd))),
        }
    }
}

/// Config with the test api key and administrator pair and short timeouts.
pub fn test_config() -> GatewayConfig {
    let layer = SettingsLayer {
        api_key: Some(API_KEY.to_string()),
        admin_user: Some(ADMIN_USER.to_string()),
        admin_password: Some(ADMIN_PASSWORD.to_string()),
        connect_timeout_ms: Some(2_000),
        call_timeout_ms: Some(2_000),
        // unroutable; charm lookups are not expected in tests that use this
        charm_store_url: Some("http://127.0.0.1:9".to_string()),
        ..Default::default()
    };
    match GatewayConfig::from_layers(&DefaultSettings::default(), &layer) {
        Ok(cfg) => cfg,
        Err(e) => panic!("test config: {e:#}"),
    }
}

/// Registry with one controller per `(name, type)` pair.
pub fn registry(controllers: &[(&str, &str)]) -> ControllerRegistry {
    let records = controllers.iter().map(|(name, kind)| ControllerRecord {
        name: name.to_string(),
        kind: crate::cluster::ClusterKind::parse(kind).unwrap_or(crate::cluster::ClusterKind::Manual),
        endpoint: format!("{}.test:17070", name),
        region: None,
    });
    match ControllerRegistry::from_records(records) {
        Ok(r) => r,
        Err(e) => panic!("test registry: {e:#}"),
    }
}

pub fn services(
    registry: ControllerRegistry,
    store: Arc<dyn PermissionStore>,
    transport: &FakeTransport,
    runner: &FakeRunner,
) -> Arc<GatewayServices> {
    let charms = match CharmStore::new("http://127.0.0.1:9", Duration::from_millis(200)) {
        Ok(c) => c,
        Err(e) => panic!("charm store client: {e:#}"),
    };
    Arc::new(GatewayServices {
        config: test_config(),
        registry: Arc::new(registry),
        store,
        transport: Arc::new(transport.clone()),
        runner: Arc::new(runner.clone()),
        charms,
    })
}
