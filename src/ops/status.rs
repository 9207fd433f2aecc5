//! Model status snapshot.
//! The API's `Client.FullStatus` reply and `juju status --format json` describe the
//! same things with slightly different keys; both normalize into `ModelStatus`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::ModelSession;
use crate::error::AppResult;
use crate::identity::RequestContext;
use crate::invoker::{ProcessCall, SessionCall};
use crate::remote::RpcRequest;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnitStatus {
    pub name: String,
    pub machine: Option<String>,
    pub status: String,
    pub public_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationStatus {
    pub application: String,
    pub endpoint: String,
    pub with: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationStatus {
    pub name: String,
    pub charm: String,
    pub series: Option<String>,
    pub status: String,
    pub units: Vec<UnitStatus>,
    pub relations: Vec<RelationStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MachineStatus {
    pub id: String,
    pub series: Option<String>,
    pub status: String,
    pub dns_name: Option<String>,
    pub instance_id: Option<String>,
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelStatus {
    pub applications: BTreeMap<String, ApplicationStatus>,
    pub machines: BTreeMap<String, MachineStatus>,
}

impl ModelStatus {
    pub fn application(&self, name: &str) -> Option<&ApplicationStatus> { self.applications.get(name) }

    /// Machine by id, containers included (`0/lxd/1`).
    pub fn machine(&self, id: &str) -> Option<&MachineStatus> { self.machines.get(id) }

    pub fn unit(&self, name: &str) -> Option<&UnitStatus> {
        let app = name.split('/').next().unwrap_or_default();
        self.applications.get(app)?.units.iter().find(|u| u.name == name)
    }

    pub fn relations(&self) -> Vec<RelationStatus> {
        self.applications.values().flat_map(|a| a.relations.iter().cloned()).collect()
    }

    /// Accepts both the API and the CLI shape.
    pub fn from_value(v: &Value) -> Self {
        let mut out = ModelStatus::default();
        for (name, a) in v.get("applications").and_then(Value::as_object).into_iter().flatten() {
            out.applications.insert(name.clone(), parse_application(name, a));
        }
        let mut machines = BTreeMap::new();
        for (id, m) in v.get("machines").and_then(Value::as_object).into_iter().flatten() {
            collect_machine(id, m, &mut machines);
        }
        out.machines = machines;
        out
    }
}

fn status_of(v: &Value, keys: &[&str]) -> String {
    for k in keys {
        if let Some(s) = v.get(*k) {
            if let Some(t) = s.get("status").or_else(|| s.get("current")).and_then(Value::as_str) {
                return t.to_string();
            }
        }
    }
    "unknown".to_string()
}

fn opt_str(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()).map(String::from)
}

fn parse_application(name: &str, a: &Value) -> ApplicationStatus {
    let units = a
        .get("units")
        .and_then(Value::as_object)
        .map(|units| {
            units
                .iter()
                .map(|(uname, u)| UnitStatus {
                    name: uname.clone(),
                    machine: opt_str(u, "machine"),
                    status: status_of(u, &["workload-status", "agent-status", "juju-status"]),
                    public_address: opt_str(u, "public-address"),
                })
                .collect()
        })
        .unwrap_or_default();
    let relations = a
        .get("relations")
        .and_then(Value::as_object)
        .map(|rels| {
            rels.iter()
                .map(|(endpoint, with)| RelationStatus {
                    application: name.to_string(),
                    endpoint: endpoint.clone(),
                    with: with.as_array().into_iter().flatten().filter_map(Value::as_str).map(String::from).collect(),
                })
                .collect()
        })
        .unwrap_or_default();
    ApplicationStatus {
        name: name.to_string(),
        charm: opt_str(a, "charm").unwrap_or_default(),
        series: opt_str(a, "series"),
        status: status_of(a, &["status", "application-status"]),
        units,
        relations,
    }
}

fn collect_machine(id: &str, m: &Value, out: &mut BTreeMap<String, MachineStatus>) {
    let containers: Vec<String> = m.get("containers").and_then(Value::as_object).map(|c| c.keys().cloned().collect()).unwrap_or_default();
    out.insert(
        id.to_string(),
        MachineStatus {
            id: id.to_string(),
            series: opt_str(m, "series"),
            status: status_of(m, &["agent-status", "juju-status", "machine-status"]),
            dns_name: opt_str(m, "dns-name"),
            instance_id: opt_str(m, "instance-id"),
            containers: containers.clone(),
        },
    );
    for cid in containers {
        if let Some(c) = m.get("containers").and_then(|c| c.get(&cid)) {
            collect_machine(&cid, c, out);
        }
    }
}

/// Fetch the model's status over the session, falling back to `juju status`.
pub async fn fetch(ctx: &RequestContext, model: &ModelSession) -> AppResult<ModelStatus> {
    let primary = SessionCall::new(
        "model status",
        RpcRequest::new("Client", 1, "FullStatus", serde_json::json!({"patterns": []})),
        |v| Ok(ModelStatus::from_value(&v)),
    );
    let fallback = ProcessCall::json(&["status"], |v| Ok(ModelStatus::from_value(&v)));
    ctx.invoker().invoke(model, primary, fallback).await
}
