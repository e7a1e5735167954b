//! In-memory volume plugin speaking the wire protocol, for tests

use crate::error::{Error, Result};
use crate::plugin::protocol::*;
use crate::plugin::transport::Transport;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Plugin double that keeps volumes in memory and records every request
#[derive(Default)]
pub struct FakePlugin {
    volumes: Mutex<BTreeMap<String, Volume>>,
    requests: Mutex<Vec<(String, Value)>>,
    /// When set, every call answers with this error text
    pub fail_with: Mutex<Option<String>>,
}

impl FakePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received so far, as (path, payload)
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().clone()
    }

    /// Payloads sent to one path
    pub fn requests_to(&self, path: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn insert_volume(&self, name: &str) {
        self.volumes.lock().insert(
            name.to_string(),
            Volume {
                name: name.to_string(),
                ..Default::default()
            },
        );
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.volumes.lock().contains_key(name)
    }

    fn missing(name: &str) -> Value {
        json!({ "Err": format!("{} volume {}", NOT_FOUND, name) })
    }
}

#[async_trait]
impl Transport for FakePlugin {
    async fn post(&self, path: &str, payload: Value) -> Result<Value> {
        self.requests
            .lock()
            .push((path.to_string(), payload.clone()));

        if let Some(message) = self.fail_with.lock().clone() {
            return Ok(json!({ "Err": message }));
        }

        let name = payload["Name"].as_str().unwrap_or_default().to_string();
        let mut volumes = self.volumes.lock();
        let reply = match path {
            CAPABILITIES_URI => json!({ "Capabilities": { "Scope": "global" } }),
            ACTIVATE_URI => json!({ "Implements": ["VolumeDriver"] }),
            CREATE_URI => {
                volumes.insert(
                    name.clone(),
                    Volume {
                        name: name.clone(),
                        ..Default::default()
                    },
                );
                json!({ "Volume": { "Name": name }, "Err": "" })
            }
            GET_URI => match volumes.get(&name) {
                Some(volume) => json!({ "Volume": volume, "Err": "" }),
                None => Self::missing(&name),
            },
            LIST_URI => json!({ "Volumes": volumes.values().collect::<Vec<_>>(), "Err": "" }),
            REMOVE_URI => match volumes.remove(&name) {
                Some(_) => json!({ "Err": "" }),
                None => Self::missing(&name),
            },
            MOUNT_URI | UNMOUNT_URI => match volumes.get(&name) {
                Some(_) if path == MOUNT_URI => json!({ "Mountpoint": format!("/mnt/{}", name) }),
                Some(_) => json!({ "Err": "" }),
                None => Self::missing(&name),
            },
            other => return Err(Error::Internal(format!("unexpected path {}", other))),
        };
        Ok(reply)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        Err(Error::Internal(format!("unexpected GET {}", path)))
    }
}
