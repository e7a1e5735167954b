//! Volume Plugin Wire Protocol
//!
//! Request and response envelopes of the Docker volume plugin protocol. Every
//! call is a JSON `POST` to a fixed path; every response carries an `Err`
//! field that, when populated, overrides the rest of the payload.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Fixed Paths
// =============================================================================

pub const ACTIVATE_URI: &str = "/Plugin.Activate";
pub const CREATE_URI: &str = "/VolumeDriver.Create";
pub const LIST_URI: &str = "/VolumeDriver.List";
pub const CAPABILITIES_URI: &str = "/VolumeDriver.Capabilities";
pub const REMOVE_URI: &str = "/VolumeDriver.Remove";
pub const MOUNT_URI: &str = "/VolumeDriver.Mount";
pub const UNMOUNT_URI: &str = "/VolumeDriver.Unmount";
pub const GET_URI: &str = "/VolumeDriver.Get";

/// Leading text of every "volume absent" error returned by the plugin
pub const NOT_FOUND: &str = "Unable to find";

/// Options handed to the plugin on create
pub type VolumeOptions = BTreeMap<String, serde_json::Value>;

/// Read an explicit `null` as the empty value, like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Requests
// =============================================================================

/// Basic request naming a volume and, for create, its options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(
        rename = "Name",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub name: String,
    #[serde(
        rename = "Opts",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub opts: VolumeOptions,
}

/// Mount and unmount request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountRequest {
    #[serde(
        rename = "Name",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub name: String,
    #[serde(
        rename = "ID",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub id: String,
}

// =============================================================================
// Responses
// =============================================================================

/// Ability to expose the error field embedded in every response
pub trait PluginResponse {
    fn err(&self) -> &str;
}

/// The plugin's view of a volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(rename = "Name", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(
        rename = "Mountpoint",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub mountpoint: String,
    #[serde(
        rename = "Status",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub status: BTreeMap<String, serde_json::Value>,
}

/// Response to create, get and remove
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    #[serde(rename = "Volume", default, deserialize_with = "null_as_default")]
    pub volume: Volume,
    #[serde(rename = "Err", default, deserialize_with = "null_as_default")]
    pub err: String,
}

/// Response to list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(rename = "Volumes", default, deserialize_with = "null_as_default")]
    pub volumes: Vec<Volume>,
    #[serde(rename = "Err", default, deserialize_with = "null_as_default")]
    pub err: String,
}

/// Response to mount and unmount
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountResponse {
    #[serde(rename = "Mountpoint", default, deserialize_with = "null_as_default")]
    pub mountpoint: String,
    #[serde(rename = "Err", default, deserialize_with = "null_as_default")]
    pub err: String,
}

/// Scope of the plugin, `global` or `local`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "Scope", default, deserialize_with = "null_as_default")]
    pub scope: String,
}

/// Response to capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapResponse {
    #[serde(rename = "Capabilities", default, deserialize_with = "null_as_default")]
    pub capabilities: Capabilities,
    #[serde(rename = "Err", default, deserialize_with = "null_as_default")]
    pub err: String,
}

/// Response to the activation handshake
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivateResponse {
    #[serde(rename = "Implements", default, deserialize_with = "null_as_default")]
    pub implements: Vec<String>,
    #[serde(rename = "Err", default, deserialize_with = "null_as_default")]
    pub err: String,
}

macro_rules! impl_plugin_response {
    ($($ty:ty),+) => {
        $(impl PluginResponse for $ty {
            fn err(&self) -> &str {
                &self.err
            }
        })+
    };
}

impl_plugin_response!(GetResponse, ListResponse, MountResponse, CapResponse, ActivateResponse);

/// Turn a populated error field into a failure carrying its exact text
pub fn check_response<R: PluginResponse>(response: R) -> Result<R> {
    if response.err().is_empty() {
        Ok(response)
    } else {
        Err(Error::Plugin(response.err().to_string()))
    }
}
