//! Typed content records for comm messages.

use serde::{Deserialize, Serialize};

use crate::message::{map_or_null, JsonMap};

/// Content of `comm_open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommOpenContent {
    pub comm_id: String,
    pub target_name: String,
    #[serde(default, deserialize_with = "map_or_null")]
    pub data: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_module: Option<String>,
}

/// Content of `comm_msg`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommMsgContent {
    pub comm_id: String,
    #[serde(default, deserialize_with = "map_or_null")]
    pub data: JsonMap,
}

/// Content of `comm_close`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommCloseContent {
    pub comm_id: String,
    #[serde(default, deserialize_with = "map_or_null")]
    pub data: JsonMap,
}

/// Content of `comm_info_request`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommInfoRequestContent {
    #[serde(default)]
    pub target_name: Option<String>,
}
