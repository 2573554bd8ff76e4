//! Kind-agnostic views over Gateway API specs.
//!
//! HTTPRoute and TLSRoute (and Gateway listeners) share their reference shapes, so the
//! reconcilers read them through these projections instead of per-kind generated types.
//! TLSRoute is only watched as a dynamic object, which makes a serde view the natural common
//! ground.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteSpecView {
    pub parent_refs: Vec<ParentRefView>,
    pub hostnames: Vec<String>,
    pub rules: Vec<RouteRuleView>,
}

/// Serializes back to the `parentRef` echoed in Route status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParentRefView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteRuleView {
    pub matches: Vec<Value>,
    pub filters: Vec<Value>,
    pub backend_refs: Vec<BackendRefView>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendRefView {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub port: Option<i32>,
    pub weight: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySpecView {
    pub gateway_class_name: String,
    pub listeners: Vec<ListenerView>,
    pub addresses: Vec<AddressView>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenerView {
    pub name: String,
    pub hostname: Option<String>,
    pub port: i32,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddressView {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub value: String,
}

/// Projects any serializable spec into a view.
pub fn project<S: Serialize, V: for<'de> Deserialize<'de> + Default>(
    spec: &S,
) -> Result<V, serde_json::Error> {
    project_value(serde_json::to_value(spec)?)
}

pub fn project_value<V: for<'de> Deserialize<'de> + Default>(
    value: Value,
) -> Result<V, serde_json::Error> {
    if value.is_null() {
        return Ok(V::default());
    }
    serde_json::from_value(value)
}
