//! JSON codec used in place of a real ABI encoder.
//!
//! Call data is the JSON object `{"args": [...], "call": <fn>, "contract": <name>}`
//! (deployments use `"deploy"` instead of `"call"`), so tests can target a
//! function with [`call_needle`]. Return data and event data are plain JSON.

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use ledgerplan::ArtifactCodec;
use ledgerplan::types::{Address, Artifact, Bytes, Log, NameOrIndex};

pub struct JsonCodec;

fn pick(value: Value, name_or_index: &NameOrIndex) -> Result<Value> {
    match (value, name_or_index) {
        (Value::Array(items), NameOrIndex::Index(i)) => items
            .get(*i)
            .cloned()
            .ok_or_else(|| anyhow!("no value at index {}", i)),
        (Value::Object(map), NameOrIndex::Name(name)) => map
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no value named {}", name)),
        (value, NameOrIndex::Index(0)) => Ok(value),
        (value, selector) => Err(anyhow!("cannot select {} from {}", selector, value)),
    }
}

fn encode(value: Value) -> Result<Bytes> {
    Ok(Bytes(serde_json::to_vec(&value)?))
}

impl ArtifactCodec for JsonCodec {
    fn encode_deployment(
        &self,
        artifact: &Artifact,
        args: &[Value],
        libraries: &BTreeMap<String, Address>,
    ) -> Result<Bytes> {
        encode(json!({
            "deploy": artifact.contract_name,
            "args": args,
            "libraries": libraries,
        }))
    }

    fn encode_function_call(
        &self,
        artifact: &Artifact,
        function_name: &str,
        args: &[Value],
    ) -> Result<Bytes> {
        encode(json!({
            "call": function_name,
            "contract": artifact.contract_name,
            "args": args,
        }))
    }

    fn decode_function_result(
        &self,
        _artifact: &Artifact,
        _function_name: &str,
        data: &Bytes,
        name_or_index: &NameOrIndex,
    ) -> Result<Value> {
        pick(serde_json::from_slice(data.as_slice())?, name_or_index)
    }

    fn is_event(&self, _artifact: &Artifact, event_name: &str, log: &Log) -> bool {
        log.topics.first().map(Bytes::as_slice) == Some(event_name.as_bytes())
    }

    fn decode_event_argument(
        &self,
        _artifact: &Artifact,
        _event_name: &str,
        log: &Log,
        name_or_index: &NameOrIndex,
    ) -> Result<Value> {
        pick(serde_json::from_slice(log.data.as_slice())?, name_or_index)
    }

    fn decode_revert(&self, data: &Bytes) -> String {
        String::from_utf8_lossy(data.as_slice()).into_owned()
    }
}

/// Needle matching the call data of `function_name` in any contract.
pub fn call_needle(function_name: &str) -> Vec<u8> {
    format!("\"call\":\"{}\"", function_name).into_bytes()
}

/// Topics and data of an event as [`JsonCodec`] reads them.
pub fn event_log(event_name: &str, data: Value) -> (Vec<Bytes>, Bytes) {
    (
        vec![Bytes(event_name.as_bytes().to_vec())],
        Bytes(data.to_string().into_bytes()),
    )
}
