//! Version-1 JSON serialization of a filter graph.
//!
//! The document shape is stable: `{version, name, comments, editorData,
//! blocks, connections}`, with each block carrying its type-specific `data`
//! payload and each connection naming its endpoints. Deserialization
//! resolves block types through a [`BlockRegistry`].

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::filter::{Block, BlockId, BlockRole, SmartFilter};
use crate::registry::{BlockRegistry, SerializedInputData, SerializedShaderData};

pub const SERIALIZATION_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedSmartFilter {
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_data: Option<serde_json::Value>,
    pub blocks: Vec<SerializedBlock>,
    pub connections: Vec<SerializedConnection>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedBlock {
    pub name: String,
    pub unique_id: u32,
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedConnection {
    pub output_block: u32,
    pub output_connection_point: String,
    pub input_block: u32,
    pub input_connection_point: String,
}

/// Serialize a live filter graph into the version-1 document.
pub fn serialize_filter(filter: &SmartFilter) -> Result<SerializedSmartFilter> {
    let blocks = filter
        .blocks()
        .iter()
        .map(serialize_block)
        .collect::<Result<Vec<_>>>()?;
    let connections = filter
        .connections()
        .iter()
        .map(|c| SerializedConnection {
            output_block: c.from.block.0,
            output_connection_point: c.from.port.clone(),
            input_block: c.to.block.0,
            input_connection_point: c.to.port.clone(),
        })
        .collect();

    Ok(SerializedSmartFilter {
        version: SERIALIZATION_VERSION,
        name: filter.name.clone(),
        comments: filter.comments.clone(),
        editor_data: filter.editor_data.clone(),
        blocks,
        connections,
    })
}

fn serialize_block(block: &Block) -> Result<SerializedBlock> {
    let data = match &block.role {
        BlockRole::Input(value) => serde_json::to_value(SerializedInputData {
            value: value.clone(),
            disabled: block.disabled,
            disable_strategy: block.disable_strategy,
        })?,
        BlockRole::Output => serde_json::Value::Null,
        BlockRole::Shader(shader) => serde_json::to_value(SerializedShaderData {
            program: shader.program.clone(),
            disable_optimization: shader.disable_optimization,
            inputs: block.inputs.clone(),
            outputs: block.outputs.clone(),
            disabled: block.disabled,
            disable_strategy: block.disable_strategy,
        })?,
    };
    Ok(SerializedBlock {
        name: block.name.clone(),
        unique_id: block.id.0,
        block_type: block.block_type.clone(),
        comments: block.comments.clone(),
        data,
    })
}

/// Rebuild a live filter from a version-1 document, resolving block types
/// through `registry`.
pub fn deserialize_filter(
    doc: &SerializedSmartFilter,
    registry: &BlockRegistry,
) -> Result<SmartFilter> {
    if doc.version != SERIALIZATION_VERSION {
        bail!("unsupported serialization version: {}", doc.version);
    }

    let mut filter = SmartFilter::new(doc.name.clone());
    filter.comments = doc.comments.clone();
    filter.editor_data = doc.editor_data.clone();

    let mut seen_ids: HashSet<u32> = HashSet::new();
    for entry in &doc.blocks {
        if !seen_ids.insert(entry.unique_id) {
            bail!("duplicate block id {} in serialized filter", entry.unique_id);
        }
        let prototype = registry
            .create(&entry.block_type, &entry.data)
            .with_context(|| format!("block {}", entry.name))?;
        filter.insert_block_raw(Block {
            id: BlockId(entry.unique_id),
            block_type: entry.block_type.clone(),
            name: entry.name.clone(),
            comments: entry.comments.clone(),
            inputs: prototype.inputs,
            outputs: prototype.outputs,
            role: prototype.role,
            disabled: prototype.disabled,
            disable_strategy: prototype.disable_strategy,
        });
    }

    for conn in &doc.connections {
        filter
            .connect(
                (BlockId(conn.output_block), conn.output_connection_point.as_str()),
                (BlockId(conn.input_block), conn.input_connection_point.as_str()),
            )
            .with_context(|| {
                format!(
                    "connection {}.{} -> {}.{}",
                    conn.output_block,
                    conn.output_connection_point,
                    conn.input_block,
                    conn.input_connection_point
                )
            })?;
    }

    Ok(filter)
}

/// Serialize a filter to pretty-printed JSON.
pub fn to_json_string(filter: &SmartFilter) -> Result<String> {
    let doc = serialize_filter(filter)?;
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Parse a JSON document and rebuild the filter it describes.
pub fn from_json_str(json: &str, registry: &BlockRegistry) -> Result<SmartFilter> {
    let doc: SerializedSmartFilter =
        serde_json::from_str(json).context("failed to parse serialized filter JSON")?;
    deserialize_filter(&doc, registry)
}
