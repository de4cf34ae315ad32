//! String-keyed block-type resolution.
//!
//! Deserialization resolves `blockType` strings through a registry of
//! factory closures, so hosts can add block types without the core
//! hardcoding them. The built-in entries cover input/output blocks and the
//! generic custom-shader shape the serializer emits (which the optimizer's
//! synthetic blocks also use).

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::filter::{
    ports_for_program, BlockRole, ConnectionPoint, ConnectionPointType, DisableStrategy,
    InputValue, ShaderBlock,
};
use crate::shader::parse::parse_fragment_block;
use crate::shader::program::ShaderProgram;

/// Everything needed to instantiate a block, before it gets an id and a
/// display name.
#[derive(Clone, Debug)]
pub struct BlockPrototype {
    pub role: BlockRole,
    pub inputs: Vec<ConnectionPoint>,
    pub outputs: Vec<ConnectionPoint>,
    pub disabled: bool,
    pub disable_strategy: DisableStrategy,
}

pub type BlockFactory = Box<dyn Fn(&serde_json::Value) -> Result<BlockPrototype> + Send + Sync>;

fn default_disable_strategy() -> DisableStrategy {
    DisableStrategy::AutoSample
}

/// Serialized payload of an input block.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedInputData {
    pub value: InputValue,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_disable_strategy")]
    pub disable_strategy: DisableStrategy,
}

/// Serialized payload of a shader block: the full program plus the port
/// list, so edited defaults survive a round trip.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedShaderData {
    pub program: ShaderProgram,
    #[serde(default)]
    pub disable_optimization: bool,
    pub inputs: Vec<ConnectionPoint>,
    pub outputs: Vec<ConnectionPoint>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_disable_strategy")]
    pub disable_strategy: DisableStrategy,
}

/// Flags-and-ports subset accepted by source-registered block types, whose
/// program comes from the registered `.glsl` source rather than the data.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommonBlockData {
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    disable_strategy: Option<DisableStrategy>,
    #[serde(default)]
    inputs: Option<Vec<ConnectionPoint>>,
    #[serde(default)]
    outputs: Option<Vec<ConnectionPoint>>,
}

pub struct BlockRegistry {
    factories: HashMap<String, BlockFactory>,
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry {
    /// A registry with the built-in block types registered.
    pub fn new() -> Self {
        let mut registry = Self { factories: HashMap::new() };
        registry.register("InputBlock", input_block_factory);
        registry.register("OutputBlock", output_block_factory);
        registry.register("CustomShaderBlock", custom_shader_factory);
        registry.register(crate::optimizer::OPTIMIZED_BLOCK_TYPE, custom_shader_factory);
        registry
    }

    pub fn register(
        &mut self,
        block_type: impl Into<String>,
        factory: impl Fn(&serde_json::Value) -> Result<BlockPrototype> + Send + Sync + 'static,
    ) {
        self.factories.insert(block_type.into(), Box::new(factory));
    }

    /// Parse an annotated `.glsl` block source and register its block type.
    /// Returns the registered type name.
    pub fn register_shader_source(&mut self, source: &str) -> Result<String> {
        let parsed = parse_fragment_block(source)?;
        let block_type = parsed.annotation.smart_filter_block_type.clone();
        let disable_optimization = parsed.annotation.disable_optimization;
        let program = ShaderProgram::from_fragment(parsed.fragment);
        let (inputs, outputs) = ports_for_program(&program.fragment);

        self.register(block_type.clone(), move |data| {
            let common: CommonBlockData = if data.is_null() {
                CommonBlockData::default()
            } else {
                serde_json::from_value(data.clone()).context("invalid shader block data")?
            };
            Ok(BlockPrototype {
                role: BlockRole::Shader(ShaderBlock {
                    program: program.clone(),
                    disable_optimization,
                }),
                inputs: common.inputs.unwrap_or_else(|| inputs.clone()),
                outputs: common.outputs.unwrap_or_else(|| outputs.clone()),
                disabled: common.disabled,
                disable_strategy: common.disable_strategy.unwrap_or(DisableStrategy::AutoSample),
            })
        });
        Ok(block_type)
    }

    pub fn contains(&self, block_type: &str) -> bool {
        self.factories.contains_key(block_type)
    }

    /// Instantiate a prototype for `block_type` from its serialized data.
    pub fn create(&self, block_type: &str, data: &serde_json::Value) -> Result<BlockPrototype> {
        let factory = self
            .factories
            .get(block_type)
            .ok_or_else(|| anyhow!("unknown block type: {block_type}"))?;
        factory(data).with_context(|| format!("failed to instantiate block type {block_type}"))
    }
}

fn input_block_factory(data: &serde_json::Value) -> Result<BlockPrototype> {
    let data: SerializedInputData =
        serde_json::from_value(data.clone()).context("invalid input block data")?;
    let ty = data.value.ty();
    Ok(BlockPrototype {
        role: BlockRole::Input(data.value),
        inputs: Vec::new(),
        outputs: vec![ConnectionPoint {
            name: "output".to_string(),
            ty,
            optional: false,
            default_value: None,
            auto_convert: false,
        }],
        disabled: data.disabled,
        disable_strategy: data.disable_strategy,
    })
}

fn output_block_factory(_data: &serde_json::Value) -> Result<BlockPrototype> {
    Ok(BlockPrototype {
        role: BlockRole::Output,
        inputs: vec![ConnectionPoint {
            name: "input".to_string(),
            ty: ConnectionPointType::Texture,
            optional: false,
            default_value: None,
            auto_convert: false,
        }],
        outputs: Vec::new(),
        disabled: false,
        disable_strategy: DisableStrategy::AutoSample,
    })
}

fn custom_shader_factory(data: &serde_json::Value) -> Result<BlockPrototype> {
    let data: SerializedShaderData =
        serde_json::from_value(data.clone()).context("invalid custom shader block data")?;
    Ok(BlockPrototype {
        role: BlockRole::Shader(ShaderBlock {
            program: data.program,
            disable_optimization: data.disable_optimization,
        }),
        inputs: data.inputs,
        outputs: data.outputs,
        disabled: data.disabled,
        disable_strategy: data.disable_strategy,
    })
}
