//! The Smart Filter graph model: typed blocks with typed ports, connected
//! into a single-sink DAG.
//!
//! Blocks and connections are stored flat; lookups go through id helpers
//! the way the rest of the crate expects them. Structural invariants that
//! can be enforced at edit time (port existence, type compatibility, one
//! incoming connection per input) live in [`SmartFilter::connect`]; global
//! invariants (single sink, acyclicity, required inputs) are checked by
//! [`crate::graph::validate`].

use serde::{Deserialize, Serialize};

use crate::graph::GraphError;
use crate::shader::program::{FragmentShader, GlslType, ShaderProgram};

/// Unique block identifier within one filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value type of a connection point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionPointType {
    Boolean,
    Float,
    Color3,
    Color4,
    Vector2,
    Texture,
}

impl ConnectionPointType {
    /// Whether an input of this type accepts a value of `from`.
    /// Auto-converting inputs accept any numeric/color/vector source;
    /// textures and booleans always require an exact match.
    pub fn accepts(self, from: ConnectionPointType, auto_convert: bool) -> bool {
        use ConnectionPointType::*;
        if self == from {
            return true;
        }
        if !auto_convert {
            return false;
        }
        let convertible = |t: ConnectionPointType| matches!(t, Float | Color3 | Color4 | Vector2);
        convertible(self) && convertible(from)
    }
}

/// A constant value carried by an input block or an unconnected port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum InputValue {
    Boolean(bool),
    Float(f32),
    Color3([f32; 3]),
    Color4([f32; 4]),
    Vector2([f32; 2]),
    /// External texture source label; texel data is the host's concern.
    Texture(Option<String>),
}

impl InputValue {
    pub fn ty(&self) -> ConnectionPointType {
        match self {
            InputValue::Boolean(_) => ConnectionPointType::Boolean,
            InputValue::Float(_) => ConnectionPointType::Float,
            InputValue::Color3(_) => ConnectionPointType::Color3,
            InputValue::Color4(_) => ConnectionPointType::Color4,
            InputValue::Vector2(_) => ConnectionPointType::Vector2,
            InputValue::Texture(_) => ConnectionPointType::Texture,
        }
    }
}

/// A typed, directional port on a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPoint {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ConnectionPointType,
    /// Optional inputs may stay unconnected; required ones must either be
    /// connected or carry a default value by validation time.
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<InputValue>,
    #[serde(default)]
    pub auto_convert: bool,
}

/// Policy for a bypassed block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisableStrategy {
    /// The command builder copies the main input through unchanged.
    AutoSample,
    /// The block's own binding handles the disabled state.
    Manual,
}

/// Shader-producing payload of a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderBlock {
    pub program: ShaderProgram,
    /// Opt-out flag: the fusion optimizer never merges this block.
    #[serde(default)]
    pub disable_optimization: bool,
}

/// What a block is.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockRole {
    /// Leaf value producer: one output, no inputs.
    Input(InputValue),
    /// Shader pass: exactly one output.
    Shader(ShaderBlock),
    /// The filter's single sink: one input, no outputs.
    Output,
}

/// A node in the filter graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub id: BlockId,
    /// Class name, e.g. `"TintBlock"`; drives registry lookup.
    pub block_type: String,
    /// Display name, unique only by convention.
    pub name: String,
    pub comments: Option<String>,
    pub inputs: Vec<ConnectionPoint>,
    pub outputs: Vec<ConnectionPoint>,
    pub role: BlockRole,
    pub disabled: bool,
    pub disable_strategy: DisableStrategy,
}

impl Block {
    pub fn input(&self, name: &str) -> Option<&ConnectionPoint> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&ConnectionPoint> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn shader(&self) -> Option<&ShaderBlock> {
        match &self.role {
            BlockRole::Shader(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.role, BlockRole::Input(_))
    }

    pub fn is_output(&self) -> bool {
        matches!(self.role, BlockRole::Output)
    }

    /// Name of the input port fed by this block's main input texture, the
    /// one disable-passthrough and fusion chaining apply to.
    pub fn main_input_port(&self) -> Option<&str> {
        self.shader()
            .and_then(|s| s.program.fragment.main_input_texture.as_deref())
    }
}

/// One endpoint of a connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRef {
    pub block: BlockId,
    pub port: String,
}

/// Directed edge from an output port to an input port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
}

/// The complete block+connection graph for one filter.
#[derive(Clone, Debug, PartialEq)]
pub struct SmartFilter {
    pub name: String,
    pub comments: Option<String>,
    /// Opaque editor payload, preserved across serialization round trips.
    pub editor_data: Option<serde_json::Value>,
    next_block_id: u32,
    blocks: Vec<Block>,
    connections: Vec<Connection>,
}

impl SmartFilter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comments: None,
            editor_data: None,
            next_block_id: 0,
            blocks: Vec::new(),
            connections: Vec::new(),
        }
    }

    fn alloc_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        id
    }

    /// Add a leaf input block producing `value`.
    pub fn add_input(&mut self, name: impl Into<String>, value: InputValue) -> BlockId {
        let id = self.alloc_id();
        let ty = value.ty();
        self.blocks.push(Block {
            id,
            block_type: "InputBlock".to_string(),
            name: name.into(),
            comments: None,
            inputs: Vec::new(),
            outputs: vec![ConnectionPoint {
                name: "output".to_string(),
                ty,
                optional: false,
                default_value: None,
                auto_convert: false,
            }],
            role: BlockRole::Input(value),
            disabled: false,
            disable_strategy: DisableStrategy::AutoSample,
        });
        id
    }

    /// Add a shader block whose ports are derived from its program's
    /// uniforms: sampler uniforms become required texture inputs, value
    /// uniforms become optional inputs, and the single output is a texture.
    pub fn add_shader_block(
        &mut self,
        name: impl Into<String>,
        block_type: impl Into<String>,
        program: ShaderProgram,
    ) -> BlockId {
        let id = self.alloc_id();
        let (inputs, outputs) = ports_for_program(&program.fragment);
        self.blocks.push(Block {
            id,
            block_type: block_type.into(),
            name: name.into(),
            comments: None,
            inputs,
            outputs,
            role: BlockRole::Shader(ShaderBlock { program, disable_optimization: false }),
            disabled: false,
            disable_strategy: DisableStrategy::AutoSample,
        });
        id
    }

    /// Add the filter's output block. There can be only one.
    pub fn add_output(&mut self, name: impl Into<String>) -> Result<BlockId, GraphError> {
        if let Some(existing) = self.output_block() {
            return Err(GraphError::MultipleOutputBlocks {
                first: existing,
                second: BlockId(self.next_block_id),
            });
        }
        let id = self.alloc_id();
        self.blocks.push(Block {
            id,
            block_type: "OutputBlock".to_string(),
            name: name.into(),
            comments: None,
            inputs: vec![ConnectionPoint {
                name: "input".to_string(),
                ty: ConnectionPointType::Texture,
                optional: false,
                default_value: None,
                auto_convert: false,
            }],
            outputs: Vec::new(),
            role: BlockRole::Output,
            disabled: false,
            disable_strategy: DisableStrategy::AutoSample,
        });
        Ok(id)
    }

    /// Insert a fully formed block, honoring its id. Used by the
    /// deserializer and the fusion rewriter.
    pub(crate) fn insert_block_raw(&mut self, block: Block) {
        self.next_block_id = self.next_block_id.max(block.id.0 + 1);
        self.blocks.push(block);
    }

    pub(crate) fn alloc_block_id(&mut self) -> BlockId {
        self.alloc_id()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn set_disabled(&mut self, id: BlockId, disabled: bool) {
        if let Some(block) = self.block_mut(id) {
            block.disabled = disabled;
        }
    }

    /// The single sink, if one has been added.
    pub fn output_block(&self) -> Option<BlockId> {
        self.blocks.iter().find(|b| b.is_output()).map(|b| b.id)
    }

    /// The at-most-one connection feeding `port` of `block`.
    pub fn incoming_connection(&self, block: BlockId, port: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.to.block == block && c.to.port == port)
    }

    /// All connections leaving any output port of `block`.
    pub fn connections_from(&self, block: BlockId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.from.block == block)
    }

    /// Connect an output port to an input port.
    pub fn connect(
        &mut self,
        from: (BlockId, &str),
        to: (BlockId, &str),
    ) -> Result<(), GraphError> {
        let (from_block, from_port) = from;
        let (to_block, to_port) = to;

        let source = self
            .block(from_block)
            .ok_or(GraphError::UnknownBlock { block: from_block })?;
        let source_port = source.output(from_port).ok_or_else(|| GraphError::UnknownPort {
            block: from_block,
            port: from_port.to_string(),
        })?;
        let from_ty = source_port.ty;

        let target = self
            .block(to_block)
            .ok_or(GraphError::UnknownBlock { block: to_block })?;
        let target_port = target.input(to_port).ok_or_else(|| GraphError::UnknownPort {
            block: to_block,
            port: to_port.to_string(),
        })?;

        if !target_port.ty.accepts(from_ty, target_port.auto_convert) {
            return Err(GraphError::TypeMismatch {
                from: from_ty,
                to: target_port.ty,
                block: to_block,
                port: to_port.to_string(),
            });
        }
        if self.incoming_connection(to_block, to_port).is_some() {
            return Err(GraphError::InputAlreadyConnected {
                block: to_block,
                port: to_port.to_string(),
            });
        }

        self.connections.push(Connection {
            from: PortRef { block: from_block, port: from_port.to_string() },
            to: PortRef { block: to_block, port: to_port.to_string() },
        });
        Ok(())
    }

    /// Drop the connection feeding `port` of `block`, if any.
    pub fn disconnect_input(&mut self, block: BlockId, port: &str) -> bool {
        let before = self.connections.len();
        self.connections
            .retain(|c| !(c.to.block == block && c.to.port == port));
        before != self.connections.len()
    }

    /// Detach and remove a block together with every connection touching it.
    pub fn remove_block(&mut self, id: BlockId) {
        self.blocks.retain(|b| b.id != id);
        self.connections
            .retain(|c| c.from.block != id && c.to.block != id);
    }
}

/// Derive a shader block's ports from its fragment uniforms.
pub(crate) fn ports_for_program(
    fragment: &FragmentShader,
) -> (Vec<ConnectionPoint>, Vec<ConnectionPoint>) {
    let inputs = fragment
        .uniforms
        .iter()
        .map(|u| {
            let ty = connection_type_for(u.ty);
            ConnectionPoint {
                name: u.name.clone(),
                ty,
                optional: ty != ConnectionPointType::Texture,
                default_value: None,
                auto_convert: false,
            }
        })
        .collect();
    let outputs = vec![ConnectionPoint {
        name: "output".to_string(),
        ty: ConnectionPointType::Texture,
        optional: false,
        default_value: None,
        auto_convert: false,
    }];
    (inputs, outputs)
}

pub(crate) fn connection_type_for(ty: GlslType) -> ConnectionPointType {
    match ty {
        GlslType::Bool => ConnectionPointType::Boolean,
        GlslType::Float => ConnectionPointType::Float,
        GlslType::Vec2 => ConnectionPointType::Vector2,
        GlslType::Vec3 => ConnectionPointType::Color3,
        GlslType::Vec4 => ConnectionPointType::Color4,
        GlslType::Sampler2D => ConnectionPointType::Texture,
    }
}
