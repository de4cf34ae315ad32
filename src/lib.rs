//! Smart Filter graph compilation and optimization engine.
//!
//! A smart filter is a DAG of typed blocks (texture and value inputs,
//! shader passes, one output) connected through typed ports. This crate
//! owns the compilation pipeline over that graph:
//!
//! - [`graph::validate`] checks the structural invariants (single sink,
//!   acyclic, required inputs fed) and produces a deterministic execution
//!   order;
//! - [`optimizer::SmartFilterOptimizer`] fuses chains of single-sampler
//!   shader blocks into combined passes under a texture-sampler budget,
//!   merging their GLSL sources symbol-safely;
//! - [`command::CommandBufferBuilder`] walks the validated graph and lets
//!   the external GPU binding append ordered commands and initialization
//!   work.
//!
//! Rendering itself (program compilation, uniform upload, draw calls)
//! lives with the host binding layer, behind [`command::BlockBinding`].

pub mod command;
pub mod filter;
pub mod graph;
mod naming;
pub mod optimizer;
pub mod registry;
pub mod serialize;
pub mod shader;

pub use command::{
    BlockBinding, BuiltFilter, Command, CommandBuffer, CommandBufferBuilder, InitializationData,
};
pub use filter::{
    Block, BlockId, BlockRole, Connection, ConnectionPoint, ConnectionPointType, DisableStrategy,
    InputValue, PortRef, ShaderBlock, SmartFilter,
};
pub use graph::{validate, ExecutionPlan, GraphError};
pub use optimizer::{OptimizerConfig, SmartFilterOptimizer, OPTIMIZED_BLOCK_TYPE};
pub use registry::{BlockPrototype, BlockRegistry};
pub use serialize::{deserialize_filter, from_json_str, serialize_filter, to_json_string};
pub use shader::program::ShaderProgram;
