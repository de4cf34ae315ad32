//! Graph validation and topological ordering.
//!
//! A filter is executable when it is an acyclic graph with exactly one
//! output block, every block reaches that output, and every required input
//! is fed. Validation is a pure function: it never mutates the filter, and
//! for a fixed graph it always produces the same order (inputs are walked
//! in declared port order, depth first from the output block).

use std::collections::HashSet;
use std::fmt;

use crate::filter::{BlockId, ConnectionPointType, SmartFilter};

/// Structural failure of a filter graph. Always fatal to the requested
/// operation (build or optimize); never silently recovered.
#[derive(Clone, Debug, PartialEq)]
pub enum GraphError {
    MissingOutputBlock,
    MultipleOutputBlocks {
        first: BlockId,
        second: BlockId,
    },
    CyclicGraph {
        at: BlockId,
    },
    DisconnectedRequiredInput {
        block: BlockId,
        port: String,
    },
    /// A block that cannot reach the output via forward edges.
    UnreachableBlock {
        block: BlockId,
    },
    UnknownBlock {
        block: BlockId,
    },
    UnknownPort {
        block: BlockId,
        port: String,
    },
    TypeMismatch {
        from: ConnectionPointType,
        to: ConnectionPointType,
        block: BlockId,
        port: String,
    },
    InputAlreadyConnected {
        block: BlockId,
        port: String,
    },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::MissingOutputBlock => write!(f, "filter has no output block"),
            GraphError::MultipleOutputBlocks { first, second } => {
                write!(f, "filter has multiple output blocks: {first} and {second}")
            }
            GraphError::CyclicGraph { at } => {
                write!(f, "cycle detected in filter graph at block {at}")
            }
            GraphError::DisconnectedRequiredInput { block, port } => {
                write!(f, "required input {block}.{port} has no incoming connection")
            }
            GraphError::UnreachableBlock { block } => {
                write!(f, "block {block} cannot reach the output block")
            }
            GraphError::UnknownBlock { block } => write!(f, "unknown block {block}"),
            GraphError::UnknownPort { block, port } => {
                write!(f, "unknown port {block}.{port}")
            }
            GraphError::TypeMismatch { from, to, block, port } => {
                write!(f, "cannot connect {from:?} to {to:?} input {block}.{port}")
            }
            GraphError::InputAlreadyConnected { block, port } => {
                write!(f, "input {block}.{port} already has an incoming connection")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// A validated execution order over a filter's blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionPlan {
    order: Vec<BlockId>,
    output: BlockId,
}

impl ExecutionPlan {
    /// Blocks in dependency order; the output block is last.
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn output_block(&self) -> BlockId {
        self.output
    }

    pub fn position(&self, id: BlockId) -> Option<usize> {
        self.order.iter().position(|b| *b == id)
    }
}

/// Validate `filter` and compute its execution order.
pub fn validate(filter: &SmartFilter) -> Result<ExecutionPlan, GraphError> {
    // Connection endpoints must exist before anything else is decided.
    for c in filter.connections() {
        let from = filter
            .block(c.from.block)
            .ok_or(GraphError::UnknownBlock { block: c.from.block })?;
        if from.output(&c.from.port).is_none() {
            return Err(GraphError::UnknownPort {
                block: c.from.block,
                port: c.from.port.clone(),
            });
        }
        let to = filter
            .block(c.to.block)
            .ok_or(GraphError::UnknownBlock { block: c.to.block })?;
        if to.input(&c.to.port).is_none() {
            return Err(GraphError::UnknownPort { block: c.to.block, port: c.to.port.clone() });
        }
    }

    let mut outputs = filter.blocks().iter().filter(|b| b.is_output());
    let output = outputs.next().ok_or(GraphError::MissingOutputBlock)?.id;
    if let Some(second) = outputs.next() {
        return Err(GraphError::MultipleOutputBlocks { first: output, second: second.id });
    }

    let mut visiting: HashSet<BlockId> = HashSet::new();
    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut order: Vec<BlockId> = Vec::with_capacity(filter.blocks().len());
    visit(filter, output, &mut visiting, &mut visited, &mut order)?;

    // Every block must feed the single sink.
    for block in filter.blocks() {
        if !visited.contains(&block.id) {
            return Err(GraphError::UnreachableBlock { block: block.id });
        }
    }

    Ok(ExecutionPlan { order, output })
}

fn visit(
    filter: &SmartFilter,
    id: BlockId,
    visiting: &mut HashSet<BlockId>,
    visited: &mut HashSet<BlockId>,
    order: &mut Vec<BlockId>,
) -> Result<(), GraphError> {
    if visited.contains(&id) {
        return Ok(());
    }
    if !visiting.insert(id) {
        return Err(GraphError::CyclicGraph { at: id });
    }

    let block = filter.block(id).ok_or(GraphError::UnknownBlock { block: id })?;
    for port in &block.inputs {
        match filter.incoming_connection(id, &port.name) {
            Some(conn) => visit(filter, conn.from.block, visiting, visited, order)?,
            None => {
                if !port.optional && port.default_value.is_none() {
                    return Err(GraphError::DisconnectedRequiredInput {
                        block: id,
                        port: port.name.clone(),
                    });
                }
            }
        }
    }

    visiting.remove(&id);
    visited.insert(id);
    order.push(id);
    Ok(())
}
