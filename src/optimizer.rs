//! Shader fusion optimizer.
//!
//! Rewrites a validated filter into an equivalent one with fewer shader
//! passes by merging chains of compatible single-sampler blocks into
//! synthetic aggregate blocks, subject to a texture-sampler budget. The
//! input filter is never mutated; optimization runs on its own copy.

use std::collections::HashSet;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};

use crate::filter::{
    Block, BlockId, BlockRole, ConnectionPoint, ConnectionPointType, DisableStrategy, PortRef,
    ShaderBlock, SmartFilter,
};
use crate::graph::validate;
use crate::naming;
use crate::shader::merge::{merge_programs, MergeEntry};
use crate::shader::program::ShaderProgram;

/// Block type given to synthetic fused blocks.
pub const OPTIMIZED_BLOCK_TYPE: &str = "OptimizedShaderBlock";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OptimizerConfig {
    /// Hard ceiling on distinct texture samplers per fused fragment shader,
    /// bounded by GPU texture-unit limits.
    pub max_samplers_in_fragment_shader: usize,
    /// Drop disabled blocks from the optimized graph instead of carrying
    /// them through their groups.
    pub remove_disabled_blocks: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_samplers_in_fragment_shader: 8, remove_disabled_blocks: false }
    }
}

pub struct SmartFilterOptimizer<'a> {
    filter: &'a SmartFilter,
    config: OptimizerConfig,
}

impl<'a> SmartFilterOptimizer<'a> {
    pub fn new(filter: &'a SmartFilter, config: OptimizerConfig) -> Self {
        Self { filter, config }
    }

    /// Produce a new, independent filter with fused shader chains.
    ///
    /// - `Ok(Some(_))`: the optimized graph; the input filter is untouched.
    /// - `Ok(None)`: optimization is infeasible (a block alone exceeds the
    ///   sampler budget, or the configuration is unusable); callers render
    ///   the unoptimized graph.
    /// - `Err(_)`: a structural error in the input, or an internal
    ///   invariant violation in the rewriter itself.
    pub fn optimize(&self) -> Result<Option<SmartFilter>> {
        if self.config.max_samplers_in_fragment_shader == 0 {
            warn!("optimizer configured with a zero sampler budget; skipping optimization");
            return Ok(None);
        }

        validate(self.filter).map_err(anyhow::Error::new)?;

        let mut working = self.filter.clone();
        let plan = if self.config.remove_disabled_blocks {
            remove_disabled_blocks(&mut working);
            validate(&working)
                .map_err(anyhow::Error::new)
                .context("internal: graph became invalid while removing disabled blocks")?
        } else {
            validate(&working).map_err(anyhow::Error::new)?
        };

        // Greedy chain fusion over the dependency order: collect the
        // groups first, then rewrite. Groups are disjoint chains, so the
        // rewrites cannot interfere with each other. Non-shader blocks in
        // the order are irrelevant to chains; an ineligible shader block
        // closes the running group.
        let mut groups: Vec<Vec<BlockId>> = Vec::new();
        let mut current: Vec<BlockId> = Vec::new();
        for &id in plan.order() {
            let block = working
                .block(id)
                .ok_or_else(|| anyhow!("internal: plan references missing block {id}"))?;
            if block.shader().is_none() {
                continue;
            }
            if !is_fusable(block) {
                close_group(&mut groups, &mut current);
                continue;
            }
            if current.is_empty() {
                current.push(id);
                continue;
            }
            let tail = *current.last().expect("group is non-empty");
            if self.can_extend(&working, &current, tail, block) {
                current.push(id);
            } else {
                close_group(&mut groups, &mut current);
                current.push(id);
            }
        }
        close_group(&mut groups, &mut current);

        // A block left standalone must fit the budget on its own; fused
        // groups fit by construction. Over-budget standalone blocks make
        // the whole filter infeasible, optimized or not.
        let grouped: HashSet<BlockId> = groups.iter().flatten().copied().collect();
        for block in working.blocks() {
            if block.shader().is_none() || grouped.contains(&block.id) {
                continue;
            }
            let alone: HashSet<BlockId> = std::iter::once(block.id).collect();
            let count = external_texture_sources(&working, &alone);
            if count > self.config.max_samplers_in_fragment_shader {
                warn!(
                    "block {} uses {count} samplers, over the budget of {}; cannot optimize",
                    block.name, self.config.max_samplers_in_fragment_shader
                );
                return Ok(None);
            }
        }

        for group in &groups {
            debug!("fusing {} blocks into one pass", group.len());
            fuse_group(&mut working, group)?;
        }

        validate(&working)
            .map_err(anyhow::Error::new)
            .context("internal: optimized graph failed re-validation")?;

        Ok(Some(working))
    }

    /// Whether `candidate` can join the group currently ending at `tail`.
    fn can_extend(
        &self,
        filter: &SmartFilter,
        current: &[BlockId],
        tail: BlockId,
        candidate: &Block,
    ) -> bool {
        let Some(shader) = candidate.shader() else {
            return false;
        };
        let Some(main_input) = candidate.main_input_port() else {
            return false;
        };
        // Chaining rewrites the candidate's main-input sample calls; a main
        // input used any other way cannot be rewritten.
        if !shader.program.fragment.main_input_only_sampled() {
            return false;
        }
        // The candidate must consume the group tail through its main input.
        let fed_by_tail = filter
            .incoming_connection(candidate.id, main_input)
            .is_some_and(|c| c.from.block == tail);
        if !fed_by_tail {
            return false;
        }
        // Fan-out breaks the chain: the tail's output must feed the
        // candidate and nothing else.
        if filter.connections_from(tail).count() != 1 {
            return false;
        }

        let mut members: HashSet<BlockId> = current.iter().copied().collect();
        members.insert(candidate.id);
        external_texture_sources(filter, &members) <= self.config.max_samplers_in_fragment_shader
    }
}

/// Whether a block can participate in fusion at all.
fn is_fusable(block: &Block) -> bool {
    let Some(shader) = block.shader() else {
        return false;
    };
    !shader.disable_optimization && block.outputs.len() == 1 && shader.program.vertex.is_none()
}

fn close_group(groups: &mut Vec<Vec<BlockId>>, current: &mut Vec<BlockId>) {
    if current.len() >= 2 {
        groups.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Distinct texture sources feeding a block set from outside it. Edges
/// between members are elided; a shared external producer counts once; an
/// unconnected texture input keeps its sampler and counts one each.
fn external_texture_sources(filter: &SmartFilter, members: &HashSet<BlockId>) -> usize {
    let mut sources: HashSet<(BlockId, String)> = HashSet::new();
    let mut unconnected = 0usize;
    for &id in members {
        let Some(block) = filter.block(id) else {
            continue;
        };
        for port in &block.inputs {
            if port.ty != ConnectionPointType::Texture {
                continue;
            }
            match filter.incoming_connection(id, &port.name) {
                Some(c) if members.contains(&c.from.block) => {}
                Some(c) => {
                    sources.insert((c.from.block, c.from.port.clone()));
                }
                None => unconnected += 1,
            }
        }
    }
    sources.len() + unconnected
}

/// Drop disabled shader blocks, rewiring each one's main input straight to
/// its consumers.
fn remove_disabled_blocks(filter: &mut SmartFilter) {
    let disabled: Vec<BlockId> = filter
        .blocks()
        .iter()
        .filter(|b| b.disabled && b.shader().is_some())
        .map(|b| b.id)
        .collect();

    for id in disabled {
        let Some(block) = filter.block(id) else {
            continue;
        };
        let Some(main_input) = block.main_input_port().map(str::to_string) else {
            warn!("disabled block {} has no main input texture; keeping it", block.name);
            continue;
        };
        let source = filter.incoming_connection(id, &main_input).map(|c| c.from.clone());
        let consumers: Vec<PortRef> = filter.connections_from(id).map(|c| c.to.clone()).collect();
        filter.remove_block(id);
        if let Some(source) = source {
            for to in consumers {
                // Texture-to-texture rewiring of previously valid edges.
                if let Err(err) =
                    filter.connect((source.block, &source.port), (to.block, &to.port))
                {
                    warn!("failed to rewire around disabled block: {err}");
                }
            }
        }
    }
}

/// Replace a chain of blocks with one synthetic block wrapping their merged
/// program, rewiring every external connection.
fn fuse_group(filter: &mut SmartFilter, group: &[BlockId]) -> Result<()> {
    let members: Vec<Block> = group
        .iter()
        .map(|&id| {
            filter
                .block(id)
                .cloned()
                .ok_or_else(|| anyhow!("internal: fusion group references missing block {id}"))
        })
        .collect::<Result<_>>()?;
    let member_set: HashSet<BlockId> = group.iter().copied().collect();

    let entries: Vec<MergeEntry<'_>> = members
        .iter()
        .map(|b| {
            let shader = b
                .shader()
                .ok_or_else(|| anyhow!("internal: non-shader block {} in fusion group", b.name))?;
            Ok(MergeEntry {
                block_class: b.block_type.as_str(),
                fragment: &shader.program.fragment,
            })
        })
        .collect::<Result<_>>()?;
    let merged = merge_programs(&entries)?;

    // Port list and incoming rewires for the aggregate, in member order.
    let mut inputs: Vec<ConnectionPoint> = Vec::with_capacity(merged.inputs.len());
    let mut incoming: Vec<(PortRef, String)> = Vec::new();
    for mi in &merged.inputs {
        let member = &members[mi.member];
        let port = member.input(&mi.original).ok_or_else(|| {
            anyhow!("internal: merged uniform {} has no port on {}", mi.original, member.name)
        })?;
        inputs.push(ConnectionPoint {
            name: mi.merged_name.clone(),
            ty: port.ty,
            optional: port.optional,
            default_value: port.default_value.clone(),
            auto_convert: port.auto_convert,
        });
        if let Some(conn) = filter.incoming_connection(member.id, &mi.original) {
            if member_set.contains(&conn.from.block) {
                bail!(
                    "internal: non-chain connection {}.{} inside fusion group",
                    member.name,
                    mi.original
                );
            }
            incoming.push((conn.from.clone(), mi.merged_name.clone()));
        }
    }

    let last = members.last().expect("groups have at least two members");
    let outgoing: Vec<PortRef> = filter.connections_from(last.id).map(|c| c.to.clone()).collect();

    let member_names: Vec<&str> = members.iter().map(|b| b.name.as_str()).collect();
    let name = naming::fused_block_name(&member_names);
    let id = filter.alloc_block_id();

    for member in &members {
        filter.remove_block(member.id);
    }
    filter.insert_block_raw(Block {
        id,
        block_type: OPTIMIZED_BLOCK_TYPE.to_string(),
        name,
        comments: None,
        inputs,
        outputs: vec![ConnectionPoint {
            name: "output".to_string(),
            ty: ConnectionPointType::Texture,
            optional: false,
            default_value: None,
            auto_convert: false,
        }],
        role: BlockRole::Shader(ShaderBlock {
            program: ShaderProgram { vertex: None, fragment: merged.fragment },
            disable_optimization: false,
        }),
        disabled: false,
        disable_strategy: DisableStrategy::AutoSample,
    });

    for (from, port) in incoming {
        filter
            .connect((from.block, &from.port), (id, &port))
            .map_err(|e| anyhow!("internal: failed to rewire fused input: {e}"))?;
    }
    for to in outgoing {
        filter
            .connect((id, "output"), (to.block, &to.port))
            .map_err(|e| anyhow!("internal: failed to rewire fused output: {e}"))?;
    }
    Ok(())
}
