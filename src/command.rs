//! Command buffer construction.
//!
//! Walks a validated filter in dependency order and asks each block's
//! binding (the external GPU collaborator) to append commands and
//! register initialization work. Commands execute strictly in append
//! order; initialization completes as a fail-fast conjunction before the
//! runtime is exposed.

use std::fmt;

use anyhow::{anyhow, bail, Result};
use futures::future::BoxFuture;

use crate::filter::{Block, BlockId, DisableStrategy, SmartFilter};
use crate::graph::ExecutionPlan;

/// Boxed unit of execution work attached to a command.
pub type CommandAction = Box<dyn FnMut() -> Result<()> + Send>;

/// Pending block initialization (resource allocation, program compilation).
pub type InitTask = BoxFuture<'static, Result<()>>;

/// An opaque named unit of runtime work owned by one block.
pub struct Command {
    owner: BlockId,
    name: String,
    action: CommandAction,
}

impl Command {
    pub fn new(
        owner: BlockId,
        name: impl Into<String>,
        action: impl FnMut() -> Result<()> + Send + 'static,
    ) -> Self {
        Self { owner, name: name.into(), action: Box::new(action) }
    }

    pub fn from_action(owner: BlockId, name: impl Into<String>, action: CommandAction) -> Self {
        Self { owner, name: name.into(), action }
    }

    pub fn owner(&self) -> BlockId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn execute(&mut self) -> Result<()> {
        (self.action)()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered list of commands realizing one filter.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Execute every command in append order, stopping at the first error.
    pub fn execute_all(&mut self) -> Result<()> {
        for command in &mut self.commands {
            (command.action)()
                .map_err(|e| anyhow!("command {} of block {} failed: {e}", command.name, command.owner))?;
        }
        Ok(())
    }
}

/// Shared state a binding appends into while commands are generated.
#[derive(Default)]
pub struct InitializationData {
    pub commands: CommandBuffer,
    /// Resource names to release when the filter is disposed.
    pub disposables: Vec<String>,
    init_tasks: Vec<InitTask>,
}

impl InitializationData {
    pub fn add_disposable(&mut self, resource: impl Into<String>) {
        self.disposables.push(resource.into());
    }

    /// Register asynchronous initialization work that must complete before
    /// the first command runs.
    pub fn register_init(
        &mut self,
        task: impl std::future::Future<Output = Result<()>> + Send + 'static,
    ) {
        self.init_tasks.push(Box::pin(task));
    }
}

/// The external block-execution contract: the GPU binding layer appends
/// commands and init work for each block it knows how to drive.
pub trait BlockBinding {
    /// Append zero or more commands for `block` and register any pending
    /// initialization work.
    fn generate_commands(
        &mut self,
        data: &mut InitializationData,
        block: &Block,
        is_final_output: bool,
    ) -> Result<()>;

    /// Action copying `block`'s main input through to its output, used for
    /// a disabled auto-sample block so downstream blocks observe a value.
    fn passthrough_action(&mut self, block: &Block) -> Result<CommandAction>;
}

/// A built filter: its command buffer plus everything needed to finish
/// bringing it up.
pub struct BuiltFilter {
    pub commands: CommandBuffer,
    pub disposables: Vec<String>,
    init_tasks: Vec<InitTask>,
}

impl BuiltFilter {
    /// Await every registered initialization task as a fail-fast
    /// conjunction. If any task fails, the whole filter initialization
    /// fails and no partial runtime is exposed.
    pub async fn wait_ready(&mut self) -> Result<()> {
        let tasks = std::mem::take(&mut self.init_tasks);
        futures::future::try_join_all(tasks).await?;
        Ok(())
    }

    pub fn pending_init_count(&self) -> usize {
        self.init_tasks.len()
    }
}

pub struct CommandBufferBuilder<'a> {
    filter: &'a SmartFilter,
    plan: &'a ExecutionPlan,
}

impl<'a> CommandBufferBuilder<'a> {
    pub fn new(filter: &'a SmartFilter, plan: &'a ExecutionPlan) -> Self {
        Self { filter, plan }
    }

    /// Emit commands for every block in dependency order.
    ///
    /// An unresolved required input at this stage means the filter was not
    /// validated first: it is reported as an internal error, not a
    /// recoverable one.
    pub fn build(&self, binding: &mut dyn BlockBinding) -> Result<BuiltFilter> {
        let mut data = InitializationData::default();

        for &id in self.plan.order() {
            let block = self
                .filter
                .block(id)
                .ok_or_else(|| anyhow!("internal: plan references missing block {id}"))?;

            for port in &block.inputs {
                if !port.optional
                    && port.default_value.is_none()
                    && self.filter.incoming_connection(id, &port.name).is_none()
                {
                    bail!("internal: unresolved input {id}.{} at command build time", port.name);
                }
            }

            if block.disabled
                && block.disable_strategy == DisableStrategy::AutoSample
                && block.shader().is_some()
            {
                if block.main_input_port().is_none() {
                    bail!(
                        "disabled block {} uses auto-sample but has no main input texture",
                        block.name
                    );
                }
                let action = binding.passthrough_action(block)?;
                data.commands.push(Command::from_action(id, "passthrough", action));
                continue;
            }

            let is_final_output = id == self.plan.output_block();
            binding.generate_commands(&mut data, block, is_final_output)?;
        }

        Ok(BuiltFilter {
            commands: data.commands,
            disposables: data.disposables,
            init_tasks: data.init_tasks,
        })
    }
}
