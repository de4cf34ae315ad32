mod common;

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use common::tint_chain;
use futures::executor::block_on;
use smart_filter_compiler::command::{CommandAction, InitializationData};
use smart_filter_compiler::{
    validate, Block, BlockBinding, BlockId, BlockRole, Command, CommandBufferBuilder,
};

/// Test binding that records command execution and registers one init task
/// per shader block.
struct RecordingBinding {
    executed: Arc<Mutex<Vec<(BlockId, String)>>>,
    fail_init_for: Option<BlockId>,
}

impl RecordingBinding {
    fn new() -> Self {
        Self { executed: Arc::new(Mutex::new(Vec::new())), fail_init_for: None }
    }

    fn record(&self, id: BlockId, name: &str) -> CommandAction {
        let executed = self.executed.clone();
        let name = name.to_string();
        Box::new(move || {
            executed.lock().unwrap().push((id, name.clone()));
            Ok(())
        })
    }
}

impl BlockBinding for RecordingBinding {
    fn generate_commands(
        &mut self,
        data: &mut InitializationData,
        block: &Block,
        is_final_output: bool,
    ) -> Result<()> {
        match &block.role {
            BlockRole::Input(_) => {
                data.add_disposable(format!("{}.texture", block.name));
            }
            BlockRole::Shader(_) => {
                assert!(!is_final_output);
                data.add_disposable(format!("{}.rt", block.name));
                data.commands
                    .push(Command::from_action(block.id, "render", self.record(block.id, "render")));
                let fail = self.fail_init_for == Some(block.id);
                let name = block.name.clone();
                data.register_init(async move {
                    if fail {
                        Err(anyhow!("{name}: program compilation failed"))
                    } else {
                        Ok(())
                    }
                });
            }
            BlockRole::Output => {
                assert!(is_final_output);
                data.commands.push(Command::from_action(
                    block.id,
                    "copyToOutput",
                    self.record(block.id, "copyToOutput"),
                ));
            }
        }
        Ok(())
    }

    fn passthrough_action(&mut self, block: &Block) -> Result<CommandAction> {
        Ok(self.record(block.id, "passthrough"))
    }
}

#[test]
fn chain_commands_follow_dependency_order() {
    let (filter, shaders, _, out) = tint_chain(3);
    let plan = validate(&filter).unwrap();
    let mut binding = RecordingBinding::new();
    let built = CommandBufferBuilder::new(&filter, &plan).build(&mut binding).unwrap();

    let owners: Vec<BlockId> = built.commands.iter().map(|c| c.owner()).collect();
    let mut expected = shaders.clone();
    expected.push(out);
    assert_eq!(owners, expected);

    let names: Vec<&str> = built.commands.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["render", "render", "render", "copyToOutput"]);
}

#[test]
fn disabled_auto_sample_block_still_emits_a_passthrough() {
    let (mut filter, shaders, _, _) = tint_chain(3);
    filter.set_disabled(shaders[1], true);
    let plan = validate(&filter).unwrap();
    let mut binding = RecordingBinding::new();
    let executed = binding.executed.clone();
    let mut built = CommandBufferBuilder::new(&filter, &plan).build(&mut binding).unwrap();

    let names: Vec<&str> = built.commands.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["render", "passthrough", "render", "copyToOutput"]);

    built.commands.execute_all().unwrap();
    let log = executed.lock().unwrap();
    assert_eq!(log[1], (shaders[1], "passthrough".to_string()));
}

#[test]
fn initialization_waits_on_every_registered_task() {
    let (filter, _, _, _) = tint_chain(2);
    let plan = validate(&filter).unwrap();
    let mut binding = RecordingBinding::new();
    let mut built = CommandBufferBuilder::new(&filter, &plan).build(&mut binding).unwrap();

    assert_eq!(built.pending_init_count(), 2);
    block_on(built.wait_ready()).unwrap();
    assert_eq!(built.pending_init_count(), 0);
}

#[test]
fn one_failed_initialization_fails_the_whole_filter() {
    let (filter, shaders, _, _) = tint_chain(3);
    let plan = validate(&filter).unwrap();
    let mut binding = RecordingBinding::new();
    binding.fail_init_for = Some(shaders[1]);
    let mut built = CommandBufferBuilder::new(&filter, &plan).build(&mut binding).unwrap();

    let err = block_on(built.wait_ready()).unwrap_err();
    assert!(err.to_string().contains("program compilation failed"));
}

#[test]
fn disposables_are_collected_across_blocks() {
    let (filter, _, _, _) = tint_chain(2);
    let plan = validate(&filter).unwrap();
    let mut binding = RecordingBinding::new();
    let built = CommandBufferBuilder::new(&filter, &plan).build(&mut binding).unwrap();
    assert_eq!(built.disposables, vec!["source.texture", "tint0.rt", "tint1.rt"]);
}
