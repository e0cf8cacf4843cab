//! The canonical, single-writer pipeline run loop (spec.md §4.4). Event
//! order is the contract: `pre_run`, then per block `pre_block`, then per
//! item `pre_transaction -> process -> post_transaction` (post in reverse
//! extension order), then `post_block` (reverse), then finally `post_run`
//! (reverse), which always runs even when the block loop failed partway
//! through.

use crate::context::RunContext;
use crate::extension::Extension;
use crate::item::TransactionInfo;
use crate::processor::Processor;
use crate::provider::Provider;
use replay_common::ReplayResult;
use replay_state::StateBackend;
use tracing::{debug, instrument};

pub struct Executor<P, X> {
    provider: P,
    processor: X,
    extensions: Vec<Box<dyn Extension>>,
}

impl<P: Provider, X: Processor> Executor<P, X> {
    pub fn new(provider: P, processor: X) -> Self {
        Self { provider, processor, extensions: Vec::new() }
    }

    pub fn with_extension(mut self, extension: Box<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Runs blocks `[from, to)` against `state`, in order. `post_run` is
    /// always called, with the first error the run produced (if any).
    #[instrument(skip_all, fields(from, to))]
    pub fn run(
        &mut self,
        state: &mut dyn StateBackend,
        from: u64,
        to: u64,
        ctx: &RunContext,
    ) -> ReplayResult<()> {
        let result = self.run_blocks(state, from, to, ctx);
        let post_run_result = run_post_round(&mut self.extensions, |ext| {
            ext.post_run(state, to, &result)
        });
        match result {
            Err(e) => Err(e),
            Ok(()) => post_run_result,
        }
    }

    fn run_blocks(
        &mut self,
        state: &mut dyn StateBackend,
        from: u64,
        to: u64,
        ctx: &RunContext,
    ) -> ReplayResult<()> {
        ctx.check()?;
        for extension in self.extensions.iter_mut() {
            extension.pre_run(state, from, to)?;
        }

        for block in from..to {
            ctx.check()?;
            debug!(block, "entering block");
            for extension in self.extensions.iter_mut() {
                extension.pre_block(state, block)?;
            }

            let items = self.provider.items(block)?;
            let mut items_result = Ok(());
            for info in &items {
                if let Err(e) = self.run_item(state, info, ctx) {
                    items_result = Err(e);
                    break;
                }
            }

            // pre_block already fired for this block, so post_block must run
            // regardless of whether the item loop above succeeded, without
            // letting a post_block failure hide the original error.
            let post_block_result = run_post_round(&mut self.extensions, |ext| ext.post_block(state, block));
            items_result?;
            post_block_result?;
        }
        Ok(())
    }

    fn run_item(
        &mut self,
        state: &mut dyn StateBackend,
        info: &TransactionInfo,
        ctx: &RunContext,
    ) -> ReplayResult<()> {
        ctx.check()?;
        for extension in self.extensions.iter_mut() {
            extension.pre_transaction(state, info)?;
        }
        // pre_transaction already fired for every extension, so post_transaction
        // must still run even if processing failed, without letting a
        // post_transaction failure hide the processing error.
        let process_result = self.processor.process(info, state);
        let post_tx_result = run_post_round(&mut self.extensions, |ext| ext.post_transaction(state, info));
        process_result?;
        post_tx_result
    }
}

/// Runs every extension's hook in reverse declaration order, even after one
/// fails, then returns the first error encountered (spec.md §4.4: "currently
/// open post_* events complete").
fn run_post_round<F>(extensions: &mut [Box<dyn Extension>], mut hook: F) -> ReplayResult<()>
where
    F: FnMut(&mut dyn Extension) -> ReplayResult<()>,
{
    let mut first_err = None;
    for extension in extensions.iter_mut().rev() {
        if let Err(e) = hook(extension.as_mut()) {
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::PipelineItem;
    use replay_common::Address;
    use replay_state::MemoryState;
    use std::sync::{Arc, Mutex};

    struct StaticProvider {
        per_block: Vec<TransactionInfo>,
    }

    impl Provider for StaticProvider {
        fn items(&self, block: u64) -> ReplayResult<Vec<TransactionInfo>> {
            Ok(self.per_block.iter().filter(|i| i.block == block).cloned().collect())
        }
    }

    struct CreateAccountProcessor;

    impl Processor for CreateAccountProcessor {
        fn process(&mut self, info: &TransactionInfo, state: &mut dyn StateBackend) -> ReplayResult<()> {
            match &info.item {
                PipelineItem::Operation(op) => replay_trace::apply(op, state),
                PipelineItem::Transaction { .. } => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingExtension {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Extension for RecordingExtension {
        fn pre_run(&mut self, _s: &mut dyn StateBackend, from: u64, to: u64) -> ReplayResult<()> {
            self.events.lock().unwrap().push(format!("pre_run({from},{to})"));
            Ok(())
        }
        fn pre_block(&mut self, _s: &mut dyn StateBackend, block: u64) -> ReplayResult<()> {
            self.events.lock().unwrap().push(format!("pre_block({block})"));
            Ok(())
        }
        fn pre_transaction(&mut self, _s: &mut dyn StateBackend, info: &TransactionInfo) -> ReplayResult<()> {
            self.events.lock().unwrap().push(format!("pre_tx({},{})", info.block, info.tx_index));
            Ok(())
        }
        fn post_transaction(&mut self, _s: &mut dyn StateBackend, info: &TransactionInfo) -> ReplayResult<()> {
            self.events.lock().unwrap().push(format!("post_tx({},{})", info.block, info.tx_index));
            Ok(())
        }
        fn post_block(&mut self, _s: &mut dyn StateBackend, block: u64) -> ReplayResult<()> {
            self.events.lock().unwrap().push(format!("post_block({block})"));
            Ok(())
        }
        fn post_run(&mut self, _s: &mut dyn StateBackend, to: u64, result: &ReplayResult<()>) -> ReplayResult<()> {
            self.events.lock().unwrap().push(format!("post_run({to},{})", result.is_ok()));
            Ok(())
        }
    }

    #[test]
    fn event_order_matches_pre_process_post_with_reversed_post_extensions() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let a = Address::repeat_byte(1);

        let items = vec![TransactionInfo {
            block: 10,
            tx_index: 0,
            item: PipelineItem::Operation(replay_trace::Operation::CreateAccount { address: a }),
        }];
        let provider = StaticProvider { per_block: items };
        let mut executor = Executor::new(provider, CreateAccountProcessor)
            .with_extension(Box::new(RecordingExtension { events: events.clone() }));

        let mut state = MemoryState::new();
        let ctx = RunContext::new();
        executor.run(&mut state, 10, 11, &ctx).unwrap();

        let log = events.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "pre_run(10,11)".to_string(),
                "pre_block(10)".to_string(),
                "pre_tx(10,0)".to_string(),
                "post_tx(10,0)".to_string(),
                "post_block(10)".to_string(),
                "post_run(11,true)".to_string(),
            ]
        );
        assert!(state.exist(a).unwrap());
    }

    #[test]
    fn post_run_still_fires_when_a_block_fails() {
        struct FailingProcessor;
        impl Processor for FailingProcessor {
            fn process(&mut self, _info: &TransactionInfo, _state: &mut dyn StateBackend) -> ReplayResult<()> {
                Err(replay_common::ReplayError::Cancelled)
            }
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let items = vec![TransactionInfo { block: 0, tx_index: 0, item: PipelineItem::Transaction {
            tx_hash: Default::default(),
        } }];
        let provider = StaticProvider { per_block: items };
        let mut executor = Executor::new(provider, FailingProcessor)
            .with_extension(Box::new(RecordingExtension { events: events.clone() }));

        let mut state = MemoryState::new();
        let ctx = RunContext::new();
        let result = executor.run(&mut state, 0, 1, &ctx);

        assert!(matches!(result, Err(replay_common::ReplayError::Cancelled)));
        let log = events.lock().unwrap();
        assert!(log.last().unwrap().starts_with("post_run"));
        assert!(log.last().unwrap().ends_with("false)"));
    }

    #[test]
    fn a_failing_transaction_still_balances_its_open_pre_events() {
        struct FailingProcessor;
        impl Processor for FailingProcessor {
            fn process(&mut self, _info: &TransactionInfo, _state: &mut dyn StateBackend) -> ReplayResult<()> {
                Err(replay_common::ReplayError::Cancelled)
            }
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let items = vec![TransactionInfo {
            block: 0,
            tx_index: 0,
            item: PipelineItem::Transaction { tx_hash: Default::default() },
        }];
        let provider = StaticProvider { per_block: items };
        let mut executor = Executor::new(provider, FailingProcessor)
            .with_extension(Box::new(RecordingExtension { events: events.clone() }));

        let mut state = MemoryState::new();
        let ctx = RunContext::new();
        let result = executor.run(&mut state, 0, 1, &ctx);

        assert!(matches!(result, Err(replay_common::ReplayError::Cancelled)));
        let log = events.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "pre_run(0,1)".to_string(),
                "pre_block(0)".to_string(),
                "pre_tx(0,0)".to_string(),
                "post_tx(0,0)".to_string(),
                "post_block(0)".to_string(),
                "post_run(1,false)".to_string(),
            ]
        );
    }
}
