//! Basic-block entry counting.
//!
//! Every code basic block of the module is made to call a hook in the runtime agent on entry,
//! passing its identifier and the module's frequency data:
//!
//! ```text
//! push id
//! push offset BasicBlockFrequencyData
//! call [_basic_block_enter]
//! ```
//!
//! Identifiers are dense and assigned in the order blocks are instrumented; the address range of
//! block `id` is `bb_ranges()[id]`.
//!
//! Instrumenting a module that has already been through this transform is not supported. The
//! instructions inserted the first time have no source range, so a second pass fails with
//! [`Error::MissingSourceRange`].

mod ranges;


use log::{error, info, trace, warn};

use bbinstr_backend::BasicBlockAssembler;
use bbinstr_common::{
    BasicBlockSubGraph, BlockGraph, BlockId, DataRange, Displacement, Immediate, Offset, Operand,
    RangePair, Reference, RelativeAddress, RelativeAddressRange, SectionId, Size, ValueSize,
};
use bbinstr_frontend::is_decomposable;

pub use ranges::InstrumentedRanges;

use crate::frequency::{AddFrequencyDataTransform, CounterStorage};
use crate::imports::AddImportsTransform;
use crate::thunks::EntryThunkTransform;
use crate::transform::{
    apply_basic_block_subgraph_transform, apply_block_graph_transform, iterate_block_graph,
    BasicBlockSubGraphTransform, BlockGraphTransform, IterativeTransform,
};
use crate::{Error, Result};

pub const MODULE_NAME: &str = "basic_block_entry.dll";
pub const HOOK_NAME: &str = "_basic_block_enter";
pub const AGENT_ID: u32 = 0xbbfb_bf01;

/// Counters are 32 bits wide.
pub const COUNTER_SIZE: Size = 4;

#[derive(Debug)]
pub struct BasicBlockEntryHookTransform<S = AddFrequencyDataTransform> {
    storage: S,
    entry_hook: Option<Reference>,
    ranges: InstrumentedRanges,
    thunk_section: Option<SectionId>,
    src_ranges_for_thunks: bool,
    verify: bool,
}

impl BasicBlockEntryHookTransform {
    pub fn new() -> Self {
        Self::with_storage(AddFrequencyDataTransform::new(AGENT_ID))
    }
}

impl Default for BasicBlockEntryHookTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: CounterStorage> BasicBlockEntryHookTransform<S> {
    pub const NAME: &'static str = "BasicBlockEntryHookTransform";

    /// Keep counters in `storage` instead of the usual frequency data.
    pub fn with_storage(storage: S) -> Self {
        Self {
            storage,
            entry_hook: None,
            ranges: InstrumentedRanges::new(),
            thunk_section: None,
            src_ranges_for_thunks: false,
            verify: cfg!(debug_assertions),
        }
    }

    /// Give the module entry thunk the source range of the entry point.
    pub fn with_src_ranges_for_thunks(mut self, enabled: bool) -> Self {
        self.src_ranges_for_thunks = enabled;
        self
    }

    /// Check that no two recorded ranges overlap once the module is done. On by default in debug
    /// builds.
    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.verify = enabled;
        self
    }

    pub fn bb_ranges(&self) -> &[RelativeAddressRange] {
        self.ranges.basic_blocks()
    }

    /// Sorted once the transform is done.
    pub fn conditional_ranges(&self) -> &[RelativeAddressRange] {
        self.ranges.conditionals()
    }

    pub fn ranges(&self) -> &InstrumentedRanges {
        &self.ranges
    }

    pub fn into_ranges(self) -> InstrumentedRanges {
        self.ranges
    }

    pub fn thunk_section(&self) -> Option<SectionId> {
        self.thunk_section
    }

    pub fn frequency_data_block(&self) -> Option<BlockId> {
        self.storage.data_block()
    }

    pub fn entry_hook(&self) -> Option<Reference> {
        self.entry_hook
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn setup_entry_hook(graph: &mut BlockGraph, header: BlockId) -> Result<Reference> {
        let mut imports = AddImportsTransform::new();
        let module = imports.add_module(MODULE_NAME);
        let index = imports.add_symbol(module, HOOK_NAME)?;

        apply_block_graph_transform(&mut imports, graph, header).map_err(|e| {
            error!("unable to add an import entry for the basic-block hook");
            e
        })?;

        imports.symbol_reference(module, index).map_err(|e| {
            error!("unable to get {HOOK_NAME}");
            e
        })
    }
}

impl<S: CounterStorage> BlockGraphTransform for BasicBlockEntryHookTransform<S> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&mut self, graph: &mut BlockGraph, header: BlockId) -> Result<()> {
        iterate_block_graph(self, graph, header)
    }
}

impl<S: CounterStorage> IterativeTransform for BasicBlockEntryHookTransform<S> {
    fn pre_block_graph_iteration(
        &mut self,
        graph: &mut BlockGraph,
        header: BlockId,
    ) -> Result<()> {
        info!("beginning basic-block instrumentation");

        self.entry_hook = Some(Self::setup_entry_hook(graph, header)?);

        apply_block_graph_transform(&mut self.storage, graph, header).map_err(|e| {
            error!("failed to insert basic-block frequency data");
            e
        })
    }

    fn on_block(&mut self, graph: &mut BlockGraph, block: BlockId) -> Result<()> {
        let candidate = graph.block(block)?;
        if !candidate.is_code() || !is_decomposable(candidate) {
            return Ok(());
        }

        apply_basic_block_subgraph_transform(self, graph, block)
    }

    fn post_block_graph_iteration(
        &mut self,
        graph: &mut BlockGraph,
        header: BlockId,
    ) -> Result<()> {
        let count = self.ranges.len();
        if count == 0 {
            warn!("encountered no basic code blocks during instrumentation");
            return Ok(());
        }

        self.storage
            .allocate_buffer(graph, count, COUNTER_SIZE)
            .map_err(|e| {
                error!("failed to allocate frequency data buffer");
                e
            })?;

        let Some(module_data) = self.storage.data_block() else {
            error!("counter storage has no data block");
            return Err(Error::NotApplied(self.storage.name()));
        };

        let mut thunks = EntryThunkTransform::new();
        thunks.set_only_instrument_module_entry(true);
        thunks.set_instrument_dll_name(MODULE_NAME);
        thunks.set_src_ranges_for_thunks(self.src_ranges_for_thunks);
        thunks.set_entry_thunk_parameter(Immediate::Block(module_data, 0))?;

        apply_block_graph_transform(&mut thunks, graph, header).map_err(|e| {
            error!("unable to thunk module entry points");
            e
        })?;
        self.thunk_section = thunks.thunk_section();

        self.ranges.sort_conditionals();

        if self.verify {
            self.ranges.verify();
        }

        info!(
            "instrumented {count} basic blocks ({} conditionals)",
            self.ranges.conditionals().len()
        );

        Ok(())
    }
}

impl<S: CounterStorage> BasicBlockSubGraphTransform for BasicBlockEntryHookTransform<S> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn transform_subgraph(
        &mut self,
        _graph: &mut BlockGraph,
        subgraph: &mut BasicBlockSubGraph,
    ) -> Result<()> {
        let (Some(hook), Some(module_data)) = (self.entry_hook, self.storage.data_block()) else {
            error!("basic-block hook used before it was set up");
            return Err(Error::NotApplied(Self::NAME));
        };

        instrument_subgraph(subgraph, &hook, module_data, &mut self.ranges)
    }
}

/// Insert the hook call at the top of every code basic block of `subgraph`, recording each block
/// (and the taken arm of each conditional) in `ranges`.
pub fn instrument_subgraph(
    subgraph: &mut BasicBlockSubGraph,
    hook: &Reference,
    module_data: BlockId,
    ranges: &mut InstrumentedRanges,
) -> Result<()> {
    let original = subgraph.original;

    for block in subgraph.blocks.iter_mut().filter(|block| block.is_code()) {
        let Some(pair) = subgraph
            .source_ranges
            .find_range_pair(DataRange::new(block.offset, 1))
            .copied()
        else {
            error!("basic block `{}` has no source range", block.name);
            return Err(Error::MissingSourceRange {
                block: original,
                offset: block.offset,
            });
        };

        let address = translate(&pair, original, block.offset)?;

        let conditional = match block.successors.as_slice() {
            [taken, _] => {
                if !taken.has_instruction() {
                    error!("conditional successor of `{}` has no instruction", block.name);
                    return Err(Error::MissingSuccessorInstruction {
                        block: original,
                        offset: block.offset,
                    });
                }

                let at = translate(&pair, original, taken.instruction_offset)?;
                Some(RelativeAddressRange::new(at, taken.instruction_size))
            }

            _ => None,
        };

        let Ok(id) = u32::try_from(ranges.next_id()) else {
            error!("ran out of basic-block identifiers");
            return Err(Error::TooManyBasicBlocks);
        };

        let mut assembler = BasicBlockAssembler::new(0, &mut block.instructions);
        assembler.push(Immediate::Value(id, ValueSize::Dword));
        assembler.push(Immediate::Block(module_data, 0));
        assembler.call(Operand::Memory(Displacement::from(hook)));

        if let Some(conditional) = conditional {
            ranges.push_conditional(conditional);
        }

        ranges.push_basic_block(RelativeAddressRange::new(address, block.size));

        trace!("basic block {id} is `{}` at {address}", block.name);
    }

    Ok(())
}

fn translate(pair: &RangePair, block: BlockId, offset: Offset) -> Result<RelativeAddress> {
    pair.translate(offset).ok_or_else(|| {
        error!("offset {offset} of block {block:?} translates outside the address space");
        Error::AddressOverflow { block, offset }
    })
}
