//! Entry thunks.
//!
//! A thunk stands in for an entry point. It hands the real destination (and optionally one extra
//! parameter) to a hook imported from the instrumentation agent, which eventually transfers control
//! to the destination:
//!
//! ```text
//! push parameter      ; only with a parameter
//! push offset destination
//! jmp [hook]
//! ```

use std::collections::BTreeMap;

use log::{debug, error, trace};

use bbinstr_backend::encode_instructions;
use bbinstr_common::{
    BlockAttributes, BlockGraph, BlockId, BlockType, DataRange, Displacement, Immediate, ImageKind,
    Instruction, Offset, Operand, Reference, SectionId, SourceRange, ValueSize,
};

use crate::imports::AddImportsTransform;
use crate::transform::{apply_block_graph_transform, BlockGraphTransform};
use crate::{Error, Result};

pub const THUNK_SECTION: &str = ".thunks";

/// Code, executable and readable.
const THUNK_CHARACTERISTICS: u32 = 0x6000_0020;

pub const DEFAULT_INSTRUMENT_DLL: &str = "call_trace_client.dll";

const INDIRECT_PENTER: &str = "_indirect_penter";
const INDIRECT_PENTER_DLLMAIN: &str = "_indirect_penter_dllmain";
const INDIRECT_PENTER_EXEMAIN: &str = "_indirect_penter_exemain";

#[derive(Debug)]
pub struct EntryThunkTransform {
    only_instrument_module_entry: bool,
    instrument_dll_name: String,
    src_ranges_for_thunks: bool,
    parameter: Option<Immediate>,

    thunk_section: Option<SectionId>,

    /// Thunks by the destination they stand in for.
    thunks: BTreeMap<(BlockId, Offset), BlockId>,
}

impl Default for EntryThunkTransform {
    fn default() -> Self {
        Self {
            only_instrument_module_entry: false,
            instrument_dll_name: DEFAULT_INSTRUMENT_DLL.into(),
            src_ranges_for_thunks: false,
            parameter: None,
            thunk_section: None,
            thunks: BTreeMap::new(),
        }
    }
}

impl EntryThunkTransform {
    pub const NAME: &'static str = "EntryThunkTransform";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_only_instrument_module_entry(&mut self, only: bool) {
        self.only_instrument_module_entry = only;
    }

    pub fn set_instrument_dll_name(&mut self, name: impl Into<String>) {
        self.instrument_dll_name = name.into();
    }

    pub fn set_src_ranges_for_thunks(&mut self, enabled: bool) {
        self.src_ranges_for_thunks = enabled;
    }

    /// Pass `parameter` to the hook from every thunk. Only 32-bit values and block addresses can
    /// be pushed as a parameter.
    pub fn set_entry_thunk_parameter(&mut self, parameter: Immediate) -> Result<()> {
        if let Immediate::Value(_, ValueSize::Byte) = parameter {
            error!("entry thunk parameter {parameter:?} is not 32 bits wide");
            return Err(Error::InvalidThunkParameter);
        }

        self.parameter = Some(parameter);
        Ok(())
    }

    pub fn only_instrument_module_entry(&self) -> bool {
        self.only_instrument_module_entry
    }

    pub fn instrument_dll_name(&self) -> &str {
        &self.instrument_dll_name
    }

    pub fn src_ranges_for_thunks(&self) -> bool {
        self.src_ranges_for_thunks
    }

    pub fn entry_thunk_parameter(&self) -> Option<Immediate> {
        self.parameter
    }

    pub fn thunk_section(&self) -> Option<SectionId> {
        self.thunk_section
    }

    /// Thunks made by the last application, keyed by the destination they stand in for.
    pub fn thunks(&self) -> &BTreeMap<(BlockId, Offset), BlockId> {
        &self.thunks
    }

    fn hook_name(&self, image: ImageKind) -> &'static str {
        match (self.only_instrument_module_entry, image) {
            (false, _) => INDIRECT_PENTER,
            (true, ImageKind::Dll) => INDIRECT_PENTER_DLLMAIN,
            (true, ImageKind::Exe) => INDIRECT_PENTER_EXEMAIN,
        }
    }

    fn import_hook(&self, graph: &mut BlockGraph, header: BlockId) -> Result<Reference> {
        let mut imports = AddImportsTransform::new();
        let module = imports.add_module(self.instrument_dll_name.clone());
        let index = imports.add_symbol(module, self.hook_name(graph.image()))?;

        apply_block_graph_transform(&mut imports, graph, header)?;
        imports.symbol_reference(module, index)
    }

    fn thunk_module_entry(
        &mut self,
        graph: &mut BlockGraph,
        header: BlockId,
        section: SectionId,
        hook: &Reference,
    ) -> Result<()> {
        let Some(entry) = graph.entry_point(header)? else {
            debug!("module has no entry point to thunk");
            return Ok(());
        };

        let thunk = self.thunk(graph, section, &entry, hook)?;
        graph.set_entry_point(
            header,
            Reference {
                referenced: thunk,
                offset: 0,
                base: 0,
                ..entry
            },
        )?;

        Ok(())
    }

    fn thunk_all_entries(
        &mut self,
        graph: &mut BlockGraph,
        section: SectionId,
        hook: &Reference,
    ) -> Result<()> {
        let mut redirects = Vec::new();
        for block in graph.blocks() {
            if block.attributes.contains(BlockAttributes::THUNK) {
                continue;
            }

            for (at, reference) in block.references.iter() {
                if reference.referenced == block.id || reference.offset != 0 {
                    continue;
                }

                let destination = graph.block(reference.referenced)?;
                let thunked = destination.attributes.contains(BlockAttributes::THUNK);
                if destination.is_code() && !thunked {
                    redirects.push((block.id, *at, *reference));
                }
            }
        }

        for (referrer, at, reference) in redirects {
            let thunk = self.thunk(graph, section, &reference, hook)?;
            graph.block_mut(referrer)?.set_reference(
                at,
                Reference {
                    referenced: thunk,
                    offset: 0,
                    base: 0,
                    ..reference
                },
            )?;
        }

        Ok(())
    }

    /// The thunk for `destination`, made on first use.
    fn thunk(
        &mut self,
        graph: &mut BlockGraph,
        section: SectionId,
        destination: &Reference,
        hook: &Reference,
    ) -> Result<BlockId> {
        let key = (destination.referenced, destination.offset);
        if let Some(thunk) = self.thunks.get(&key) {
            return Ok(*thunk);
        }

        let mut instructions = Vec::with_capacity(3);
        if let Some(parameter) = self.parameter {
            instructions.push(Instruction::Push(Operand::Immediate(parameter)));
        }
        instructions.push(Instruction::Push(Operand::Immediate(Immediate::Block(
            destination.referenced,
            destination.offset,
        ))));
        instructions.push(Instruction::Jump(Operand::Memory(Displacement::from(hook))));

        let encoded = encode_instructions(&instructions)?;

        let target = graph.block(destination.referenced)?;
        let name = format!("{}_thunk", target.name);
        // Instrumented code may start with inserted instructions that have no source of their
        // own; the thunk then maps to the first original byte after them.
        let source = target
            .source_ranges
            .iter()
            .find(|pair| pair.data.end() > destination.offset)
            .and_then(|pair| pair.translate(destination.offset.max(pair.data.start())));

        let id = graph.add_block(BlockType::Code, encoded.size(), name);
        let thunk = graph.block_mut(id)?;
        thunk.section = Some(section);
        thunk.attributes = BlockAttributes::THUNK;
        thunk.data = encoded.data;
        thunk.code = encoded.code;
        for (at, reference) in encoded.references {
            thunk.set_reference(at, reference)?;
        }

        if self.src_ranges_for_thunks {
            if let Some(address) = source {
                let size = thunk.size;
                thunk
                    .source_ranges
                    .push(DataRange::new(0, size), SourceRange::new(address, size));
            }
        }

        trace!("thunked {key:?} through {id:?}");

        self.thunks.insert(key, id);
        Ok(id)
    }
}

impl BlockGraphTransform for EntryThunkTransform {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&mut self, graph: &mut BlockGraph, header: BlockId) -> Result<()> {
        self.thunks.clear();

        let section = graph.find_or_add_section(THUNK_SECTION, THUNK_CHARACTERISTICS);
        self.thunk_section = Some(section);

        let hook = self.import_hook(graph, header)?;

        if self.only_instrument_module_entry {
            self.thunk_module_entry(graph, header, section, &hook)?;
        } else {
            self.thunk_all_entries(graph, section, &hook)?;
        }

        debug!(
            "made {} thunks to `{}`",
            self.thunks.len(),
            self.instrument_dll_name
        );

        Ok(())
    }
}
