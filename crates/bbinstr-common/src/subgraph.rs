use std::collections::BTreeMap;

use crate::address::{Offset, Size, NO_OFFSET};
use crate::graph::{BlockAttributes, BlockId, Reference, SectionId};
use crate::instruction::{Condition, Instruction};
use crate::source::SourceRanges;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BasicBlockId(pub usize);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BasicBlockKind {
    Code,
    Data,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Branch {
    Always,
    If(Condition),
}

/// A control-flow edge leaving a basic block.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Successor {
    pub branch: Branch,
    pub target: BasicBlockId,

    /// Offset and size of the branch instruction this edge was decoded from, or [`NO_OFFSET`]
    /// and zero for an implicit fall-through.
    pub instruction_offset: Offset,
    pub instruction_size: Size,
}

impl Successor {
    pub fn new(branch: Branch, target: BasicBlockId) -> Self {
        Self {
            branch,
            target,
            instruction_offset: NO_OFFSET,
            instruction_size: 0,
        }
    }

    pub fn with_instruction(mut self, offset: Offset, size: Size) -> Self {
        self.instruction_offset = offset;
        self.instruction_size = size;
        self
    }

    pub fn has_instruction(&self) -> bool {
        self.instruction_offset != NO_OFFSET && self.instruction_size != 0
    }
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub id: BasicBlockId,
    pub name: String,
    pub kind: BasicBlockKind,

    /// Offset of this basic block within the original block.
    pub offset: Offset,
    pub size: Size,

    pub instructions: Vec<Instruction>,
    pub successors: Vec<Successor>,

    /// Contents of a data basic block, with references keyed by offset within `data`.
    pub data: Vec<u8>,
    pub references: BTreeMap<Offset, Reference>,
}

impl BasicBlock {
    pub fn new(id: BasicBlockId, name: String, kind: BasicBlockKind, offset: Offset) -> Self {
        Self {
            id,
            name,
            kind,
            offset,
            size: 0,
            instructions: Vec::new(),
            successors: Vec::new(),
            data: Vec::new(),
            references: BTreeMap::new(),
        }
    }

    pub fn is_code(&self) -> bool {
        self.kind == BasicBlockKind::Code
    }
}

/// A code block broken up into its basic blocks.
#[derive(Clone, Debug)]
pub struct BasicBlockSubGraph {
    pub original: BlockId,
    pub name: String,
    pub section: Option<SectionId>,
    pub alignment: u32,
    pub attributes: BlockAttributes,

    /// Source ranges of the original block, as they were before decomposition.
    pub source_ranges: SourceRanges,

    /// Basic blocks in layout order.
    pub blocks: Vec<BasicBlock>,
}

impl BasicBlockSubGraph {
    pub fn get(&self, id: BasicBlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.id == id)
    }

    pub fn get_mut(&mut self, id: BasicBlockId) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|block| block.id == id)
    }

    pub fn code_blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().filter(|block| block.is_code())
    }
}
