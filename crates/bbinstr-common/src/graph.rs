use std::collections::BTreeMap;

use bitflags::bitflags;
use log::error;
use serde::{Deserialize, Serialize};

use crate::address::{Offset, Size};
use crate::instruction::Decoded;
use crate::source::SourceRanges;
use crate::{Error, Result};

/// Where the header block keeps its reference to the module entry point.
pub const ENTRY_POINT_OFFSET: Offset = 0x28;

#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockId(pub usize);

#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SectionId(pub usize);

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Code,
    Data,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    #[default]
    Exe,
    Dll,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
    pub struct BlockAttributes: u32 {
        const GAP_BLOCK = 1 << 0;
        const PADDING_BLOCK = 1 << 1;
        const HAS_INLINE_ASSEMBLY = 1 << 2;
        const BUILT_BY_UNSUPPORTED_COMPILER = 1 << 3;
        const ERRORED_DISASSEMBLY = 1 << 4;
        const HAS_EXCEPTION_HANDLING = 1 << 5;
        const DISASSEMBLED_PAST_END = 1 << 6;
        const THUNK = 1 << 7;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
    pub struct LabelAttributes: u32 {
        const CODE = 1 << 0;
        const DATA = 1 << 1;
        const DEBUG_START = 1 << 2;
        const DEBUG_END = 1 << 3;
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub attributes: LabelAttributes,
}

impl Label {
    pub fn new(name: impl Into<String>, attributes: LabelAttributes) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    pub fn is_code(&self) -> bool {
        self.attributes.contains(LabelAttributes::CODE)
    }

    pub fn is_data(&self) -> bool {
        self.attributes.contains(LabelAttributes::DATA)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// An absolute address, fixed up at load time.
    Absolute,

    /// A displacement from the end of the reference.
    PcRelative,

    /// An address relative to the image base.
    Relative,
}

/// A reference from some location to `offset` within the `referenced` block.
///
/// `base` is the offset the reference is considered to point at for the purpose of attributing
/// it to a basic block; it is usually equal to `offset`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub size: Size,
    pub referenced: BlockId,
    pub offset: Offset,
    pub base: Offset,
}

impl Reference {
    pub fn new(
        kind: ReferenceKind,
        size: Size,
        referenced: BlockId,
        offset: Offset,
        base: Offset,
    ) -> Self {
        Self {
            kind,
            size,
            referenced,
            offset,
            base,
        }
    }

    /// A four-byte absolute reference to `offset` within `referenced`.
    pub fn absolute(referenced: BlockId, offset: Offset) -> Self {
        Self::new(ReferenceKind::Absolute, 4, referenced, offset, offset)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.size, 1 | 2 | 4)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    pub characteristics: u32,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockType,
    pub name: String,
    pub section: Option<SectionId>,
    pub size: Size,
    pub alignment: u32,

    /// Initialized bytes. May be shorter than `size`; the rest is zero.
    pub data: Vec<u8>,
    pub attributes: BlockAttributes,
    pub references: BTreeMap<Offset, Reference>,
    pub labels: BTreeMap<Offset, Label>,
    pub source_ranges: SourceRanges,

    /// Instruction boundaries and control flow of a code block, in offset order.
    pub code: Vec<Decoded>,
}

impl Block {
    fn new(id: BlockId, kind: BlockType, size: Size, name: String) -> Self {
        Self {
            id,
            kind,
            name,
            section: None,
            size,
            alignment: 1,
            data: Vec::new(),
            attributes: BlockAttributes::empty(),
            references: BTreeMap::new(),
            labels: BTreeMap::new(),
            source_ranges: SourceRanges::new(),
            code: Vec::new(),
        }
    }

    pub fn is_code(&self) -> bool {
        self.kind == BlockType::Code
    }

    /// Add a reference at `offset`, replacing any reference already there. Returns true if a new
    /// reference was inserted.
    pub fn set_reference(&mut self, offset: Offset, reference: Reference) -> Result<bool> {
        let fits = u64::try_from(offset).map_or(false, |offset| {
            offset + u64::from(reference.size) <= u64::from(self.size)
        });

        if !reference.is_valid() || !fits {
            error!(
                "reference of {} bytes does not fit `{}` at {offset}",
                reference.size, self.name
            );
            return Err(Error::ReferenceOutOfBounds {
                block: self.id,
                offset,
            });
        }

        Ok(self.references.insert(offset, reference).is_none())
    }

    pub fn set_label(&mut self, offset: Offset, label: Label) -> Result<()> {
        if offset < 0 || offset as Size > self.size {
            error!("label `{}` is outside `{}` at {offset}", label.name, self.name);
            return Err(Error::LabelOutOfBounds {
                block: self.id,
                offset,
            });
        }

        self.labels.insert(offset, label);
        Ok(())
    }

    /// Grow the block by `size` zero bytes. Returns the offset of the new bytes.
    pub fn append_zeroes(&mut self, size: Size) -> Offset {
        let at = self.size;
        self.data.resize((at + size) as usize, 0);
        self.size = at + size;
        at as Offset
    }

    /// Overwrite initialized bytes at `offset`, extending the initialized data if needed.
    pub fn write(&mut self, offset: Offset, bytes: &[u8]) -> Result<()> {
        let bounds = usize::try_from(offset)
            .ok()
            .map(|start| (start, start + bytes.len()))
            .filter(|(_, end)| *end <= self.size as usize);

        let Some((start, end)) = bounds else {
            error!(
                "writing {} bytes at {offset} overruns `{}`",
                bytes.len(),
                self.name
            );
            return Err(Error::DataOutOfBounds {
                block: self.id,
                offset,
            });
        };

        if self.data.len() < end {
            self.data.resize(end, 0);
        }

        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlockGraph {
    blocks: BTreeMap<BlockId, Block>,
    sections: Vec<Section>,
    image: ImageKind,
    next: usize,
}

impl BlockGraph {
    pub fn new(image: ImageKind) -> Self {
        Self {
            blocks: BTreeMap::new(),
            sections: Vec::new(),
            image,
            next: 0,
        }
    }

    pub fn image(&self) -> ImageKind {
        self.image
    }

    pub fn add_block(&mut self, kind: BlockType, size: Size, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.next);
        self.next += 1;

        let block = Block::new(id, kind, size, name.into());
        assert!(self.blocks.insert(id, block).is_none());
        id
    }

    /// Remove a block. Fails if anything still refers to it.
    pub fn remove_block(&mut self, id: BlockId) -> Result<Block> {
        let referrers = self.referrers(id);
        if !referrers.is_empty() {
            error!("cannot remove {id:?}, it is still referred to by {referrers:?}");
            return Err(Error::BlockInUse(id));
        }

        self.blocks.remove(&id).ok_or_else(|| {
            error!("cannot remove {id:?}, no such block");
            Error::UnknownBlock(id)
        })
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    pub fn block(&self, id: BlockId) -> Result<&Block> {
        self.blocks.get(&id).ok_or(Error::UnknownBlock(id))
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        self.blocks.get_mut(&id).ok_or(Error::UnknownBlock(id))
    }

    /// Block ids in ascending order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys().copied()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn find_block(&self, section: Option<SectionId>, name: &str) -> Option<BlockId> {
        self.blocks
            .values()
            .find(|block| block.section == section && block.name == name)
            .map(|block| block.id)
    }

    /// Every `(referrer, offset)` that holds a reference to `id`.
    pub fn referrers(&self, id: BlockId) -> Vec<(BlockId, Offset)> {
        self.blocks
            .values()
            .flat_map(|block| {
                block
                    .references
                    .iter()
                    .filter(move |(_, reference)| reference.referenced == id)
                    .map(move |(offset, _)| (block.id, *offset))
            })
            .collect()
    }

    pub fn add_section(&mut self, name: impl Into<String>, characteristics: u32) -> SectionId {
        let id = SectionId(self.sections.len());
        self.sections.push(Section {
            id,
            name: name.into(),
            characteristics,
        });
        id
    }

    pub fn find_section(&self, name: &str) -> Option<SectionId> {
        self.sections
            .iter()
            .find(|section| section.name == name)
            .map(|section| section.id)
    }

    pub fn find_or_add_section(&mut self, name: &str, characteristics: u32) -> SectionId {
        match self.find_section(name) {
            Some(id) => id,
            None => self.add_section(name, characteristics),
        }
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(id.0)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The module entry point, as referenced from the header block.
    pub fn entry_point(&self, header: BlockId) -> Result<Option<Reference>> {
        let header = self.block(header)?;
        Ok(header.references.get(&ENTRY_POINT_OFFSET).copied())
    }

    pub fn set_entry_point(&mut self, header: BlockId, reference: Reference) -> Result<()> {
        self.block(reference.referenced)?;
        self.block_mut(header)?
            .set_reference(ENTRY_POINT_OFFSET, reference)
            .map(|_| ())
    }
}
