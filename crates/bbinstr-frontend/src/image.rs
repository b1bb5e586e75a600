//! The JSON description of a module image.
//!
//! Blocks and sections are referred to by their index in the description. A block may give its
//! original location either as an `address` (all of its bytes are contiguous from there) or as
//! explicit `source_ranges`.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use bbinstr_common::{
    BlockAttributes, BlockGraph, BlockId, BlockType, Decoded, ImageKind, Label, LabelAttributes,
    Offset, RangePair, Reference, ReferenceKind, RelativeAddress, SectionId, Size, SourceRanges,
};

use crate::{Error, Result};

/// A block graph together with its header block.
#[derive(Clone, Debug)]
pub struct Image {
    pub graph: BlockGraph,
    pub header: BlockId,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImageDescription {
    #[serde(default)]
    pub kind: ImageKind,
    pub header: usize,
    #[serde(default)]
    pub sections: Vec<SectionDescription>,
    pub blocks: Vec<BlockDescription>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SectionDescription {
    pub name: String,
    #[serde(default)]
    pub characteristics: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BlockDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BlockType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<usize>,
    pub size: Size,
    #[serde(default = "default_alignment")]
    pub alignment: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "BlockAttributes::is_empty")]
    pub attributes: BlockAttributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferenceDescription>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<RelativeAddress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ranges: Vec<RangePair>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<Decoded>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReferenceDescription {
    pub offset: Offset,
    pub kind: ReferenceKind,
    pub size: Size,
    pub target: usize,
    #[serde(default)]
    pub target_offset: Offset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Offset>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LabelDescription {
    pub offset: Offset,
    pub name: String,
    #[serde(default)]
    pub attributes: LabelAttributes,
}

fn default_alignment() -> u32 {
    1
}

pub fn parse(text: &str) -> Result<Image> {
    let description: ImageDescription = serde_json::from_str(text)?;
    load(description)
}

pub fn to_json(image: &Image) -> Result<String> {
    Ok(serde_json::to_string_pretty(&describe(image)?)?)
}

/// Build a block graph from its description.
pub fn load(description: ImageDescription) -> Result<Image> {
    let mut graph = BlockGraph::new(description.kind);

    for section in description.sections.iter() {
        graph.add_section(section.name.clone(), section.characteristics);
    }

    let ids: Vec<_> = description
        .blocks
        .iter()
        .map(|block| graph.add_block(block.kind, block.size, block.name.clone()))
        .collect();

    let header = *ids
        .get(description.header)
        .ok_or(Error::UnknownBlock(description.header))?;

    for (id, block) in ids.iter().zip(description.blocks) {
        let section = match block.section {
            Some(index) if index < graph.sections().len() => Some(SectionId(index)),
            Some(index) => return Err(Error::UnknownSection(index)),
            None => None,
        };

        if block.data.len() > block.size as usize {
            return Err(Error::DataTooLarge(block.name));
        }

        let mut source_ranges = match block.address {
            Some(address) => SourceRanges::contiguous(address, block.size),
            None => SourceRanges::new(),
        };

        for pair in block.source_ranges {
            if !source_ranges.push(pair.data, pair.source) {
                return Err(Error::OverlappingSourceRanges(block.name));
            }
        }

        let target = graph.block_mut(*id)?;
        target.section = section;
        target.alignment = block.alignment;
        target.data = block.data;
        target.attributes = block.attributes;
        target.source_ranges = source_ranges;
        target.code = block.instructions;

        for label in block.labels {
            target.set_label(label.offset, Label::new(label.name, label.attributes))?;
        }

        for reference in block.references {
            let referenced = *ids
                .get(reference.target)
                .ok_or(Error::UnknownBlock(reference.target))?;

            let base = reference.base.unwrap_or(reference.target_offset);
            let made = Reference::new(
                reference.kind,
                reference.size,
                referenced,
                reference.target_offset,
                base,
            );

            target.set_reference(reference.offset, made)?;
        }
    }

    debug!(
        "loaded image with {} blocks in {} sections",
        graph.len(),
        graph.sections().len()
    );

    Ok(Image { graph, header })
}

/// Describe a block graph. Block indices are assigned in ascending id order.
pub fn describe(image: &Image) -> Result<ImageDescription> {
    let graph = &image.graph;
    let indices: HashMap<BlockId, usize> = graph
        .block_ids()
        .enumerate()
        .map(|(index, id)| (id, index))
        .collect();

    let sections = graph
        .sections()
        .iter()
        .map(|section| SectionDescription {
            name: section.name.clone(),
            characteristics: section.characteristics,
        })
        .collect();

    let index = |id: BlockId| indices.get(&id).copied().ok_or(Error::UnknownBlock(id.0));

    let mut blocks = Vec::with_capacity(graph.len());
    for block in graph.blocks() {
        let references = block
            .references
            .iter()
            .map(|(offset, reference)| {
                Ok(ReferenceDescription {
                    offset: *offset,
                    kind: reference.kind,
                    size: reference.size,
                    target: index(reference.referenced)?,
                    target_offset: reference.offset,
                    base: (reference.base != reference.offset).then_some(reference.base),
                })
            })
            .collect::<Result<_>>()?;

        blocks.push(BlockDescription {
            name: block.name.clone(),
            kind: block.kind,
            section: block.section.map(|SectionId(index)| index),
            size: block.size,
            alignment: block.alignment,
            data: block.data.clone(),
            attributes: block.attributes,
            references,
            labels: block
                .labels
                .iter()
                .map(|(offset, label)| LabelDescription {
                    offset: *offset,
                    name: label.name.clone(),
                    attributes: label.attributes,
                })
                .collect(),
            address: None,
            source_ranges: block.source_ranges.iter().copied().collect(),
            instructions: block.code.clone(),
        });
    }

    Ok(ImageDescription {
        kind: graph.image(),
        header: index(image.header)?,
        sections,
        blocks,
    })
}
