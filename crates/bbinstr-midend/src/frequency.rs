//! Static storage for per-basic-block execution counters.
//!
//! The storage is a descriptor block the runtime agent finds through the instrumentation, and a
//! buffer of counters the descriptor points to. The descriptor is laid out as
//!
//! | offset | field |
//! |---|---|
//! | 0 | agent id |
//! | 4 | version |
//! | 8 | pointer to the counter buffer |
//! | 12 | number of counters |
//! | 16 | size of a counter |
//! | 20 | set by the agent once initialized |

use log::{debug, error};

use bbinstr_common::{BlockGraph, BlockId, BlockType, Offset, Reference, Size};

use crate::transform::BlockGraphTransform;
use crate::{Error, Result};

pub const FREQUENCY_SECTION: &str = ".bbfreq";

/// Initialized data, readable and writable.
const FREQUENCY_CHARACTERISTICS: u32 = 0xc000_0040;

pub const FREQUENCY_DATA_VERSION: u32 = 1;

const DESCRIPTOR_SIZE: Size = 24;
const AGENT_ID_OFFSET: Offset = 0;
const VERSION_OFFSET: Offset = 4;
const BUFFER_OFFSET: Offset = 8;
const COUNT_OFFSET: Offset = 12;
const ELEMENT_SIZE_OFFSET: Offset = 16;

/// A transform that puts counter storage into a graph, and can size it afterwards.
pub trait CounterStorage: BlockGraphTransform {
    /// Make room for `count` counters of `element_size` bytes each. Only valid after the
    /// transform has been applied.
    fn allocate_buffer(
        &mut self,
        graph: &mut BlockGraph,
        count: usize,
        element_size: Size,
    ) -> Result<()>;

    /// The block instrumented code hands to the runtime, once applied.
    fn data_block(&self) -> Option<BlockId>;
}

#[derive(Debug)]
pub struct AddFrequencyDataTransform {
    agent_id: u32,
    descriptor: Option<BlockId>,
    buffer: Option<BlockId>,
}

impl AddFrequencyDataTransform {
    pub const NAME: &'static str = "AddFrequencyDataTransform";

    pub fn new(agent_id: u32) -> Self {
        Self {
            agent_id,
            descriptor: None,
            buffer: None,
        }
    }

    pub fn agent_id(&self) -> u32 {
        self.agent_id
    }

    pub fn frequency_data_block(&self) -> Option<BlockId> {
        self.descriptor
    }

    pub fn buffer_block(&self) -> Option<BlockId> {
        self.buffer
    }
}

impl BlockGraphTransform for AddFrequencyDataTransform {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&mut self, graph: &mut BlockGraph, _header: BlockId) -> Result<()> {
        let section = graph.find_or_add_section(FREQUENCY_SECTION, FREQUENCY_CHARACTERISTICS);
        let id = graph.add_block(BlockType::Data, DESCRIPTOR_SIZE, "BasicBlockFrequencyData");

        let descriptor = graph.block_mut(id)?;
        descriptor.section = Some(section);
        descriptor.alignment = 4;
        descriptor.write(AGENT_ID_OFFSET, &self.agent_id.to_le_bytes())?;
        descriptor.write(VERSION_OFFSET, &FREQUENCY_DATA_VERSION.to_le_bytes())?;

        debug!("added frequency data for agent {:#010x}", self.agent_id);

        self.descriptor = Some(id);
        self.buffer = None;
        Ok(())
    }
}

impl CounterStorage for AddFrequencyDataTransform {
    fn allocate_buffer(
        &mut self,
        graph: &mut BlockGraph,
        count: usize,
        element_size: Size,
    ) -> Result<()> {
        let Some(descriptor) = self.descriptor else {
            error!("frequency data has to be added before its buffer is allocated");
            return Err(Error::NotApplied(Self::NAME));
        };

        if self.buffer.is_some() {
            error!("frequency data buffer is already allocated");
            return Err(Error::AlreadyAllocated);
        }

        let sized = u32::try_from(count)
            .ok()
            .filter(|count| *count > 0 && matches!(element_size, 1 | 2 | 4))
            .and_then(|count| Some((count, count.checked_mul(element_size)?)));

        let Some((count32, total)) = sized else {
            error!("cannot allocate {count} counters of {element_size} bytes");
            return Err(Error::InvalidBufferSize {
                count,
                element_size,
            });
        };

        if !graph.contains(descriptor) {
            error!("frequency data block {descriptor:?} has disappeared");
            return Err(Error::MissingFrequencyData);
        }

        let buffer = graph.add_block(BlockType::Data, total, "BasicBlockFrequencyBuffer");
        let section = graph.block(descriptor)?.section;
        {
            let block = graph.block_mut(buffer)?;
            block.section = section;
            block.alignment = 4;
        }

        let block = graph.block_mut(descriptor)?;
        block.set_reference(BUFFER_OFFSET, Reference::absolute(buffer, 0))?;
        block.write(COUNT_OFFSET, &count32.to_le_bytes())?;
        block.write(ELEMENT_SIZE_OFFSET, &element_size.to_le_bytes())?;

        debug!("allocated {count} counters of {element_size} bytes");

        self.buffer = Some(buffer);
        Ok(())
    }

    fn data_block(&self) -> Option<BlockId> {
        self.descriptor
    }
}
