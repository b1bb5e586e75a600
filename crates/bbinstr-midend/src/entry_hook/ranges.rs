use bbinstr_common::range::first_overlap;
use bbinstr_common::RelativeAddressRange;

/// The address ranges picked up while instrumenting a module.
///
/// A basic block's identifier is the index of its range in [`basic_blocks`](Self::basic_blocks),
/// so that sequence stays in the order blocks were instrumented in.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstrumentedRanges {
    basic_blocks: Vec<RelativeAddressRange>,
    conditionals: Vec<RelativeAddressRange>,
}

impl InstrumentedRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// The identifier the next basic block will get.
    pub fn next_id(&self) -> usize {
        self.basic_blocks.len()
    }

    /// Record a basic block, returning its identifier.
    pub fn push_basic_block(&mut self, range: RelativeAddressRange) -> usize {
        self.basic_blocks.push(range);
        self.basic_blocks.len() - 1
    }

    pub fn push_conditional(&mut self, range: RelativeAddressRange) {
        self.conditionals.push(range);
    }

    pub fn basic_blocks(&self) -> &[RelativeAddressRange] {
        &self.basic_blocks
    }

    pub fn conditionals(&self) -> &[RelativeAddressRange] {
        &self.conditionals
    }

    pub fn len(&self) -> usize {
        self.basic_blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.basic_blocks.is_empty()
    }

    pub fn sort_conditionals(&mut self) {
        self.conditionals.sort();
    }

    /// Panic if two basic blocks or two conditionals overlap. Either means the decomposition or
    /// the instrumentation is broken. The conditionals must already be sorted.
    pub fn verify(&self) {
        let mut sorted = self.basic_blocks.clone();
        sorted.sort();

        if let Some(at) = first_overlap(&sorted) {
            panic!(
                "basic-block ranges overlap: {:?} and {:?}",
                sorted[at],
                sorted[at + 1]
            );
        }

        if let Some(at) = first_overlap(&self.conditionals) {
            panic!(
                "conditional ranges overlap: {:?} and {:?}",
                self.conditionals[at],
                self.conditionals[at + 1]
            );
        }
    }
}
