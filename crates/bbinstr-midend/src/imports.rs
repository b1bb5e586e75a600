//! Import patching.
//!
//! Every imported module gets an import address table: a data block in the imports section, named
//! after the module, holding one labelled 4-byte slot per symbol. Code calls an import indirectly
//! through its slot.

use log::{debug, error, trace};

use bbinstr_common::{
    BlockGraph, BlockId, BlockType, Label, LabelAttributes, Offset, Reference, SectionId,
};

use crate::transform::BlockGraphTransform;
use crate::{Error, Result};

pub const IMPORTS_SECTION: &str = ".idata";

/// Initialized data, readable and writable.
const IMPORTS_CHARACTERISTICS: u32 = 0xc000_0040;

const SLOT_SIZE: u32 = 4;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ModuleHandle(usize);

#[derive(Clone, Debug)]
pub struct ImportedModule {
    name: String,
    symbols: Vec<String>,

    /// Table block and slot offsets, once the module has been added to a graph.
    table: Option<(BlockId, Vec<Offset>)>,
}

impl ImportedModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: Vec::new(),
            table: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a symbol to import, returning its index. Adding a symbol twice yields the same index.
    pub fn add_symbol(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        if let Some(index) = self.symbols.iter().position(|symbol| *symbol == name) {
            return index;
        }

        self.symbols.push(name);
        self.table = None;
        self.symbols.len() - 1
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn table(&self) -> Option<BlockId> {
        self.table.as_ref().map(|(block, _)| *block)
    }

    /// A reference to the slot of symbol `index`, suitable as an indirect call target.
    pub fn symbol_reference(&self, index: usize) -> Result<Reference> {
        let Some(symbol) = self.symbols.get(index) else {
            error!("module `{}` has no symbol {index}", self.name);
            return Err(Error::UnknownSymbol {
                module: self.name.clone(),
                index,
            });
        };

        match &self.table {
            Some((block, slots)) => Ok(Reference::absolute(*block, slots[index])),
            None => {
                error!("`{symbol}` has not been imported from `{}`", self.name);
                Err(Error::UnresolvedImport {
                    module: self.name.clone(),
                    symbol: symbol.clone(),
                })
            }
        }
    }

    fn add_to(&mut self, graph: &mut BlockGraph, section: SectionId) -> Result<()> {
        if self.name.is_empty() || self.symbols.iter().any(String::is_empty) {
            error!("refusing to import an unnamed module or symbol");
            return Err(Error::EmptyImportName);
        }

        let block = match graph.find_block(Some(section), &self.name) {
            Some(block) => block,
            None => {
                let block = graph.add_block(BlockType::Data, 0, self.name.clone());
                let table = graph.block_mut(block)?;
                table.section = Some(section);
                table.alignment = SLOT_SIZE;
                block
            }
        };

        let table = graph.block_mut(block)?;
        let mut slots = Vec::with_capacity(self.symbols.len());

        for symbol in self.symbols.iter() {
            let existing = table
                .labels
                .iter()
                .find(|(_, label)| label.name == *symbol)
                .map(|(offset, _)| *offset);

            let slot = match existing {
                Some(slot) => slot,
                None => {
                    let slot = table.append_zeroes(SLOT_SIZE);
                    table.set_label(slot, Label::new(symbol.clone(), LabelAttributes::DATA))?;
                    trace!("imported `{symbol}` from `{}` at slot {slot}", self.name);
                    slot
                }
            };

            slots.push(slot);
        }

        self.table = Some((block, slots));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct AddImportsTransform {
    modules: Vec<ImportedModule>,
}

impl AddImportsTransform {
    pub const NAME: &'static str = "AddImportsTransform";

    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to import from. Adding the same module twice yields the same handle.
    pub fn add_module(&mut self, name: impl Into<String>) -> ModuleHandle {
        let name = name.into();
        if let Some(index) = self.modules.iter().position(|module| module.name == name) {
            return ModuleHandle(index);
        }

        self.modules.push(ImportedModule::new(name));
        ModuleHandle(self.modules.len() - 1)
    }

    pub fn add_symbol(&mut self, module: ModuleHandle, name: impl Into<String>) -> Result<usize> {
        let ModuleHandle(index) = module;
        match self.modules.get_mut(index) {
            Some(module) => Ok(module.add_symbol(name)),
            None => Err(Error::UnknownModule(index)),
        }
    }

    pub fn module(&self, module: ModuleHandle) -> Option<&ImportedModule> {
        self.modules.get(module.0)
    }

    pub fn symbol_reference(&self, module: ModuleHandle, index: usize) -> Result<Reference> {
        match self.module(module) {
            Some(imported) => imported.symbol_reference(index),
            None => {
                error!("no module with handle {}", module.0);
                Err(Error::UnknownModule(module.0))
            }
        }
    }
}

impl BlockGraphTransform for AddImportsTransform {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&mut self, graph: &mut BlockGraph, header: BlockId) -> Result<()> {
        if !graph.contains(header) {
            error!("no header block to import into");
            return Err(Error::MissingHeader(header));
        }

        let section = graph.find_or_add_section(IMPORTS_SECTION, IMPORTS_CHARACTERISTICS);
        for module in self.modules.iter_mut() {
            module.add_to(graph, section)?;
        }

        debug!("imported {} modules", self.modules.len());
        Ok(())
    }
}
