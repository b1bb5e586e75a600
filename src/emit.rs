use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use bbinstr_common::{BlockGraph, RelativeAddress, SectionId, Size};
use bbinstr_midend::InstrumentedRanges;

/// The ranges a run of the instrumentation picked up, as written next to the image.
#[derive(Debug, Serialize)]
pub struct RangeReport {
    pub basic_blocks: Vec<BasicBlockRange>,
    pub conditionals: Vec<Range>,
    pub thunk_section: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BasicBlockRange {
    pub id: usize,
    pub start: RelativeAddress,
    pub size: Size,
}

#[derive(Debug, Serialize)]
pub struct Range {
    pub start: RelativeAddress,
    pub size: Size,
}

impl RangeReport {
    pub fn new(
        graph: &BlockGraph,
        ranges: &InstrumentedRanges,
        thunks: Option<SectionId>,
    ) -> Self {
        let basic_blocks = ranges
            .basic_blocks()
            .iter()
            .enumerate()
            .map(|(id, range)| BasicBlockRange {
                id,
                start: range.start(),
                size: range.size(),
            })
            .collect();

        let conditionals = ranges
            .conditionals()
            .iter()
            .map(|range| Range {
                start: range.start(),
                size: range.size(),
            })
            .collect();

        let thunk_section = thunks
            .and_then(|id| graph.section(id))
            .map(|section| section.name.clone());

        Self {
            basic_blocks,
            conditionals,
            thunk_section,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("unable to create `{}`", path.display()))?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}
