use std::fs;

use anyhow::Context;
use console::style;
use log::{debug, warn};

use bbinstr_backend::pretty_subgraph;
use bbinstr_common::BlockGraph;
use bbinstr_frontend::{decompose, is_decomposable, to_json};
use bbinstr_midend::{apply_block_graph_transform, BasicBlockEntryHookTransform};

use crate::args::{InstrumentOptions, Options};
use crate::emit::{write_file, RangeReport};
use crate::input::read_image;

/// Instrument an image and write the result. Nothing is left on disk unless the whole pass
/// succeeds.
pub fn instrument(options: &InstrumentOptions) -> anyhow::Result<()> {
    let path = &options.input.path;
    let mut image = read_image(path)?;

    let mut transform = BasicBlockEntryHookTransform::new()
        .with_src_ranges_for_thunks(options.thunk_source_ranges)
        .with_verification(options.verify || cfg!(debug_assertions));

    apply_block_graph_transform(&mut transform, &mut image.graph, image.header)
        .with_context(|| format!("unable to instrument `{}`", path.display()))?;

    let listing = if options.listing {
        Some(listing(&image.graph)?)
    } else {
        None
    };

    let report = RangeReport::new(&image.graph, transform.ranges(), transform.thunk_section());
    let ranges = match &options.ranges {
        Some(ranges) => Some((ranges, report.to_json()?)),
        None => None,
    };

    let output = options.output();
    let json = to_json(&image)?;

    write_file(&output, &json)?;
    debug!("wrote the instrumented image to `{}`", output.display());

    if let Some((path, json)) = ranges {
        if let Err(e) = write_file(path, &json) {
            if let Err(removal) = fs::remove_file(&output) {
                warn!("unable to remove `{}`: {removal}", output.display());
            }

            return Err(e);
        }

        debug!("wrote the ranges to `{}`", path.display());
    }

    if let Some(listing) = listing {
        print!("{listing}");
    }

    println!(
        "{} {} basic blocks ({} conditionals) into `{}`",
        style("instrumented").green().bold(),
        report.basic_blocks.len(),
        report.conditionals.len(),
        output.display(),
    );

    Ok(())
}

pub fn dump(options: &Options) -> anyhow::Result<()> {
    let image = read_image(&options.path)?;
    print!("{}", listing(&image.graph)?);
    Ok(())
}

/// The listing of every code block that can be split into basic blocks.
pub fn listing(graph: &BlockGraph) -> anyhow::Result<String> {
    let mut result = String::new();

    for block in graph.blocks() {
        if !block.is_code() || !is_decomposable(block) {
            continue;
        }

        let subgraph = decompose(block)
            .with_context(|| format!("unable to decompose `{}`", block.name))?;

        result.push_str(&pretty_subgraph(graph, &subgraph));
        result.push('\n');
    }

    Ok(result)
}
