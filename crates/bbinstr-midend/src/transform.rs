//! Transform traits and the drivers that run them over a block graph.

use log::{debug, error, trace};

use bbinstr_backend::build;
use bbinstr_common::{BasicBlockSubGraph, BlockGraph, BlockId};
use bbinstr_frontend::decompose;

use crate::{Error, Result};

/// A transform applied once to a whole block graph.
pub trait BlockGraphTransform {
    fn name(&self) -> &'static str;

    fn apply(&mut self, graph: &mut BlockGraph, header: BlockId) -> Result<()>;
}

/// A transform that visits every block of a graph, with a setup and a finishing phase around the
/// visit.
pub trait IterativeTransform {
    fn pre_block_graph_iteration(
        &mut self,
        _graph: &mut BlockGraph,
        _header: BlockId,
    ) -> Result<()> {
        Ok(())
    }

    fn on_block(&mut self, graph: &mut BlockGraph, block: BlockId) -> Result<()>;

    fn post_block_graph_iteration(
        &mut self,
        _graph: &mut BlockGraph,
        _header: BlockId,
    ) -> Result<()> {
        Ok(())
    }
}

/// A transform over the basic blocks of a single code block.
pub trait BasicBlockSubGraphTransform {
    fn name(&self) -> &'static str;

    fn transform_subgraph(
        &mut self,
        graph: &mut BlockGraph,
        subgraph: &mut BasicBlockSubGraph,
    ) -> Result<()>;
}

pub fn apply_block_graph_transform<T>(
    transform: &mut T,
    graph: &mut BlockGraph,
    header: BlockId,
) -> Result<()>
where
    T: BlockGraphTransform + ?Sized,
{
    if !graph.contains(header) {
        error!("cannot apply {} without a header block", transform.name());
        return Err(Error::MissingHeader(header));
    }

    debug!("applying {}", transform.name());

    transform.apply(graph, header).map_err(|e| {
        error!("{} failed: {e}", transform.name());
        e
    })
}

/// Run the three phases of an iterative transform. Only blocks that exist once the setup phase is
/// done get visited; blocks added while visiting are not.
pub fn iterate_block_graph<T>(
    transform: &mut T,
    graph: &mut BlockGraph,
    header: BlockId,
) -> Result<()>
where
    T: IterativeTransform + ?Sized,
{
    transform.pre_block_graph_iteration(graph, header)?;

    let ids: Vec<_> = graph.block_ids().collect();
    trace!("visiting {} blocks", ids.len());

    for id in ids {
        if graph.contains(id) {
            transform.on_block(graph, id)?;
        }
    }

    transform.post_block_graph_iteration(graph, header)
}

/// Decompose a code block, transform its basic blocks and write the result back in its place.
pub fn apply_basic_block_subgraph_transform<T>(
    transform: &mut T,
    graph: &mut BlockGraph,
    block: BlockId,
) -> Result<()>
where
    T: BasicBlockSubGraphTransform + ?Sized,
{
    let mut subgraph = decompose(graph.block(block)?).map_err(|e| {
        error!("unable to decompose block {block:?}: {e}");
        e
    })?;

    transform.transform_subgraph(graph, &mut subgraph)?;

    build(graph, &subgraph).map_err(|e| {
        error!("unable to rebuild `{}` after {}: {e}", subgraph.name, transform.name());
        e
    })?;

    Ok(())
}
