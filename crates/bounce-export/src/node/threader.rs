//! Parallel fan-out of one context to independent branches.

use super::Stage;
use crate::error::{ExportError, Result};
use crate::graph::{NodeArena, NodeId, Outlet};
use bounce_core::ProcessContext;
use rayon::prelude::*;
use rayon::ThreadPool;

/// Anything a [`Threader`] can deliver to.
pub trait Sink: Send {
    fn consume(&mut self, ctx: ProcessContext<'_>) -> Result<()>;
}

impl<F> Sink for F
where
    F: FnMut(ProcessContext<'_>) -> Result<()> + Send,
{
    fn consume(&mut self, ctx: ProcessContext<'_>) -> Result<()> {
        self(ctx)
    }
}

/// A self-contained subgraph driven through its root node.
#[derive(Debug)]
pub struct Pipeline {
    arena: NodeArena,
    root: NodeId,
}

impl Pipeline {
    pub fn new(arena: NodeArena, root: NodeId) -> Self {
        Self { arena, root }
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }
}

impl Sink for Pipeline {
    fn consume(&mut self, ctx: ProcessContext<'_>) -> Result<()> {
        self.arena.push(self.root, ctx)
    }
}

/// Hands each context to every branch on a rayon pool and waits for all of
/// them before returning.
///
/// Branches only ever see a shared view and get no ordering guarantee
/// relative to each other. A failing branch does not stop its siblings;
/// all failures of one call come back as a single [`ExportError::Branches`].
pub struct Threader {
    pool: ThreadPool,
    branches: Vec<Box<dyn Sink>>,
}

impl std::fmt::Debug for Threader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Threader")
            .field("threads", &self.pool.current_num_threads())
            .field("branches", &self.branches.len())
            .finish()
    }
}

impl Threader {
    /// `threads == 0` lets rayon pick.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("bounce-branch-{i}"))
            .build()
            .map_err(|e| ExportError::InvalidConfig(format!("branch pool: {e}")))?;
        Ok(Self {
            pool,
            branches: Vec::new(),
        })
    }

    pub fn add_branch(&mut self, branch: impl Sink + 'static) {
        self.branches.push(Box::new(branch));
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Deliver one context to every branch.
    pub fn deliver(&mut self, ctx: &ProcessContext<'_>) -> Result<()> {
        let total = self.branches.len();
        let branches = &mut self.branches;
        let failures: Vec<(usize, String)> = self.pool.install(|| {
            branches
                .par_iter_mut()
                .enumerate()
                .filter_map(|(i, branch)| {
                    branch.consume(ctx.as_const()).err().map(|e| (i, e.to_string()))
                })
                .collect()
        });

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExportError::Branches { total, failures })
        }
    }
}

impl Stage for Threader {
    fn process(&mut self, ctx: ProcessContext<'_>, _out: &mut Outlet<'_>) -> Result<()> {
        self.deliver(&ctx)
    }

    fn name(&self) -> &'static str {
        "threader"
    }
}
