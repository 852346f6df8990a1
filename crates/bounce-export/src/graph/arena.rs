//! Node storage for the export graph.
//!
//! Every stage lives in one arena owned by the orchestrator and is addressed
//! by [`NodeId`]. Downstream edges are plain id lists. Pushing a context into
//! a node temporarily takes the stage out of its slot, so the stage can push
//! further into the arena through its [`Outlet`] without aliasing itself.

use crate::error::{ExportError, Result};
use crate::node::Stage;
use bounce_core::ProcessContext;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Slot {
    stage: Option<Box<dyn Stage>>,
    name: &'static str,
    outputs: Vec<NodeId>,
}

#[derive(Default)]
pub struct NodeArena {
    slots: Vec<Slot>,
}

impl fmt::Debug for NodeArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for (i, slot) in self.slots.iter().enumerate() {
            list.entry(&(i, slot.name, &slot.outputs));
        }
        list.finish()
    }
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: impl Stage + 'static) -> NodeId {
        self.insert_boxed(Box::new(stage))
    }

    pub fn insert_boxed(&mut self, stage: Box<dyn Stage>) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            name: stage.name(),
            stage: Some(stage),
            outputs: Vec::new(),
        });
        id
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.0)
            .ok_or_else(|| ExportError::Context(format!("unknown node {id}")))
    }

    /// Add a downstream edge. Emission follows connection order.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if to.0 >= self.slots.len() {
            return Err(ExportError::Context(format!("unknown node {to}")));
        }
        if from == to {
            return Err(ExportError::Context(format!("node {from} connected to itself")));
        }
        self.slot_mut(from)?.outputs.push(to);
        Ok(())
    }

    /// Swap the stage in a slot, keeping its edges.
    pub fn replace(&mut self, id: NodeId, stage: Box<dyn Stage>) -> Result<Box<dyn Stage>> {
        let slot = self.slot_mut(id)?;
        slot.name = stage.name();
        slot.stage
            .replace(stage)
            .ok_or_else(|| ExportError::Context(format!("node {id} is running")))
    }

    pub fn outputs(&self, id: NodeId) -> &[NodeId] {
        self.slots.get(id.0).map(|s| s.outputs.as_slice()).unwrap_or(&[])
    }

    pub fn name(&self, id: NodeId) -> Option<&'static str> {
        self.slots.get(id.0).map(|s| s.name)
    }

    /// Number of nodes whose stage reports `name`.
    pub fn count(&self, name: &str) -> usize {
        self.slots.iter().filter(|s| s.name == name).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every stage. Stages release files and threads in their `Drop`.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Run one context through `id` and everything below it.
    pub fn push(&mut self, id: NodeId, ctx: ProcessContext<'_>) -> Result<()> {
        let slot = self.slot_mut(id)?;
        let mut stage = slot
            .stage
            .take()
            .ok_or_else(|| ExportError::Context(format!("node {id} re-entered")))?;
        let outputs = std::mem::take(&mut slot.outputs);

        let result = stage.process(
            ctx,
            &mut Outlet {
                arena: Some(self),
                outputs: &outputs,
            },
        );

        let slot = &mut self.slots[id.0];
        slot.stage = Some(stage);
        slot.outputs = outputs;
        result
    }
}

/// A stage's view of its downstream consumers.
pub struct Outlet<'a> {
    arena: Option<&'a mut NodeArena>,
    outputs: &'a [NodeId],
}

impl Outlet<'static> {
    /// Outlet with no consumers; emitted contexts are dropped.
    pub fn detached() -> Self {
        Outlet {
            arena: None,
            outputs: &[],
        }
    }
}

impl Outlet<'_> {
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Deliver to every consumer in order.
    ///
    /// A single consumer receives the context as is, so it may work in
    /// place. Several consumers each get a shared view.
    pub fn emit(&mut self, ctx: ProcessContext<'_>) -> Result<()> {
        let Some(arena) = self.arena.as_deref_mut() else {
            return Ok(());
        };
        match self.outputs {
            [] => Ok(()),
            [only] => arena.push(*only, ctx),
            many => {
                for id in many {
                    arena.push(*id, ctx.as_const())?;
                }
                Ok(())
            }
        }
    }

    /// Deliver to the consumer at `index` only.
    pub fn emit_to(&mut self, index: usize, ctx: ProcessContext<'_>) -> Result<()> {
        let Some(arena) = self.arena.as_deref_mut() else {
            return Ok(());
        };
        match self.outputs.get(index) {
            Some(id) => arena.push(*id, ctx),
            None => Ok(()),
        }
    }
}
