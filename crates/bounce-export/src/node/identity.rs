//! Pass-through fan-out point.

use super::Stage;
use crate::error::Result;
use crate::graph::Outlet;
use bounce_core::ProcessContext;

/// Forwards every context unchanged to all consumers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Stage for Identity {
    fn process(&mut self, ctx: ProcessContext<'_>, out: &mut Outlet<'_>) -> Result<()> {
        out.emit(ctx)
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}
