//! Context assembly for generation requests.
//!
//! | Piece | Source | Rule |
//! |-------|--------|------|
//! | Directive | [`crate::prompt`] | Always first, never pruned |
//! | History | Session conversation | [`PrunePolicy`] |
//! | Tool declarations | `ToolRegistry::describe` | Always sent |

pub mod pruner;
pub mod token;

pub use pruner::{ContextPruner, PrunePolicy, prune};
