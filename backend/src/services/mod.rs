//! Service layer: maintenance orchestration and its task state.

pub mod pinning;
pub mod schedule;
pub mod task_state;

pub use pinning::{MappingSource, PinningError, PinningService};
pub use schedule::spawn_periodic;
pub use task_state::{RunSummary, TaskKind, TaskState, TaskStatus, TaskTracker};
