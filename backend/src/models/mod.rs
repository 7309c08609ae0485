//! Domain types shared by the catalog, reconciler, repositories and feed.

pub mod layer;
pub mod view;
pub mod window;

pub use layer::MappedLayer;
pub use view::{ParsedView, TimeMode, ViewId, ViewRecord};
pub use window::{ordered_pair, PinningWindow, TimeRange};
