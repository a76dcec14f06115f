// Core engine: position state, risk rules, grid ladder and loops

pub mod grid;
pub mod monitor;
pub mod position;
pub mod risk;
pub mod store;
pub mod sync;

pub use grid::{GridAction, GridEngine};
pub use monitor::PositionMonitorLoop;
pub use position::{GridLevel, GridStatus, Position};
pub use store::{PositionStore, SellOutcome, Snapshot};
pub use sync::PersistenceSyncJob;
