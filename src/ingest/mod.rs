pub mod coordinator;
pub mod deadline;
pub mod event;

pub use coordinator::{BatchCoordinator, BatchReport, RecordOutcome, RecordState};
pub use deadline::{DeadlineFlag, DeadlineGuard};
pub use event::{BatchItemFailure, BatchResponse, StreamEvent};
