pub mod channel;
pub mod event;
pub mod pipeline;
pub mod publisher;

pub use channel::{partition_for, Delivery, EventChannel, MemoryEventChannel, SqliteEventLog};
pub use event::ClassificationEvent;
pub use pipeline::{Disposition, IngestPipeline, PartitionSummary};
pub use publisher::{publish_event, PublishReceipt};
