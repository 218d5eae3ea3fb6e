mod dead_letter;
mod entity_type;
mod operation;
mod queue_item;
mod sync_error;
mod sync_status;
mod upload;

pub use dead_letter::DeadLetter;
pub use entity_type::EntityType;
pub use operation::Operation;
pub use queue_item::{NewQueueItem, QueueItem};
pub use sync_error::SyncError;
pub use sync_status::SyncStatus;
pub use upload::{PendingUpload, UploadStatus};
