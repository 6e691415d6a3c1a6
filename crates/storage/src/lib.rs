pub mod error;
pub mod jsonl;
pub mod memory;
pub mod store;
pub mod writer;

pub use error::StorageError;
pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
pub use store::DocumentStore;
pub use writer::{PersistOutcome, RecordWriter, WriteStatus};
