pub mod error;
pub mod memory;
pub mod model;
pub mod repo;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use model::{Job, JobStatus, NewJob};
pub use repo::JobsRepo;
pub use store::JobStore;
