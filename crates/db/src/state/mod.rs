pub mod backend;
pub mod memory;
pub mod pg_backend;

pub use backend::StateBackend;
pub use memory::MemoryStateBackend;
pub use pg_backend::PgStateBackend;
