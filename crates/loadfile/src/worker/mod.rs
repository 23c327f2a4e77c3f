pub mod job;
pub mod pool;

pub use job::RunReport;
pub use pool::WorkerPool;
