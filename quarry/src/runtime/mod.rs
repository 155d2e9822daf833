/// Graceful shutdown signaling shared by workers and retry timers.
pub mod shutdown;
/// Worker loop executing queued jobs.
pub(crate) mod worker;

pub use shutdown::ShutdownToken;
pub(crate) use worker::worker_loop;
