//! Background-task wrapper around `tile_download_engine`: a correlation-id
//! command/response protocol and a one-task-per-download actor (C13).

pub mod actor;
pub mod protocol;

pub use actor::WorkerActor;
pub use protocol::{DownloadConfigMsg, WorkerCommand, WorkerResponse};
