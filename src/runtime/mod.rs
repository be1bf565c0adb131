//! Runtime adapters and the submission API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{
    submit, submit_and_wait, submit_and_wait_blocking, submit_default, wait_all, wait_all_blocking,
};
pub use tokio_spawner::{OwnedRuntime, TokioSpawner};
