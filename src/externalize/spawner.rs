use std::thread;

use futures::future::BoxFuture;
use tracing::warn;

/// Starts the loop that drains one destination's send queue.
///
/// The loop runs until the externalizer is dropped. Brokers whose futures
/// need a particular runtime (timers, sockets) want a spawner for that
/// runtime.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, destination: &str, task: BoxFuture<'static, ()>);
}

/// Runs each destination loop on its own named thread with a local executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
    fn spawn(&self, destination: &str, task: BoxFuture<'static, ()>) {
        let spawned = thread::Builder::new()
            .name(format!("externalize:{destination}"))
            .spawn(move || futures::executor::block_on(task));

        // the task is dropped with the error, failing its queued handles
        if let Err(err) = spawned {
            warn!(destination, error = %err, "could not start destination worker");
        }
    }
}
