use remote_collect_config::TaskDescriptor;
use std::{
    future::Future,
    pin::Pin,
};
use tokio_util::sync::CancellationToken;

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = eyre::Result<Vec<u8>>> + Send + 'a>>;

/// Runs one task on one node and hands back its raw output.
pub trait TaskRunner: Send + Sync {
    /// Must return promptly once `ctx` is cancelled and must remove whatever
    /// it created in `namespace`, whatever the outcome.
    fn run<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        task: &'a TaskDescriptor,
        namespace: &'a str,
        name: &'a str,
        node: &'a str,
    ) -> RunFuture<'a>;
}

/// What a worker reports for its node.
#[derive(Debug)]
pub struct NodeOutcome {
    pub node: String,
    pub result: eyre::Result<Vec<u8>>,
}
