//! Runs drivers concurrently on tokio tasks.

use async_trait::async_trait;
use common_error::{QuarryError, QuarryResult};
use common_runtime::JoinSet;
use log::debug;

use super::context::CancellationHandle;
use super::driver::Driver;

/// External scheduler for a set of drivers.
#[async_trait]
pub trait DriverRunner: Send + Sync {
    /// Run every driver to completion. The first failure cancels the
    /// remaining drivers and is returned once they have all stopped.
    async fn run(&self, drivers: Vec<Driver>) -> QuarryResult<()>;
}

/// Runs each driver on its own task of the current runtime.
///
/// Drivers should be built with contexts subscribed to `cancel`, so a
/// failing driver can stop its siblings.
#[derive(Debug, Clone, Default)]
pub struct LocalDriverRunner {
    cancel: CancellationHandle,
}

impl LocalDriverRunner {
    pub fn new(cancel: CancellationHandle) -> Self {
        Self { cancel }
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancel
    }
}

#[async_trait]
impl DriverRunner for LocalDriverRunner {
    async fn run(&self, drivers: Vec<Driver>) -> QuarryResult<()> {
        debug!("running {} drivers", drivers.len());
        let mut tasks = JoinSet::new();
        for driver in drivers {
            tasks.spawn(driver.drive());
        }

        let mut first_error: Option<QuarryError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.and_then(|result| result);
            if let Err(e) = outcome {
                if first_error.is_none() {
                    debug!("driver failed, cancelling siblings: {e}");
                    self.cancel.cancel();
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
