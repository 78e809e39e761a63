//! Slow-operation warnings

use crate::{events::LifecycleWarning, events::Notifier, runtime::sleep};
use futures::future::{Either, select};
use std::future::Future;
use std::pin::pin;
use std::time::Duration;
use unit_registry::Operation;

/// Await `work`, emitting one warning if it outlives `threshold`
///
/// The operation is never abandoned: after the warning it is awaited until
/// it settles on its own.
pub(crate) async fn reasonable_time<F>(
    notifier: &Notifier,
    unit: &str,
    operation: Operation,
    threshold: Duration,
    work: F,
) -> F::Output
where
    F: Future,
{
    let work = pin!(work);
    let timer = pin!(sleep(threshold));

    match select(work, timer).await {
        Either::Left((output, _)) => output,
        Either::Right(((), work)) => {
            notifier.warn(&LifecycleWarning::new(unit, operation, threshold));
            work.await
        }
    }
}
