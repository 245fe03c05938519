use super::chunking::{ChunkPlan, Window};
use super::progress::JobContext;
use crate::crm::{BatchCall, BatchClient, CallId, CallKind, ChunkResult};
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

/// Dispatch one call per item, window by window, yielding each window's
/// result in worklist order.
///
/// Up to `max_concurrent_chunks` windows are in flight at once. Each window
/// checks the cancellation token before it is sent; once cancelled, the
/// remaining windows come back as [`ChunkResult::Skipped`].
pub(crate) fn dispatch_windows<'a, T, F>(
    client: &'a BatchClient,
    items: &'a [T],
    kind: CallKind,
    method: &'static str,
    params: F,
    context: &'a JobContext,
) -> impl Stream<Item = (Window, ChunkResult)> + Send + 'a
where
    T: Sync,
    F: Fn(&T) -> Value + Send + Sync + 'a,
{
    let config = client.config();
    let plan = ChunkPlan::new(items.len(), config.batch_size);
    let timeout = config.request_timeout;
    let in_flight = config.max_concurrent_chunks.max(1);

    stream::iter(plan.windows())
        .map(move |window| {
            let calls: Vec<BatchCall> = window
                .slice(items)
                .iter()
                .enumerate()
                .map(|(local_index, item)| {
                    BatchCall::new(CallId::new(kind, local_index), method, params(item))
                })
                .collect();

            async move {
                if context.is_cancelled() {
                    return (window, ChunkResult::Skipped);
                }
                let result = client.dispatch_chunk(&calls, false, timeout).await;
                (window, result)
            }
        })
        .buffered(in_flight)
}
