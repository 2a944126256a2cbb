use futures::future::join_all;
use std::future::Future;

/// Maps `f` over `items` in fixed-size concurrent batches, preserving input
/// order in the output. Third-party rate limits are the reason for the cap;
/// error isolation is the caller's job (make `R` a `Result`).
pub async fn process_in_batches<T, R, F, Fut>(items: Vec<T>, limit: usize, mut f: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    let limit = limit.max(1);
    let mut out = Vec::with_capacity(items.len());
    let mut iter = items.into_iter();

    loop {
        let chunk: Vec<T> = iter.by_ref().take(limit).collect();
        if chunk.is_empty() {
            break;
        }
        let futures: Vec<Fut> = chunk.into_iter().map(&mut f).collect();
        out.extend(join_all(futures).await);
    }

    out
}
