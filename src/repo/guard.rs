use futures::future::BoxFuture;
use log::{debug, trace, warn};

use super::{Connection, DataSource};
use crate::error::{Error, Result};

/// Acquires a connection from `source`, runs `op` with it and releases it.
///
/// The connection is closed exactly once whatever the outcome of `op`. If the
/// connection cannot be acquired `op` is never invoked. Errors returned by `op`
/// are propagated unchanged after the release; if the release fails as well
/// both errors are reported, the operation error first.
///
/// When the returned future is dropped before completion, or `op` panics, the
/// connection is released in the background on the current tokio runtime.
///
/// ```ignore
/// let rows = with_connection(&source, |cx| {
///     Box::pin(async move { Ok(cx.execute(&query).await?) })
/// })
/// .await?;
/// ```
pub async fn with_connection<S, T, F>(source: &S, op: F) -> Result<T>
where
    S: DataSource,
    F: for<'c> FnOnce(&'c mut S::Cx) -> BoxFuture<'c, Result<T>>,
{
    let mut scope = Scope {
        cx: None,
        name: source.name(),
    };
    let cx = scope.cx.insert(source.connect().await?);
    debug!("opened connection to `{}`", source.name());

    let result = op(cx).await;
    let released = match scope.cx.take() {
        Some(cx) => cx.close().await,
        None => Ok(()),
    };

    match (result, released) {
        (Ok(value), Ok(())) => {
            debug!("closed connection to `{}`", source.name());
            Ok(value)
        }
        (Ok(_), Err(release)) => Err(release.into()),
        (Err(err), Ok(())) => {
            debug!(
                "closed connection to `{}` after failure: {}",
                source.name(),
                err
            );
            Err(err)
        }
        (Err(err), Err(release)) => {
            warn!(
                "unable to release connection to `{}` after failure: {}",
                source.name(),
                release
            );
            Err(Error::ReleaseAfterFailure {
                original: Box::new(err),
                release,
            })
        }
    }
}

/// Connection lent to a guarded operation.
struct Scope<'s, C: Connection> {
    cx: Option<C>,
    name: &'s str,
}

impl<C: Connection> Drop for Scope<'_, C> {
    fn drop(&mut self) {
        if let Some(cx) = self.cx.take() {
            release_in_background(cx, self.name);
        }
    }
}

/// Spawns the release of `cx` on the current tokio runtime.
///
/// Outside of a runtime the connection is dropped without a release.
pub(crate) fn release_in_background<C: Connection>(cx: C, name: &str) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            trace!("releasing abandoned connection to `{}`", name);
            let name = name.to_owned();
            handle.spawn(async move {
                if let Err(e) = cx.close().await {
                    warn!("unable to release abandoned connection to `{}`: {}", name, e);
                }
            });
        }
        Err(_) => {
            warn!(
                "connection to `{}` dropped outside of a runtime without release",
                name
            );
        }
    }
}
