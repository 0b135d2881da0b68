// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::future::Future;
use std::sync::Arc;

use futures_core::future::BoxFuture;

use crate::RetryContext;

/// A retryable operation with its sync or async flavor erased.
///
/// Synchronous operations run when [`call`][Self::call] is invoked; the returned future is
/// already resolved.
pub(crate) struct Operation<T, E>(Arc<dyn Fn(&RetryContext<E>) -> BoxFuture<'static, Result<T, E>> + Send + Sync>);

impl<T, E> Operation<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn from_sync<F>(operation: F) -> Self
    where
        F: Fn(&RetryContext<E>) -> Result<T, E> + Send + Sync + 'static,
    {
        Self(Arc::new(move |context: &RetryContext<E>| -> BoxFuture<'static, Result<T, E>> {
            Box::pin(std::future::ready(operation(context)))
        }))
    }

    pub(crate) fn from_async<F, Fut>(operation: F) -> Self
    where
        F: Fn(&RetryContext<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self(Arc::new(move |context: &RetryContext<E>| -> BoxFuture<'static, Result<T, E>> {
            Box::pin(operation(context))
        }))
    }

    pub(crate) fn call(&self, context: &RetryContext<E>) -> BoxFuture<'static, Result<T, E>> {
        (self.0)(context)
    }
}

impl<T, E> Clone for Operation<T, E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T, E> std::fmt::Debug for Operation<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation").finish()
    }
}
