//! The opaque per-request context supplied by the caller, and its release.
use std::fmt;

/// Function that takes back ownership of a request context once its request is finished with.
pub type ReleaseFn<C> = Box<dyn FnOnce(C) + Send + 'static>;

/// Caller-supplied value that travels with a pending request and is handed to whichever response
/// callback runs.
///
/// The context is released exactly once, when this wrapper is dropped: after the callback ran, on
/// cancellation, on drain, or when a built request is discarded without ever being sent.  If a
/// release function was given it receives the value; otherwise the value is simply dropped and a
/// warning is logged, because the caller presumably expected to be told.
pub struct RequestContext<C> {
    /// Always `Some` until dropped
    value: Option<C>,
    release: Option<ReleaseFn<C>>,
}

impl<C> RequestContext<C> {
    /// Wrap a context together with the function that releases it.
    pub fn new(value: C, release: impl FnOnce(C) + Send + 'static) -> Self {
        Self {
            value: Some(value),
            release: Some(Box::new(release)),
        }
    }

    /// Wrap a context that has no release function.
    pub fn without_release(value: C) -> Self {
        tracing::warn!(
            context = std::any::type_name::<C>(),
            "No release function was given for the request context; it will be dropped without one"
        );
        Self {
            value: Some(value),
            release: None,
        }
    }

    pub fn has_release(&self) -> bool {
        self.release.is_some()
    }

    pub fn get(&self) -> &C {
        match self.value.as_ref() {
            Some(value) => value,
            None => unreachable!("request context value is only taken on drop"),
        }
    }

    pub fn get_mut(&mut self) -> &mut C {
        match self.value.as_mut() {
            Some(value) => value,
            None => unreachable!("request context value is only taken on drop"),
        }
    }
}

impl RequestContext<()> {
    /// A context carrying nothing, and so with nothing to release.
    pub fn empty() -> Self {
        Self::new((), |()| {})
    }
}

impl<C> Drop for RequestContext<C> {
    fn drop(&mut self) {
        match (self.value.take(), self.release.take()) {
            (Some(value), Some(release)) => release(value),
            (Some(value), None) => {
                tracing::warn!(
                    context = std::any::type_name::<C>(),
                    "Request context has no release function; dropping it"
                );
                drop(value);
            }
            (None, _) => {}
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for RequestContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("value", &self.value)
            .field("has_release", &self.release.is_some())
            .finish()
    }
}
