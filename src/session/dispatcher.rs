//! Consumer of decoded payloads.
//!
//! The receive loop calls [`Dispatcher::dispatch`] once per frame (framing
//! mode) or once per read (raw mode) and awaits it before touching the
//! buffer again. The payload slice points into a session buffer that is
//! reused by the next read, so copy anything that must outlive the call.
//!
//! # Example
//!
//! ```
//! use framewire::session::{BoxFuture, Dispatcher, SessionHandle};
//!
//! struct Echo;
//!
//! impl Dispatcher for Echo {
//!     fn dispatch<'a>(&'a self, session: &'a SessionHandle, payload: &'a [u8]) -> BoxFuture<'a, ()> {
//!         Box::pin(async move {
//!             if let Err(e) = session.send(payload).await {
//!                 tracing::warn!("echo failed: {}", e);
//!             }
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use super::SessionHandle;

/// Boxed future returned by dispatchers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Application hook invoked with every decoded unit.
pub trait Dispatcher: Send + Sync + 'static {
    /// Handle one payload received on `session`.
    fn dispatch<'a>(&'a self, session: &'a SessionHandle, payload: &'a [u8])
        -> BoxFuture<'a, ()>;
}

/// Dispatcher backed by a synchronous closure.
pub struct FnDispatcher<F> {
    f: F,
}

impl<F> Dispatcher for FnDispatcher<F>
where
    F: Fn(&SessionHandle, &[u8]) + Send + Sync + 'static,
{
    fn dispatch<'a>(
        &'a self,
        session: &'a SessionHandle,
        payload: &'a [u8],
    ) -> BoxFuture<'a, ()> {
        (self.f)(session, payload);
        Box::pin(std::future::ready(()))
    }
}

/// Wrap a closure that handles payloads without awaiting.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use framewire::session::dispatch_fn;
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let dispatcher = dispatch_fn(move |_session, payload| {
///     sink.lock().unwrap().push(payload.to_vec());
/// });
/// # let _ = dispatcher;
/// ```
pub fn dispatch_fn<F>(f: F) -> FnDispatcher<F>
where
    F: Fn(&SessionHandle, &[u8]) + Send + Sync + 'static,
{
    FnDispatcher { f }
}
