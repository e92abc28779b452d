// pubsub.rs — Typed publisher/subscriber pair bound to one key and codec.
//
// A Publisher encodes values and puts them on its key. A Subscriber decodes
// every sample and hands it to the user callback. Failures on the receiving
// side (undecodable bytes, a panicking callback) are logged and dropped: one
// bad message or handler never stops delivery to anyone else.

use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use zrc_codec::Codec;
use zrc_transport::{Subscription, Transport};

use crate::error::{panic_message, ZrcError};

/// Publishes values of type `T` on one key.
pub struct Publisher<T: ?Sized> {
    key: String,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Serialize + ?Sized> Publisher<T> {
    pub(crate) fn new(
        key: impl Into<String>,
        codec: Arc<dyn Codec>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            key: key.into(),
            codec,
            transport,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode `value` and put it on the bound key.
    pub fn publish(&self, value: &T) -> Result<(), ZrcError> {
        let bytes = zrc_codec::to_bytes(self.codec.as_ref(), value)?;
        self.transport.put(&self.key, bytes)?;
        tracing::trace!(key = %self.key, "published");
        Ok(())
    }
}

impl<T: ?Sized> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("key", &self.key)
            .field("codec", &self.codec.kind())
            .finish()
    }
}

/// An active subscription delivering decoded values to a callback.
///
/// Released by [`undeclare`](Subscriber::undeclare) or when dropped.
pub struct Subscriber {
    subscription: Subscription,
}

impl Subscriber {
    pub(crate) fn declare<T, F>(
        transport: &dyn Transport,
        key_expr: &str,
        codec: Arc<dyn Codec>,
        callback: F,
    ) -> Result<Self, ZrcError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::declare_keyed(transport, key_expr, codec, move |_key: &str, value: T| {
            callback(value)
        })
    }

    /// Like [`declare`](Subscriber::declare), but the callback also receives
    /// the concrete key each sample was put on.
    pub(crate) fn declare_keyed<T, F>(
        transport: &dyn Transport,
        key_expr: &str,
        codec: Arc<dyn Codec>,
        callback: F,
    ) -> Result<Self, ZrcError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(&str, T) + Send + Sync + 'static,
    {
        let key = key_expr.to_string();
        let subscription = transport.subscribe(
            key_expr,
            Box::new(move |sample| {
                let value: T = match zrc_codec::from_bytes(codec.as_ref(), &sample.payload) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(key = %sample.key, error = %e, "dropping undecodable message");
                        return;
                    }
                };
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| callback(&sample.key, value)));
                if let Err(payload) = outcome {
                    tracing::error!(
                        key = %key,
                        error = %panic_message(payload.as_ref()),
                        "subscriber callback panicked"
                    );
                }
            }),
        )?;
        Ok(Self { subscription })
    }

    pub fn key_expr(&self) -> &str {
        self.subscription.key_expr()
    }

    /// Stop delivery. Idempotent.
    pub fn undeclare(&self) {
        self.subscription.undeclare();
    }

    pub fn is_declared(&self) -> bool {
        self.subscription.is_declared()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("key_expr", &self.key_expr())
            .field("declared", &self.is_declared())
            .finish()
    }
}
