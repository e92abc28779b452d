// service.rs — Request/reply endpoints built on the query primitive.
//
// ServiceServer declares a queryable on `<ns>/service/req/<name>` and answers
// each query with the handler's encoded return value. A failing handler still
// answers, with the envelope `{"error": "<message>"}`, so callers see the
// failure instead of waiting out their timeout.
//
// ServiceClient issues the query and walks the reply stream:
//   error envelope        → ZrcError::Service (returned immediately)
//   substrate error reply → ZrcError::Transport (remembered, keep going)
//   undecodable reply     → ZrcError::Serialization (remembered, keep going)
//   usable reply          → returned
//   nothing usable        → remembered failure, else ZrcError::Timeout

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use zrc_codec::Codec;
use zrc_transport::{Query, Queryable, Transport};

use crate::error::{panic_message, ZrcError};

/// Serves one named service.
pub struct ServiceServer {
    name: String,
    queryable: Queryable,
}

impl ServiceServer {
    pub(crate) fn declare<Req, Resp, F>(
        transport: &dyn Transport,
        name: &str,
        key: &str,
        codec: Arc<dyn Codec>,
        handler: F,
    ) -> Result<Self, ZrcError>
    where
        Req: DeserializeOwned + 'static,
        Resp: Serialize + 'static,
        F: Fn(Req) -> anyhow::Result<Resp> + Send + Sync + 'static,
    {
        let service = name.to_string();
        let queryable = transport.declare_queryable(
            key,
            Box::new(move |query: Query| {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<Vec<u8>> {
                    let request: Req = zrc_codec::from_bytes(codec.as_ref(), query.payload())?;
                    let response = handler(request)?;
                    Ok(zrc_codec::to_bytes(codec.as_ref(), &response)?)
                }));

                let sent = match outcome {
                    Ok(Ok(bytes)) => query.reply(bytes),
                    Ok(Err(e)) => {
                        let message = format!("{e:#}");
                        tracing::warn!(service = %service, error = %message, "service handler failed");
                        reply_with_error(&query, codec.as_ref(), &message)
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(service = %service, error = %message, "service handler panicked");
                        reply_with_error(&query, codec.as_ref(), &message)
                    }
                };
                if let Err(e) = sent {
                    tracing::debug!(service = %service, error = %e, "reply not delivered");
                }
            }),
        )?;
        tracing::info!(service = name, key, "service server ready");
        Ok(Self {
            name: name.to_string(),
            queryable,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        self.queryable.key_expr()
    }

    /// Stop serving. Idempotent.
    pub fn undeclare(&self) {
        self.queryable.undeclare();
    }
}

impl fmt::Debug for ServiceServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceServer")
            .field("name", &self.name)
            .field("key", &self.key())
            .finish()
    }
}

// Error envelope first; codecs that cannot carry a map (raw) fall back to a
// substrate error reply with the same message.
fn reply_with_error(
    query: &Query,
    codec: &dyn Codec,
    message: &str,
) -> Result<(), zrc_transport::TransportError> {
    let envelope = serde_json::json!({ "error": message });
    match codec.encode(&envelope) {
        Ok(bytes) => query.reply(bytes),
        Err(_) => query.reply_err(message),
    }
}

/// The message of an error envelope, if `value` is one.
pub(crate) fn error_envelope(value: &Value) -> Option<String> {
    let error = value.as_object()?.get("error")?;
    Some(match error {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    })
}

/// Calls one named service.
pub struct ServiceClient {
    name: String,
    key: String,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl ServiceClient {
    pub(crate) fn new(
        name: &str,
        key: String,
        codec: Arc<dyn Codec>,
        transport: Arc<dyn Transport>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            key,
            codec,
            transport,
            default_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Call the service, blocking for at most `timeout`.
    pub fn call<Req, Resp>(&self, request: &Req, timeout: Duration) -> Result<Resp, ZrcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = zrc_codec::to_bytes(self.codec.as_ref(), request)?;
        let replies = self.transport.get(&self.key, payload, timeout)?;
        tracing::debug!(service = %self.name, ?timeout, "calling service");

        let mut last_failure: Option<ZrcError> = None;
        for reply in replies {
            let sample = match reply {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::warn!(service = %self.name, error = %e, "service reply failed");
                    last_failure = Some(ZrcError::Transport(e));
                    continue;
                }
            };
            let value = match self.codec.decode(&sample.payload) {
                Ok(value) => value,
                Err(e) => {
                    last_failure = Some(ZrcError::Serialization(e));
                    continue;
                }
            };
            if let Some(message) = error_envelope(&value) {
                return Err(ZrcError::Service {
                    service: self.name.clone(),
                    message,
                });
            }
            match serde_json::from_value::<Resp>(value) {
                Ok(response) => return Ok(response),
                Err(e) => last_failure = Some(e.into()),
            }
        }

        Err(last_failure
            .unwrap_or_else(|| ZrcError::timeout(format!("call to service '{}'", self.name), timeout)))
    }

    /// Call with the node's configured default timeout.
    pub fn call_default<Req, Resp>(&self, request: &Req) -> Result<Resp, ZrcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.call(request, self.default_timeout)
    }
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_envelope_detection() {
        assert_eq!(
            error_envelope(&json!({"error": "bad input"})),
            Some("bad input".to_string())
        );
        assert_eq!(
            error_envelope(&json!({"error": {"code": 3}})),
            Some("{\"code\":3}".to_string())
        );
        assert_eq!(error_envelope(&json!({"sum": 3})), None);
        assert_eq!(error_envelope(&json!("error")), None);
        assert_eq!(error_envelope(&json!([{"error": 1}])), None);
    }
}
