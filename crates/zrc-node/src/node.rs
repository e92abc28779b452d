// node.rs — Node: one session on the bus plus factories for every endpoint.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use zrc_codec::{Codec, CodecKind};
use zrc_transport::{MemoryBus, Transport};

use crate::action::{ActionClient, ActionHandle, ActionServer};
use crate::config::NodeConfig;
use crate::error::ZrcError;
use crate::keys::KeyLayout;
use crate::pubsub::{Publisher, Subscriber};
use crate::service::{ServiceClient, ServiceServer};

/// A named participant. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    name: String,
    transport: Arc<dyn Transport>,
    config: NodeConfig,
    keys: KeyLayout,
    codec: Arc<dyn Codec>,
}

impl Node {
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>, config: NodeConfig) -> Self {
        let name = name.into();
        let keys = config.key_layout();
        let codec = config.node.codec.codec();
        tracing::info!(node = %name, %config, "node started");
        Self {
            inner: Arc::new(NodeInner {
                name,
                transport,
                config,
                keys,
                codec,
            }),
        }
    }

    /// A node alone on a fresh in-process bus, with default configuration.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::on_bus(name, &MemoryBus::new(), NodeConfig::default())
    }

    /// A node joining an existing in-process bus.
    pub fn on_bus(name: impl Into<String>, bus: &MemoryBus, config: NodeConfig) -> Self {
        Self::new(name, Arc::new(bus.open_session()), config)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn keys(&self) -> &KeyLayout {
        &self.inner.keys
    }

    pub fn codec(&self) -> CodecKind {
        self.inner.codec.kind()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Close the session. Every subscription, queryable and action endpoint
    /// of this node stops; later operations fail with a transport error.
    pub fn close(&self) {
        if !self.inner.transport.is_closed() {
            self.inner.transport.close();
            tracing::info!(node = %self.inner.name, "node closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.transport.is_closed()
    }

    // -- Topics --

    pub fn create_publisher<T: Serialize + ?Sized>(&self, topic: &str) -> Publisher<T> {
        self.publisher_on_key(self.inner.keys.topic(topic), Arc::clone(&self.inner.codec))
    }

    pub fn create_publisher_with_codec<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        codec: CodecKind,
    ) -> Publisher<T> {
        self.publisher_on_key(self.inner.keys.topic(topic), codec.codec())
    }

    /// Publisher on an arbitrary concrete key, outside the topic layout.
    pub fn publisher_on_key<T: Serialize + ?Sized>(
        &self,
        key: impl Into<String>,
        codec: Arc<dyn Codec>,
    ) -> Publisher<T> {
        Publisher::new(key, codec, Arc::clone(&self.inner.transport))
    }

    pub fn create_subscriber<T, F>(&self, topic: &str, callback: F) -> Result<Subscriber, ZrcError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscriber_on_key(&self.inner.keys.topic(topic), Arc::clone(&self.inner.codec), callback)
    }

    pub fn create_subscriber_with_codec<T, F>(
        &self,
        topic: &str,
        codec: CodecKind,
        callback: F,
    ) -> Result<Subscriber, ZrcError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscriber_on_key(&self.inner.keys.topic(topic), codec.codec(), callback)
    }

    /// Subscriber on an arbitrary key expression (wildcards allowed).
    pub fn subscriber_on_key<T, F>(
        &self,
        key_expr: &str,
        codec: Arc<dyn Codec>,
        callback: F,
    ) -> Result<Subscriber, ZrcError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let subscriber = Subscriber::declare(self.inner.transport.as_ref(), key_expr, codec, callback)?;
        tracing::debug!(node = %self.inner.name, key_expr, "subscriber declared");
        Ok(subscriber)
    }

    // -- Services --

    pub fn create_service_server<Req, Resp, F>(
        &self,
        service: &str,
        handler: F,
    ) -> Result<ServiceServer, ZrcError>
    where
        Req: DeserializeOwned + 'static,
        Resp: Serialize + 'static,
        F: Fn(Req) -> anyhow::Result<Resp> + Send + Sync + 'static,
    {
        ServiceServer::declare(
            self.inner.transport.as_ref(),
            service,
            &self.inner.keys.service_request(service),
            Arc::clone(&self.inner.codec),
            handler,
        )
    }

    pub fn create_service_client(&self, service: &str) -> ServiceClient {
        ServiceClient::new(
            service,
            self.inner.keys.service_request(service),
            Arc::clone(&self.inner.codec),
            Arc::clone(&self.inner.transport),
            self.inner.config.service_timeout(),
        )
    }

    // -- Actions --

    pub fn create_action_server<F>(&self, action: &str, execute: F) -> Result<ActionServer, ZrcError>
    where
        F: Fn(&str, Value, ActionHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        ActionServer::declare(
            Arc::clone(&self.inner.transport),
            self.inner.keys.clone(),
            action,
            self.action_codec(),
            execute,
        )
    }

    pub fn create_action_client(&self, action: &str) -> ActionClient {
        ActionClient::new(
            Arc::clone(&self.inner.transport),
            self.inner.keys.clone(),
            action,
            self.action_codec(),
            self.inner.config.wait_timeout(),
            self.inner.config.result_cache_ttl(),
            self.inner.config.goal_timeout(),
        )
    }

    // Action messages are JSON objects, which the raw codec cannot carry;
    // raw nodes exchange them as JSON instead.
    fn action_codec(&self) -> Arc<dyn Codec> {
        match self.inner.codec.kind() {
            CodecKind::Raw => CodecKind::Json.codec(),
            _ => Arc::clone(&self.inner.codec),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.inner.name)
            .field("namespace", &self.inner.keys.namespace())
            .field("codec", &self.codec())
            .field("closed", &self.is_closed())
            .finish()
    }
}
