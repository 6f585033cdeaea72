//! Onion-model request pipeline.
//!
//! Each middleware wraps everything registered after it. With `[a, b]` the
//! order is: `a` before → `b` before → handler → `b` after → `a` after.
//! A middleware that returns without running its [`Next`] stops the
//! request there.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::PipelineError;

/// A chat event as the transport delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub agent_id: String,
    pub user_id: String,
    pub chat_id: String,
    pub message_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// A message stamped now, with a fresh message id.
    pub fn new(
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            message_id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// State shared by every layer of one request.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    pub message: InboundMessage,
    /// Free-form attributes layers attach for each other.
    pub extra: Map<String, Value>,
    /// The reply, once something produced one.
    pub response: Option<String>,
}

impl MiddlewareContext {
    pub fn new(message: InboundMessage) -> Self {
        Self {
            message,
            extra: Map::new(),
            response: None,
        }
    }

    pub fn set_extra(&mut self, key: &str, value: impl Into<Value>) {
        self.extra.insert(key.to_string(), value.into());
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// The innermost layer.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut MiddlewareContext) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Run before-logic, optionally `next.run(ctx).await`, then after-logic.
    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), PipelineError>;
}

/// The rest of the chain. Consumed by [`Next::run`].
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &mut MiddlewareContext) -> Result<(), PipelineError> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    chain: rest,
                    handler: self.handler,
                };
                head.handle(ctx, next).await
            }
            None => self.handler.handle(ctx).await,
        }
    }
}

/// Ordered middleware around a handler.
#[derive(Default)]
pub struct MiddlewarePipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. Registration order is execution order.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Run `ctx` through every middleware and then `handler`.
    pub async fn dispatch(
        &self,
        ctx: &mut MiddlewareContext,
        handler: &dyn Handler,
    ) -> Result<(), PipelineError> {
        Next {
            chain: &self.middlewares,
            handler,
        }
        .run(ctx)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
        pass: bool,
    }

    #[async_trait]
    impl Middleware for Recording {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(
            &self,
            ctx: &mut MiddlewareContext,
            next: Next<'_>,
        ) -> Result<(), PipelineError> {
            self.log.lock().unwrap().push(format!("{} before", self.name));
            if !self.pass {
                return Ok(());
            }
            ctx.set_extra(self.name, true);
            next.run(ctx).await?;
            self.log.lock().unwrap().push(format!("{} after", self.name));
            Ok(())
        }
    }

    struct RecordingHandler {
        log: Log,
        fail: bool,
    }

    #[async_trait]
    impl Handler for RecordingHandler {
        async fn handle(&self, ctx: &mut MiddlewareContext) -> Result<(), PipelineError> {
            self.log.lock().unwrap().push("handler".into());
            if self.fail {
                return Err(PipelineError::Agent("model unavailable".into()));
            }
            ctx.response = Some(format!("echo: {}", ctx.message.text));
            Ok(())
        }
    }

    fn layer(name: &'static str, log: &Log, pass: bool) -> Arc<dyn Middleware> {
        Arc::new(Recording {
            name,
            log: log.clone(),
            pass,
        })
    }

    fn ctx() -> MiddlewareContext {
        MiddlewareContext::new(InboundMessage::new("bot", "u1", "c1", "hi"))
    }

    #[tokio::test]
    async fn onion_order() {
        let log: Log = Arc::default();
        let mut pipeline = MiddlewarePipeline::new();
        pipeline
            .use_middleware(layer("a", &log, true))
            .use_middleware(layer("b", &log, true));
        let handler = RecordingHandler {
            log: log.clone(),
            fail: false,
        };

        let mut ctx = ctx();
        pipeline.dispatch(&mut ctx, &handler).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a before", "b before", "handler", "b after", "a after"]
        );
        assert_eq!(ctx.response.as_deref(), Some("echo: hi"));
        assert_eq!(ctx.extra("a"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn rejecting_layer_skips_everything_downstream() {
        let log: Log = Arc::default();
        let mut pipeline = MiddlewarePipeline::new();
        pipeline
            .use_middleware(layer("auth", &log, false))
            .use_middleware(layer("logger", &log, true));
        let handler = RecordingHandler {
            log: log.clone(),
            fail: false,
        };

        let mut ctx = ctx();
        pipeline.dispatch(&mut ctx, &handler).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["auth before"]);
        assert!(ctx.response.is_none());
    }

    #[tokio::test]
    async fn empty_pipeline_runs_the_handler() {
        let log: Log = Arc::default();
        let pipeline = MiddlewarePipeline::new();
        let handler = RecordingHandler {
            log: log.clone(),
            fail: false,
        };
        let mut ctx = ctx();
        pipeline.dispatch(&mut ctx, &handler).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }

    #[tokio::test]
    async fn handler_errors_propagate_without_after_logic() {
        let log: Log = Arc::default();
        let mut pipeline = MiddlewarePipeline::new();
        pipeline.use_middleware(layer("a", &log, true));
        let handler = RecordingHandler {
            log: log.clone(),
            fail: true,
        };

        let mut ctx = ctx();
        let err = pipeline.dispatch(&mut ctx, &handler).await.unwrap_err();

        assert!(matches!(err, PipelineError::Agent(_)));
        assert_eq!(*log.lock().unwrap(), vec!["a before", "handler"]);
    }
}
