//! Request gateway for Wardline.
//!
//! Inbound chat events pass through a [`MiddlewarePipeline`] and end in the
//! [`AgentHandler`], which runs the agent against the sender's memory and
//! replies through an [`Outbound`].

pub mod handler;
pub mod middleware;
pub mod outbound;
pub mod pipeline;

use std::sync::Arc;

use tracing::info;
use wardline_config::AppConfig;
use wardline_core::error::{ChannelError, MemoryError};
use wardline_core::provider::Provider;
use wardline_guardrails::{GuardrailEngine, GuardrailError};
use wardline_memory::{LlmMemoryExtractor, SessionManager, SessionSettings};
use wardline_telemetry::exporter_by_name;
use wardline_tools::ToolRegistry;

pub use handler::{AgentHandler, CLEAR_COMMAND, RESET_COMMAND};
pub use middleware::{AllowlistMiddleware, ErrorBoundary, LoggingMiddleware};
pub use outbound::{CollectingOutbound, LogOutbound, Outbound};
pub use pipeline::{
    Handler, InboundMessage, Middleware, MiddlewareContext, MiddlewarePipeline, Next,
};

/// Errors that escape a pipeline layer.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Delivery error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Agent run failed: {0}")]
    Agent(String),

    #[error("Guardrail setup failed: {0}")]
    Guardrail(#[from] GuardrailError),

    #[error("Unknown span exporter: {0}")]
    UnknownExporter(String),

    #[error("Middleware '{middleware}' failed: {reason}")]
    Middleware { middleware: String, reason: String },
}

/// A configured pipeline with its handler.
pub struct Gateway {
    pipeline: MiddlewarePipeline,
    handler: AgentHandler,
}

impl Gateway {
    pub fn new(pipeline: MiddlewarePipeline, handler: AgentHandler) -> Self {
        Self { pipeline, handler }
    }

    /// Wire everything up from config.
    ///
    /// Layers, outermost first: error boundary, request logging (when
    /// `log_requests` is set), allowlist.
    pub async fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        outbound: Arc<dyn Outbound>,
    ) -> Result<Self, PipelineError> {
        let store = wardline_memory::open_store(&config.memory).await?;
        let extractor = LlmMemoryExtractor::new(Arc::clone(&provider), config.agent.model.clone());
        let sessions = SessionManager::new(store, SessionSettings::from_config(&config.memory))
            .with_extractor(Arc::new(extractor))
            .with_max_sessions(config.memory.max_cached_sessions);
        let guardrails = GuardrailEngine::from_config(&config.guardrails)?;

        let mut handler = AgentHandler::new(provider, tools, Arc::new(sessions), Arc::clone(&outbound))
            .with_agent_config(config.agent.clone())
            .with_guardrails(Arc::new(guardrails))
            .with_tracing(config.tracing.enabled);
        if config.tracing.enabled {
            let exporter = exporter_by_name(&config.tracing.exporter)
                .ok_or_else(|| PipelineError::UnknownExporter(config.tracing.exporter.clone()))?;
            handler = handler.with_exporter(Arc::from(exporter));
        }

        let mut pipeline = MiddlewarePipeline::new();
        pipeline.use_middleware(Arc::new(
            ErrorBoundary::new(config.gateway.fallback_reply.clone()).with_outbound(outbound),
        ));
        if config.gateway.log_requests {
            pipeline.use_middleware(Arc::new(LoggingMiddleware));
        }
        pipeline.use_middleware(Arc::new(AllowlistMiddleware::from_config(&config.gateway)));

        info!(middleware = ?pipeline.names(), "Gateway ready");
        Ok(Self::new(pipeline, handler))
    }

    pub fn pipeline_mut(&mut self) -> &mut MiddlewarePipeline {
        &mut self.pipeline
    }

    pub fn handler(&self) -> &AgentHandler {
        &self.handler
    }

    /// Run one inbound message through the pipeline.
    pub async fn dispatch(
        &self,
        message: InboundMessage,
    ) -> Result<MiddlewareContext, PipelineError> {
        let mut ctx = MiddlewareContext::new(message);
        self.pipeline.dispatch(&mut ctx, &self.handler).await?;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use wardline_core::error::ProviderError;
    use wardline_core::message::Message;
    use wardline_core::provider::{ProviderRequest, ProviderResponse};

    struct Fixed(&'static str);

    #[async_trait]
    impl Provider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse::from_message(Message::assistant(self.0), "fixed"))
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.memory.backend = "memory".into();
        config.tracing.exporter = "null".into();
        config
    }

    #[tokio::test]
    async fn from_config_builds_standard_layers() {
        let gateway = Gateway::from_config(
            &config(),
            Arc::new(Fixed("hi")),
            Arc::new(ToolRegistry::new()),
            Arc::new(CollectingOutbound::new()),
        )
        .await
        .unwrap();
        assert_eq!(
            gateway.pipeline.names(),
            vec!["error_boundary", "logging", "allowlist"]
        );
    }

    #[tokio::test]
    async fn dispatch_returns_the_reply() {
        let outbound = Arc::new(CollectingOutbound::new());
        let gateway = Gateway::from_config(
            &config(),
            Arc::new(Fixed("hello there")),
            Arc::new(ToolRegistry::new()),
            outbound.clone(),
        )
        .await
        .unwrap();

        let ctx = gateway
            .dispatch(InboundMessage::new("default", "u1", "c1", "hi"))
            .await
            .unwrap();
        assert_eq!(ctx.response.as_deref(), Some("hello there"));
        assert_eq!(outbound.sent().len(), 1);
    }

    #[tokio::test]
    async fn unknown_exporter_is_rejected() {
        let mut config = config();
        config.tracing.exporter = "carrier-pigeon".into();
        let err = Gateway::from_config(
            &config,
            Arc::new(Fixed("x")),
            Arc::new(ToolRegistry::new()),
            Arc::new(CollectingOutbound::new()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, PipelineError::UnknownExporter(_)));
    }
}
