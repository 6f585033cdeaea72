//! Built-in middleware.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info, warn};
use wardline_config::GatewayConfig;

use crate::PipelineError;
use crate::outbound::Outbound;
use crate::pipeline::{Middleware, MiddlewareContext, Next};

/// Logs every request on the way in and out.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        info!(
            agent_id = %ctx.message.agent_id,
            user_id = %ctx.message.user_id,
            chat_id = %ctx.message.chat_id,
            message_id = %ctx.message.message_id,
            chars = ctx.message.text.chars().count(),
            "Inbound message"
        );

        let outcome = next.run(ctx).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(()) => info!(
                message_id = %ctx.message.message_id,
                elapsed_ms,
                replied = ctx.response.is_some(),
                "Message handled"
            ),
            Err(e) => warn!(
                message_id = %ctx.message.message_id,
                elapsed_ms,
                error = %e,
                "Message failed"
            ),
        }
        outcome
    }
}

/// Drops messages from senders that are not on the list.
///
/// An empty list or a `"*"` entry lets everyone through.
#[derive(Debug, Clone)]
pub struct AllowlistMiddleware {
    allowed: HashSet<String>,
}

impl AllowlistMiddleware {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.allowed_users.iter().cloned())
    }

    pub fn allows(&self, user_id: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains("*") || self.allowed.contains(user_id)
    }
}

#[async_trait]
impl Middleware for AllowlistMiddleware {
    fn name(&self) -> &str {
        "allowlist"
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), PipelineError> {
        if !self.allows(&ctx.message.user_id) {
            warn!(user_id = %ctx.message.user_id, "Sender not on allowlist; dropping message");
            ctx.set_extra("rejected_by", self.name());
            return Ok(());
        }
        next.run(ctx).await
    }
}

/// Turns a downstream failure into a fallback reply.
pub struct ErrorBoundary {
    fallback: String,
    outbound: Option<Arc<dyn Outbound>>,
}

impl ErrorBoundary {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            fallback: fallback.into(),
            outbound: None,
        }
    }

    /// Also deliver the fallback reply to the chat.
    pub fn with_outbound(mut self, outbound: Arc<dyn Outbound>) -> Self {
        self.outbound = Some(outbound);
        self
    }
}

#[async_trait]
impl Middleware for ErrorBoundary {
    fn name(&self) -> &str {
        "error_boundary"
    }

    async fn handle(
        &self,
        ctx: &mut MiddlewareContext,
        next: Next<'_>,
    ) -> Result<(), PipelineError> {
        let Err(e) = next.run(ctx).await else {
            return Ok(());
        };

        error!(message_id = %ctx.message.message_id, error = %e, "Request failed; sending fallback");
        ctx.set_extra("error", e.to_string());
        ctx.response = Some(self.fallback.clone());
        if let Some(outbound) = &self.outbound {
            if let Err(send_err) = outbound.send(&ctx.message.chat_id, &self.fallback).await {
                warn!(chat_id = %ctx.message.chat_id, error = %send_err, "Fallback delivery failed");
            }
        }
        Ok(())
    }
}
