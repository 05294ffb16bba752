use anyhow::Result;
use async_trait::async_trait;

/// A newly stored blob handed to post-upload processing.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub file_id: String,
    pub name: String,
    pub media_type: String,
    pub blob_key: String,
    pub size: i64,
}

/// Format-specific work run once per distinct piece of content, e.g. thumbnails
/// or document conversion.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, req: &ProcessRequest) -> Result<()>;
}

pub struct NoopProcessor;

#[async_trait]
impl Processor for NoopProcessor {
    async fn process(&self, req: &ProcessRequest) -> Result<()> {
        tracing::debug!(
            "No processing for {} ({}, {})",
            req.file_id,
            req.name,
            req.media_type
        );
        Ok(())
    }
}

/// Routes each request to the processor with the longest matching media type
/// prefix ("image/", "image/png"), else to the fallback.
pub struct MediaTypeProcessors {
    routes: Vec<(String, std::sync::Arc<dyn Processor>)>,
    fallback: std::sync::Arc<dyn Processor>,
}

impl MediaTypeProcessors {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: std::sync::Arc::new(NoopProcessor),
        }
    }

    pub fn with(mut self, prefix: &str, processor: std::sync::Arc<dyn Processor>) -> Self {
        self.routes.push((prefix.to_string(), processor));
        self
    }

    fn route(&self, media_type: &str) -> &dyn Processor {
        self.routes
            .iter()
            .filter(|(prefix, _)| media_type.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, p)| p.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }
}

impl Default for MediaTypeProcessors {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for MediaTypeProcessors {
    async fn process(&self, req: &ProcessRequest) -> Result<()> {
        self.route(&req.media_type).process(req).await
    }
}
