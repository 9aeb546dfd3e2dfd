// src/services/handler.rs
//
// Request Handler
//
// Turns one stored request into images plus the texts that go with them:
// parse -> resolve -> render -> caption. Resolution and pixel work run on
// the blocking pool.

use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::{MediaItem, Request};
use crate::error::AppResult;
use crate::parser::parse_request;
use crate::services::badge_service::HandlerTelemetry;
use crate::services::render::Renderer;
use crate::services::resolver::ResolverService;

/// Everything the publisher needs from one request
#[derive(Debug, Clone)]
pub struct HandledRequest {
    pub images: Vec<PathBuf>,
    pub caption: String,
    pub info_comment: Option<String>,
    /// Distinct media in bracket order
    pub media: Vec<Arc<MediaItem>>,
    pub telemetry: HandlerTelemetry,
}

pub struct RequestHandler {
    resolver: Arc<ResolverService>,
    renderer: Arc<Renderer>,
}

impl RequestHandler {
    pub fn new(resolver: Arc<ResolverService>, renderer: Arc<Renderer>) -> Self {
        Self { resolver, renderer }
    }

    pub async fn handle(&self, request: &Request, user_name: &str) -> AppResult<HandledRequest> {
        let comment = request.effective_comment();
        let parsed = parse_request(&comment)?;
        // Subtitle reads, fuzzy scans and SQLite lookups block
        let resolver = Arc::clone(&self.resolver);
        let query = parsed.clone();
        let language = request.language.clone();
        let resolution =
            tokio::task::spawn_blocking(move || resolver.resolve(&query, &language)).await??;
        let images = self
            .renderer
            .render(parsed.command, &resolution, &parsed.options)
            .await?;

        let media = resolution.media();
        log::debug!(
            "Request {} rendered {} image(s) from {} item(s)",
            request.id,
            images.len(),
            media.len()
        );

        Ok(HandledRequest {
            caption: caption(&media, user_name, &request.comment),
            info_comment: info_comment(&media),
            telemetry: HandlerTelemetry::from_request(&parsed),
            images,
            media,
        })
    }
}

/// Titles joined with ` | `, then the requester line
pub fn caption(media: &[Arc<MediaItem>], user_name: &str, comment: &str) -> String {
    let titles: Vec<String> = media.iter().map(|m| m.pretty_title()).collect();
    format!(
        "{}\n\nRequested by {} ({})",
        titles.join(" | "),
        user_name,
        comment
    )
}

/// Credits and categories of the first item; `None` when nothing is known
pub fn info_comment(media: &[Arc<MediaItem>]) -> Option<String> {
    let item = media.first()?;
    let metadata = &item.metadata;
    let mut lines = Vec::new();

    match metadata.directors.len() {
        0 => {}
        1 => lines.push(format!("Director: {}", metadata.directors[0])),
        _ => lines.push(format!("Directors: {}", metadata.directors.join(", "))),
    }
    if let Some(runtime) = metadata.runtime {
        lines.push(format!("Runtime: {} min", runtime));
    }
    let categories = if metadata.categories.is_empty() {
        &metadata.genres
    } else {
        &metadata.categories
    };
    if !categories.is_empty() {
        lines.push(format!("Categories: {}", categories.join(", ")));
    }

    (!lines.is_empty()).then(|| lines.join("\n"))
}
