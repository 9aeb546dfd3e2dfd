// src/services/request_service.rs
//
// Request Store
//
// ARCHITECTURE:
// - Queue transitions (verify, reject, ice, edit, use) on top of the
//   request repository
// - Daily role limits with an atomic "increment if under limit"
//
// CRITICAL RULES:
// - Nothing is persisted for a request whose media can't be found
// - An operator can't verify their own request
// - Used requests are never revived; edits create a fresh copy

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{ChamberConfig, Config, LimitsConfig};
use crate::domain::{validate_request, LimitKind, Request, User};
use crate::error::{AppError, AppResult};
use crate::events::{
    EventBus, RequestEdited, RequestEnqueued, RequestIced, RequestRejected, RequestVerified,
};
use crate::parser::parse_request;
use crate::repositories::{RequestRepository, UserRepository};
use crate::services::catalog_service::CatalogService;

/// A request line as it arrives from a comment or the CLI
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub user_id: String,
    pub user_name: String,
    pub comment: String,
    pub source_comment_id: Option<String>,
    pub language: Option<String>,
}

impl SubmitRequest {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            comment: comment.into(),
            source_comment_id: None,
            language: None,
        }
    }

    pub fn from_comment(mut self, comment_id: impl Into<String>) -> Self {
        self.source_comment_id = Some(comment_id.into());
        self
    }
}

pub struct RequestService {
    request_repo: Arc<dyn RequestRepository>,
    user_repo: Arc<dyn UserRepository>,
    catalog: Arc<CatalogService>,
    event_bus: Arc<EventBus>,
    limits: LimitsConfig,
    chamber: ChamberConfig,
    duplicate_window: u32,
}

impl RequestService {
    pub fn new(
        request_repo: Arc<dyn RequestRepository>,
        user_repo: Arc<dyn UserRepository>,
        catalog: Arc<CatalogService>,
        event_bus: Arc<EventBus>,
        config: &Config,
    ) -> Self {
        Self {
            request_repo,
            user_repo,
            catalog,
            event_bus,
            limits: config.limits.clone(),
            chamber: config.chamber.clone(),
            duplicate_window: config.publisher.duplicate_window_posts,
        }
    }

    // ========================================================================
    // INTAKE
    // ========================================================================

    /// Validate and queue a request.
    ///
    /// Order: grammar, source dedup, catalog lookup, duplicate window,
    /// role limit. Every check runs before anything is written except the
    /// user row and the limit counter.
    pub fn enqueue(&self, submit: SubmitRequest) -> AppResult<Request> {
        let comment = submit.comment.trim().to_string();
        let parsed = parse_request(&comment)?;

        if let Some(source) = &submit.source_comment_id {
            if self.request_repo.exists_for_source(source)? {
                return Err(AppError::DuplicateRequest(format!(
                    "Comment {} was already ingested",
                    source
                )));
            }
        }

        for segment in &parsed.segments {
            self.catalog
                .fuzzy_find(parsed.command.media_kind(), &segment.media_query)?;
        }

        self.user_repo
            .upsert(&User::new(submit.user_id.clone(), submit.user_name.clone()))?;

        if self
            .request_repo
            .find_duplicate(&submit.user_id, &comment, self.duplicate_window)?
            .is_some()
        {
            return Err(AppError::DuplicateRequest(format!(
                "{} already requested: {}",
                submit.user_name, comment
            )));
        }

        let mut request = Request::new(submit.user_id, comment, parsed.command);
        request.source_comment_id = submit.source_comment_id;
        if let Some(language) = submit.language {
            request.language = language;
        }
        validate_request(&request)?;

        let kind = parsed.command.limit_kind();
        let limit = self.role_limit(&request.user_id, kind)?;
        if !self
            .request_repo
            .insert_within_limit(&request, limit.map(|n| (kind, n)), Utc::now())?
        {
            return Err(AppError::LimitExceeded(format!(
                "Daily limit of {} {} requests reached. Patrons have no limits",
                limit.unwrap_or(0),
                kind.as_str()
            )));
        }
        self.event_bus.emit(RequestEnqueued::new(
            request.id,
            request.user_id.clone(),
            request.command,
        ));

        log::info!("Request {} queued: {}", request.id, request.comment);
        Ok(request)
    }

    /// Daily limit of `kind` for the user; `None` for privileged roles.
    pub fn role_limit(&self, user_id: &str, kind: LimitKind) -> AppResult<Option<u32>> {
        let privileged = self
            .user_repo
            .get_by_id(user_id)?
            .map(|user| user.is_privileged(&self.limits.privileged_roles))
            .unwrap_or(false);
        if privileged {
            return Ok(None);
        }

        Ok(Some(match kind {
            LimitKind::Classic => self.limits.classic_daily,
            LimitKind::Gif => self.limits.gif_daily,
        }))
    }

    pub fn reset_limits(&self) -> AppResult<usize> {
        let rows = self.request_repo.reset_limits(Utc::now())?;
        log::info!("Role limits reset ({} rows)", rows);
        Ok(rows)
    }

    // ========================================================================
    // QUEUE
    // ========================================================================

    pub fn get(&self, id: Uuid) -> AppResult<Request> {
        self.request_repo
            .get_by_id(id)?
            .ok_or_else(|| AppError::NothingFound(format!("Request {} not found", id)))
    }

    /// Random unused request; recently iced ones are skipped silently.
    pub fn pick_random(&self, verified: bool, tag: Option<&str>) -> AppResult<Request> {
        self.pick_random_excluding(verified, tag, &[])
    }

    /// `pick_random` skipping requests already tried by the caller
    pub fn pick_random_excluding(
        &self,
        verified: bool,
        tag: Option<&str>,
        exclude: &[Uuid],
    ) -> AppResult<Request> {
        let iced_before = Utc::now() - Duration::hours(self.chamber.ice_delay_hours);
        self.request_repo
            .pick_random(verified, tag, iced_before, exclude)?
            .ok_or_else(|| {
                AppError::NothingFound(match tag {
                    Some(tag) => format!("No requests found for tag {}", tag),
                    None => "No requests found".to_string(),
                })
            })
    }

    pub fn list_oldest(&self, verified: bool, limit: u32) -> AppResult<Vec<Request>> {
        self.request_repo.list_oldest(verified, limit)
    }

    pub fn mark_used(&self, id: Uuid) -> AppResult<()> {
        self.request_repo.mark_used(id)
    }

    // ========================================================================
    // VERDICTS
    // ========================================================================

    pub fn verify(&self, id: Uuid, operator_id: &str, tag: Option<String>) -> AppResult<Request> {
        let mut request = self.get(id)?;
        if request.user_id == operator_id {
            return Err(AppError::InvalidRequest(
                "You can't verify your own request".to_string(),
            ));
        }
        if request.used {
            return Err(AppError::Unwanted(format!("Request {} was already used", id)));
        }

        request.verify(tag);
        self.request_repo.update(&request)?;
        self.event_bus.emit(RequestVerified::new(
            request.id,
            operator_id.to_string(),
            request.tag.clone(),
        ));
        Ok(request)
    }

    pub fn reject(&self, id: Uuid, operator_id: &str) -> AppResult<Request> {
        let mut request = self.get(id)?;
        request.mark_used();
        self.request_repo.update(&request)?;
        self.event_bus.emit(RequestRejected::new(
            request.id,
            request.user_id.clone(),
            operator_id.to_string(),
        ));
        Ok(request)
    }

    /// Defer a request. Past the ice ceiling it is retired.
    pub fn ice(&self, id: Uuid) -> AppResult<Request> {
        let mut request = self.get(id)?;
        request.register_ice(Utc::now());
        if request.iced_count > self.chamber.max_ices {
            log::info!("Request {} iced {} times; retiring", id, request.iced_count);
            request.mark_used();
        }
        self.request_repo.update(&request)?;
        self.event_bus
            .emit(RequestIced::new(request.id, request.iced_count));
        Ok(request)
    }

    pub fn append_text(&self, id: Uuid, text: &str) -> AppResult<Request> {
        let mut request = self.get(id)?;
        request.append_text(text);
        self.request_repo.update(&request)?;
        Ok(request)
    }

    pub fn reset_append(&self, id: Uuid) -> AppResult<Request> {
        let mut request = self.get(id)?;
        request.reset_append();
        self.request_repo.update(&request)?;
        Ok(request)
    }

    /// Fresh queued row copied from an existing one
    pub fn clone_request(&self, id: Uuid) -> AppResult<Request> {
        let copy = self.get(id)?.clone_queued();
        self.request_repo.insert(&copy)?;
        Ok(copy)
    }

    /// Edit loop step: the original is retired and kept in history, the
    /// copy carries the appended text.
    pub fn edit(&self, id: Uuid, text: &str) -> AppResult<Request> {
        let mut copy = self.clone_request(id)?;
        copy.append_text(text);
        self.request_repo.update(&copy)?;
        self.request_repo.mark_used(id)?;

        self.event_bus
            .emit(RequestEdited::new(id, copy.id, copy.appended.clone()));
        Ok(copy)
    }

    pub fn log_verdict(&self, id: Uuid, operator_id: &str, verdict: &str) -> AppResult<()> {
        self.request_repo.log_verdict(id, operator_id, verdict)
    }

    pub fn verdicts(&self, id: Uuid) -> AppResult<Vec<String>> {
        self.request_repo.verdicts_for(id)
    }
}
