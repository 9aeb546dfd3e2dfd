// src/services/chamber.rs
//
// Verification Chamber
//
// ARCHITECTURE:
// - One operator, one request at a time, strictly sequential
// - Rendering happens before the operator is asked anything
// - Every verdict is written to the chamber log
//
// CRITICAL RULES:
// - Typed render failures retire the request and count towards the
//   exception ceiling
// - An operator's own requests are never verified by that operator
// - No answer to "continue?" within the timeout ends the session

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::config::ChamberConfig;
use crate::domain::Request;
use crate::error::{AppError, AppResult};
use crate::repositories::UserRepository;
use crate::services::handler::{HandledRequest, RequestHandler};
use crate::services::request_service::RequestService;

/// Operator decision for one rendered request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Verify { tag: Option<String> },
    Reject,
    Ice,
    /// Text to append before rendering again
    Edit(String),
    Timeout,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Verify { .. } => "verify",
            Verdict::Reject => "reject",
            Verdict::Ice => "ice",
            Verdict::Edit(_) => "edit",
            Verdict::Timeout => "timeout",
        }
    }
}

/// The human side of the chamber (terminal, chat bot...)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Operator: Send + Sync {
    fn id(&self) -> String;

    async fn show(&self, request: &Request, handled: &HandledRequest) -> AppResult<()>;

    async fn verdict(&self) -> AppResult<Verdict>;

    async fn show_error(&self, request: &Request, message: &str) -> AppResult<()>;

    async fn ask_continue(&self) -> AppResult<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChamberMode {
    /// Random unverified requests until the queue is empty
    Random,
    /// The N oldest unverified requests, in order
    Oldies(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChamberSummary {
    pub seen: usize,
    pub verified: usize,
    pub rejected: usize,
    pub iced: usize,
    pub edited: usize,
    pub errors: usize,
}

enum Step {
    Continue,
    Stop,
}

pub struct Chamber {
    requests: Arc<RequestService>,
    handler: Arc<RequestHandler>,
    user_repo: Arc<dyn UserRepository>,
    config: ChamberConfig,
}

impl Chamber {
    pub fn new(
        requests: Arc<RequestService>,
        handler: Arc<RequestHandler>,
        user_repo: Arc<dyn UserRepository>,
        config: ChamberConfig,
    ) -> Self {
        Self {
            requests,
            handler,
            user_repo,
            config,
        }
    }

    pub async fn run(&self, operator: &dyn Operator, mode: ChamberMode) -> AppResult<ChamberSummary> {
        let mut summary = ChamberSummary::default();
        let mut seen = HashSet::new();
        let mut oldies: VecDeque<Request> = match mode {
            ChamberMode::Oldies(limit) => self.requests.list_oldest(false, limit)?.into(),
            ChamberMode::Random => VecDeque::new(),
        };

        log::info!("Chamber opened by {} ({:?})", operator.id(), mode);

        loop {
            let request = match mode {
                ChamberMode::Oldies(_) => match oldies.pop_front() {
                    Some(request) => request,
                    None => break,
                },
                ChamberMode::Random => match self.requests.pick_random(false, None) {
                    Ok(request) => request,
                    Err(AppError::NothingFound(_)) => break,
                    Err(e) => return Err(e),
                },
            };

            // A request that survived its round (timeout, non-skipping error)
            // is not shown twice in one session
            if !seen.insert(request.id) {
                log::debug!("Request {} already seen this session", request.id);
                break;
            }
            summary.seen += 1;

            if let Step::Stop = self.review(operator, request, &mut summary).await? {
                break;
            }
            if summary.errors >= self.config.max_exceptions {
                log::warn!("Chamber closed after {} errors", summary.errors);
                break;
            }

            let timeout = Duration::from_secs(self.config.continue_timeout_secs);
            match tokio::time::timeout(timeout, operator.ask_continue()).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => break,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    log::info!("No answer from {}; closing chamber", operator.id());
                    break;
                }
            }
        }

        log::info!("Chamber closed: {:?}", summary);
        Ok(summary)
    }

    /// Render, show and apply verdicts until one sticks.
    async fn review(
        &self,
        operator: &dyn Operator,
        mut request: Request,
        summary: &mut ChamberSummary,
    ) -> AppResult<Step> {
        let user_name = self
            .user_repo
            .get_by_id(&request.user_id)?
            .map(|user| user.name)
            .unwrap_or_else(|| request.user_id.clone());

        loop {
            let handled = match self.handler.handle(&request, &user_name).await {
                Ok(handled) => handled,
                Err(e) => {
                    self.render_failed(operator, &request, e).await?;
                    summary.errors += 1;
                    return Ok(Step::Continue);
                }
            };

            operator.show(&request, &handled).await?;
            let verdict = operator.verdict().await?;
            let operator_id = operator.id();
            self.requests
                .log_verdict(request.id, &operator_id, verdict.as_str())?;

            match verdict {
                Verdict::Verify { tag } => {
                    match self.requests.verify(request.id, &operator_id, tag) {
                        Ok(_) => summary.verified += 1,
                        Err(e) if e.is_typed() => {
                            operator.show_error(&request, &e.to_string()).await?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Verdict::Reject => {
                    self.requests.reject(request.id, &operator_id)?;
                    summary.rejected += 1;
                }
                Verdict::Ice => {
                    self.requests.ice(request.id)?;
                    summary.iced += 1;
                }
                Verdict::Edit(text) => {
                    request = self.requests.edit(request.id, &text)?;
                    summary.edited += 1;
                    continue;
                }
                Verdict::Timeout => return Ok(Step::Stop),
            }
            return Ok(Step::Continue);
        }
    }

    async fn render_failed(
        &self,
        operator: &dyn Operator,
        request: &Request,
        error: AppError,
    ) -> AppResult<()> {
        if !error.is_typed() {
            return Err(error);
        }
        log::warn!("Request {} failed: {} ({})", request.id, error, error.kind());
        if error.should_skip() {
            self.requests.mark_used(request.id)?;
        }
        operator.show_error(request, &error.to_string()).await
    }
}
