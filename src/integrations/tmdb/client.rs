// src/integrations/tmdb/client.rs
//
// TMDB API Integration
//
// ARCHITECTURE:
// - REST client for movie search and details (with credits)
// - Handles rate limiting and on-disk response caching
// - Maps external data → DTOs (NO domain mutation)
// - Used by the catalog's metadata enrichment
//
// CRITICAL RULES:
// - This is INFRASTRUCTURE, not DOMAIN
// - Never creates or modifies domain entities directly
// - Returns DTOs that services can map

use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::TmdbConfig;
use crate::error::{AppError, AppResult};
use crate::integrations::cache::ResponseCache;

/// Movie details consumed by the catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieDetails {
    pub tmdb_id: i64,
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<u32>,
    pub directors: Vec<String>,
    pub female_director: bool,
    pub countries: Vec<String>,
    pub genres: Vec<String>,
    pub rating: Option<f32>,
}

/// Source of movie metadata
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Best match for a title, `None` when the provider knows nothing
    async fn movie_details(&self, title: &str, year: Option<i32>)
        -> AppResult<Option<MovieDetails>>;
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    id: i64,
    title: String,
    original_title: Option<String>,
    release_date: Option<String>,
    runtime: Option<u32>,
    vote_average: Option<f32>,
    #[serde(default)]
    genres: Vec<NamedData>,
    #[serde(default)]
    production_countries: Vec<CountryData>,
    credits: Option<CreditsData>,
}

#[derive(Debug, Deserialize)]
struct NamedData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CountryData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreditsData {
    #[serde(default)]
    crew: Vec<CrewData>,
}

#[derive(Debug, Deserialize)]
struct CrewData {
    name: String,
    job: String,
    /// 1 = female, 2 = male, 0 = unknown
    #[serde(default)]
    gender: u8,
}

// ============================================================================
// RATE LIMITER
// ============================================================================

/// Rate limiter state
struct RateLimiter {
    last_request: Instant,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Instant::now() - Duration::from_secs(60),
            min_interval,
        }
    }

    /// Reserve the next slot and return how long to wait for it
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let next = self.last_request + self.min_interval;
        if next > now {
            self.last_request = next;
            next - now
        } else {
            self.last_request = now;
            Duration::ZERO
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// TMDB API Client
pub struct TmdbClient {
    base_url: String,
    api_key: String,
    http_client: Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    cache: Option<ResponseCache>,
}

impl TmdbClient {
    pub fn new(config: &TmdbConfig) -> AppResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Other("TMDB api_key is not configured".to_string()))?;

        let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let cache = match &config.cache_dir {
            Some(dir) => Some(ResponseCache::new(
                dir.clone(),
                Duration::from_secs(config.cache_ttl_secs),
            )?),
            None => None,
        };

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            http_client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(Duration::from_millis(1000)))),
            cache,
        })
    }

    /// Search movies by title; returns TMDB ids, best match first
    pub async fn search_movie(&self, title: &str, year: Option<i32>) -> AppResult<Vec<i64>> {
        let mut params = vec![("query", title.to_string())];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }
        let response: SearchResponse = self.get_json("/search/movie", &params).await?;
        Ok(response.results.into_iter().map(|r| r.id).collect())
    }

    /// Movie details with credits
    pub async fn get_movie(&self, tmdb_id: i64) -> AppResult<MovieDetails> {
        let path = format!("/movie/{}", tmdb_id);
        let params = vec![("append_to_response", "credits".to_string())];
        let response: DetailsResponse = self.get_json(&path, &params).await?;
        Ok(Self::map_details(response))
    }

    // ========================================================================
    // INTERNAL: request execution
    // ========================================================================

    async fn get_json<T>(&self, path: &str, params: &[(&str, String)]) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = Url::parse_with_params(
            &format!("{}{}", self.base_url, path),
            params.iter().map(|(k, v)| (*k, v.as_str())),
        )
        .map_err(|e| AppError::Other(format!("Invalid TMDB url: {}", e)))?;

        // The api key never enters the cache key
        let cache_key = url.to_string();
        if let Some(body) = self.cache.as_ref().and_then(|c| c.get(&cache_key)) {
            log::debug!("TMDB cache hit: {}", path);
            return Ok(serde_json::from_str(&body)?);
        }

        let wait = match self.rate_limiter.lock() {
            Ok(mut limiter) => limiter.reserve(),
            Err(_) => Duration::ZERO,
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let response = self
            .http_client
            .get(url)
            .query(&[("api_key", self.api_key.as_str())])
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AppError::Other(format!("TMDB request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Other(format!(
                "TMDB returned status: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&cache_key, &body) {
                log::warn!("Failed to cache TMDB response: {}", e);
            }
        }

        Ok(serde_json::from_str(&body)?)
    }

    fn map_details(details: DetailsResponse) -> MovieDetails {
        let directors: Vec<&CrewData> = details
            .credits
            .as_ref()
            .map(|c| c.crew.iter().filter(|p| p.job == "Director").collect())
            .unwrap_or_default();

        MovieDetails {
            tmdb_id: details.id,
            year: details
                .release_date
                .as_deref()
                .and_then(|d| d.get(..4))
                .and_then(|y| y.parse().ok()),
            original_title: details
                .original_title
                .filter(|original| original != &details.title),
            title: details.title,
            runtime: details.runtime.filter(|r| *r > 0),
            female_director: directors.iter().any(|d| d.gender == 1),
            directors: directors.iter().map(|d| d.name.clone()).collect(),
            countries: details
                .production_countries
                .into_iter()
                .map(|c| c.name)
                .collect(),
            genres: details.genres.into_iter().map(|g| g.name).collect(),
            rating: details.vote_average,
        }
    }
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    async fn movie_details(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> AppResult<Option<MovieDetails>> {
        let ids = self.search_movie(title, year).await?;
        match ids.first() {
            Some(id) => Ok(Some(self.get_movie(*id).await?)),
            None => Ok(None),
        }
    }
}
