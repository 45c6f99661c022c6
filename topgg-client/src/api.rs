use crate::metrics::ClientMetrics;
use crate::pipeline::{ApiRequest, PipelineConfig, RequestPipeline};
use crate::rate_limiter::BucketStatus;
use crate::retry::RetryConfig;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use topgg_core::{
    ApiError, AppConfig, Bot, BotPage, BotQuery, BotStats, ConfigError, CoreError, Stats, User,
    Voter,
};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct VoteCheck {
    voted: u8,
}

#[derive(Debug, Deserialize)]
struct WeekendCheck {
    is_weekend: bool,
}

/// Typed access to the Top.gg API for one bot token.
#[derive(Debug)]
pub struct TopggClient {
    pipeline: RequestPipeline,
    bot_id: Option<u64>,
}

impl TopggClient {
    pub fn new(token: impl Into<String>) -> Result<Self, CoreError> {
        Self::with_config(token, PipelineConfig::default())
    }

    pub fn with_config(token: impl Into<String>, config: PipelineConfig) -> Result<Self, CoreError> {
        let token = token.into();
        let bot_id = if token.is_empty() {
            None
        } else {
            Some(decode_bot_id(&token)?)
        };

        let pipeline = RequestPipeline::new(token, config)?;
        if let Some(id) = bot_id {
            debug!("Created Top.gg client for bot {}", id);
        }

        Ok(Self { pipeline, bot_id })
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self, CoreError> {
        Self::with_config(
            config.api.token.clone(),
            PipelineConfig {
                base_url: config.api.base_url.clone(),
                timeout: config.api.timeout(),
                ..PipelineConfig::default()
            },
        )
    }

    /// Surfaces long rate-limit waits as errors instead of sleeping.
    pub fn with_fail_fast(token: impl Into<String>) -> Result<Self, CoreError> {
        Self::with_config(
            token,
            PipelineConfig {
                retry: RetryConfig::fail_fast(),
                ..PipelineConfig::default()
            },
        )
    }

    /// The bot id embedded in the API token.
    pub fn bot_id(&self) -> Option<u64> {
        self.bot_id
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub async fn get_bot(&self, bot_id: u64) -> Result<Bot, CoreError> {
        let request = ApiRequest::get(format!("/bots/{}", bot_id));
        self.pipeline.execute(&request.bucket(), &request).await
    }

    pub async fn get_bots(&self, query: &BotQuery) -> Result<BotPage, CoreError> {
        let request = ApiRequest::get("/bots").query_pairs(query.to_query_pairs());
        let page: BotPage = self.pipeline.execute(&request.bucket(), &request).await?;
        debug!("Retrieved {} of {} bots", page.count, page.total);
        Ok(page)
    }

    pub async fn get_bot_stats(&self) -> Result<BotStats, CoreError> {
        let request = ApiRequest::get("/bots/stats");
        self.pipeline.execute(&request.bucket(), &request).await
    }

    pub async fn post_stats(&self, stats: Stats) -> Result<(), CoreError> {
        self.post_stats_until(stats, &CancellationToken::new())
            .await
    }

    /// Posts `stats`, abandoning the rate-limit wait if `cancel` fires.
    pub async fn post_stats_until(
        &self,
        stats: Stats,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        if stats.server_count == 0 {
            return Err(CoreError::InvalidInput {
                message: "server_count must be greater than zero".to_string(),
            });
        }

        let request = ApiRequest::post("/bots/stats", &stats)?;
        let _: serde_json::Value = self
            .pipeline
            .execute_until(&request.bucket(), &request, cancel)
            .await?;

        info!("Posted {} servers to Top.gg", stats.server_count);
        Ok(())
    }

    /// Up to 100 most recent voters per page; pages start at 1.
    pub async fn get_bot_votes(&self, page: u32) -> Result<Vec<Voter>, CoreError> {
        if page == 0 {
            return Err(CoreError::InvalidInput {
                message: "page must be at least 1".to_string(),
            });
        }

        let bot_id = self.own_id()?;
        let request = ApiRequest::get(format!("/bots/{}/votes", bot_id)).query("page", page);
        self.pipeline.execute(&request.bucket(), &request).await
    }

    pub async fn has_voted(&self, user_id: u64) -> Result<bool, CoreError> {
        let request = ApiRequest::get("/bots/check").query("userId", user_id);
        let check: VoteCheck = self.pipeline.execute(&request.bucket(), &request).await?;
        Ok(check.voted != 0)
    }

    pub async fn get_user(&self, user_id: u64) -> Result<User, CoreError> {
        let request = ApiRequest::get(format!("/users/{}", user_id));
        self.pipeline.execute(&request.bucket(), &request).await
    }

    pub async fn is_weekend(&self) -> Result<bool, CoreError> {
        let request = ApiRequest::get("/weekend");
        let check: WeekendCheck = self.pipeline.execute(&request.bucket(), &request).await?;
        Ok(check.is_weekend)
    }

    pub async fn metrics(&self) -> ClientMetrics {
        self.pipeline.metrics().await
    }

    pub async fn export_metrics(&self) -> Result<String, CoreError> {
        Ok(self.pipeline.metrics_collector().to_json().await?)
    }

    pub async fn rate_limit_status(&self, request: &ApiRequest) -> BucketStatus {
        self.pipeline.rate_limiter().status(&request.bucket()).await
    }

    fn own_id(&self) -> Result<u64, CoreError> {
        self.bot_id.ok_or_else(|| {
            ApiError::Unauthorized {
                reason: "no API token configured".to_string(),
            }
            .into()
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    id: serde_json::Value,
}

/// Extracts the bot id from the JSON claims in the middle section of a
/// Top.gg token.
pub fn decode_bot_id(token: &str) -> Result<u64, CoreError> {
    let mut parts = token.split('.');
    let claims = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(claims), Some(_), None) => claims.trim_end_matches('='),
        _ => return Err(ConfigError::MalformedToken.into()),
    };

    let raw = URL_SAFE_NO_PAD
        .decode(claims)
        .or_else(|_| STANDARD_NO_PAD.decode(claims))
        .map_err(|_| ConfigError::MalformedToken)?;

    let claims: TokenClaims =
        serde_json::from_slice(&raw).map_err(|_| ConfigError::MalformedToken)?;

    let id = match claims.id {
        serde_json::Value::String(id) => id.parse().ok(),
        serde_json::Value::Number(id) => id.as_u64(),
        _ => None,
    };

    id.ok_or_else(|| ConfigError::MalformedToken.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_for(claims: &str) -> String {
        format!("eyJhbGciOiJIUzI1NiJ9.{}.signature", URL_SAFE_NO_PAD.encode(claims))
    }

    #[test]
    fn test_decode_bot_id() {
        let token = token_for(r#"{"id":"264811613708746752","bot":true,"iat":1}"#);
        assert_eq!(decode_bot_id(&token).unwrap(), 264811613708746752);
    }

    #[test]
    fn test_decode_numeric_id() {
        let token = token_for(r#"{"id":42}"#);
        assert_eq!(decode_bot_id(&token).unwrap(), 42);
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["not-a-token", "a.b", "a.!!!.c", "a.b.c.d"] {
            assert!(matches!(
                decode_bot_id(token),
                Err(CoreError::Config(ConfigError::MalformedToken))
            ));
        }

        let no_id = token_for(r#"{"bot":true}"#);
        assert!(decode_bot_id(&no_id).is_err());
    }

    #[test]
    fn test_client_creation() {
        let client = TopggClient::new(token_for(r#"{"id":"1"}"#)).unwrap();
        assert_eq!(client.bot_id(), Some(1));
        assert_eq!(client.pipeline().base_url(), "https://top.gg/api");

        assert!(TopggClient::new("garbage").is_err());
    }

    #[tokio::test]
    async fn test_empty_token_fails_without_sending() {
        let client = TopggClient::new("").unwrap();
        assert_eq!(client.bot_id(), None);

        let result = client.is_weekend().await;
        assert!(matches!(
            result,
            Err(CoreError::Api(ApiError::Unauthorized { .. }))
        ));
        assert_eq!(client.metrics().await.totals.attempts, 0);
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let client = TopggClient::new(token_for(r#"{"id":"1"}"#)).unwrap();
        assert!(matches!(
            client.post_stats(Stats::new(0)).await,
            Err(CoreError::InvalidInput { .. })
        ));
        assert!(matches!(
            client.get_bot_votes(0).await,
            Err(CoreError::InvalidInput { .. })
        ));
    }
}
