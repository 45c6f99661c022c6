//! Client for the Top.gg bot listing API.
//!
//! Outbound calls go through a rate-limit aware [`TopggClient`]; an
//! [`Autoposter`] publishes server counts on a timer and a [`WebhookServer`]
//! receives vote notifications. The three share no state beyond the client.

pub use topgg_autoposter as autoposter;
pub use topgg_client as client;
pub use topgg_webhook as webhook;

pub use topgg_autoposter::{AutopostConfig, AutopostError, Autoposter};
pub use topgg_client::{RateLimitConfig, RetryConfig, TopggClient};
pub use topgg_core::{
    ApiError, AppConfig, Bot, BotQuery, BotStats, BotVote, ConfigError, CoreError, ErrorExt,
    ServerVote, Stats, User, VoteEvent, VoteKind, Voter, WebhookError,
};
pub use topgg_webhook::WebhookServer;
