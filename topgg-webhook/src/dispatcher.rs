use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use topgg_core::{BotVote, ErrorExt, ServerVote, VoteEvent, VoteKind, WebhookError};
use tracing::{debug, warn};

pub type VoteHandler =
    Arc<dyn Fn(VoteEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&WebhookError) + Send + Sync>;

#[derive(Deserialize)]
#[serde(untagged)]
enum Snowflake {
    String(String),
    Number(u64),
}

impl From<Snowflake> for String {
    fn from(id: Snowflake) -> Self {
        match id {
            Snowflake::String(id) => id,
            Snowflake::Number(id) => id.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawVote {
    #[serde(rename = "type")]
    kind: String,
    user: Snowflake,
    #[serde(default)]
    bot: Option<Snowflake>,
    #[serde(default, alias = "server")]
    guild: Option<Snowflake>,
    #[serde(rename = "isWeekend", default)]
    is_weekend: Option<bool>,
    #[serde(default)]
    query: Option<String>,
}

/// Parses a webhook body. The `bot` field selects a bot vote and `guild`
/// (or `server`) a server vote; `type` must be `upvote` or `test`.
pub fn parse_vote_event(body: &[u8]) -> Result<VoteEvent, WebhookError> {
    let raw: RawVote = serde_json::from_slice(body).map_err(|e| WebhookError::MalformedPayload {
        details: e.to_string(),
    })?;

    let kind = match raw.kind.as_str() {
        "upvote" => VoteKind::Upvote,
        "test" => VoteKind::Test,
        other => {
            return Err(WebhookError::MalformedPayload {
                details: format!("unknown vote type `{}`", other),
            })
        }
    };

    let voter_id = String::from(raw.user);
    let is_weekend = raw.is_weekend.unwrap_or(false);
    let query = raw.query.as_deref().map(parse_query).unwrap_or_default();

    match (raw.bot, raw.guild) {
        (Some(bot), _) => Ok(VoteEvent::Bot(BotVote {
            voter_id,
            bot_id: bot.into(),
            kind,
            is_weekend,
            query,
        })),
        (None, Some(guild)) => Ok(VoteEvent::Server(ServerVote {
            voter_id,
            server_id: guild.into(),
            kind,
            is_weekend,
            query,
        })),
        (None, None) => Err(WebhookError::MalformedPayload {
            details: "payload names neither a bot nor a server".to_string(),
        }),
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

#[derive(Clone)]
pub struct WebhookRoute {
    pub secret: String,
    handler: VoteHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran, whether or not it succeeded.
    Delivered,
    NotFound,
    Unauthorized,
    Malformed,
}

/// Path to route registry. Authenticates, parses and hands each delivery to
/// its handler.
#[derive(Default)]
pub struct VoteEventDispatcher {
    routes: RwLock<HashMap<String, WebhookRoute>>,
    error_hook: RwLock<Option<ErrorHook>>,
}

impl VoteEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handler already registered for `path`. An empty secret
    /// accepts every caller.
    pub fn register_route<F, Fut>(&self, path: impl Into<String>, secret: impl Into<String>, handler: F)
    where
        F: Fn(VoteEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let path = path.into();
        let route = WebhookRoute {
            secret: secret.into(),
            handler: Arc::new(move |event| handler(event).boxed()),
        };

        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.insert(path.clone(), route).is_some() {
            debug!("Replaced webhook handler for {}", path);
        } else {
            debug!("Registered webhook handler for {}", path);
        }
    }

    pub fn remove_route(&self, path: &str) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.remove(path).is_some()
    }

    pub fn has_route(&self, path: &str) -> bool {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes.contains_key(path)
    }

    pub fn set_error_hook(&self, hook: ErrorHook) {
        let mut slot = self.error_hook.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(hook);
    }

    pub async fn dispatch(
        &self,
        path: &str,
        authorization: Option<&[u8]>,
        body: &[u8],
    ) -> DispatchOutcome {
        let route = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            routes.get(path).cloned()
        };
        let Some(route) = route else {
            return DispatchOutcome::NotFound;
        };

        if !route.secret.is_empty() && authorization != Some(route.secret.as_bytes()) {
            WebhookError::Unauthorized {
                path: path.to_string(),
            }
            .log_warn();
            return DispatchOutcome::Unauthorized;
        }

        let event = match parse_vote_event(body) {
            Ok(event) => event,
            Err(e) => {
                e.log_warn();
                return DispatchOutcome::Malformed;
            }
        };

        debug!(
            "Dispatching {:?} vote from {} on {}",
            event.kind(),
            event.voter_id(),
            path
        );

        // The handler is called inside the task so a panic while building
        // its future is contained too.
        let handler = route.handler.clone();
        let failure = match tokio::spawn(async move { handler(event).await }).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(join_error) if join_error.is_panic() => Some("handler panicked".to_string()),
            Err(join_error) => Some(join_error.to_string()),
        };

        if let Some(message) = failure {
            self.report(WebhookError::HandlerFailed {
                path: path.to_string(),
                message,
            });
        }

        DispatchOutcome::Delivered
    }

    fn report(&self, error: WebhookError) {
        let hook = self
            .error_hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match hook {
            Some(hook) => hook(&error),
            None => {
                warn!("Unhandled webhook handler failure: {}", error);
            }
        }
    }
}
