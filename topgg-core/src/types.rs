use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Maximum page size accepted by `GET /bots`.
pub const MAX_BOTS_PER_PAGE: u16 = 500;

/// A Discord bot listed on Top.gg.
#[derive(Debug, Clone, Deserialize)]
pub struct Bot {
    /// Discord application id.
    #[serde(rename = "clientid", deserialize_with = "snowflake")]
    pub id: u64,
    /// Top.gg listing id.
    #[serde(rename = "id", deserialize_with = "snowflake")]
    pub topgg_id: u64,
    pub username: String,
    pub prefix: String,
    #[serde(rename = "shortdesc")]
    pub short_description: String,
    #[serde(rename = "longdesc", default, deserialize_with = "empty_as_none")]
    pub long_description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub website: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub github: Option<String>,
    #[serde(default, deserialize_with = "snowflakes")]
    pub owners: Vec<u64>,
    #[serde(rename = "date")]
    pub submitted_at: DateTime<Utc>,
    #[serde(rename = "points", default)]
    pub votes: u64,
    #[serde(rename = "monthlyPoints", default)]
    pub monthly_votes: u64,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub support: Option<String>,
    #[serde(default)]
    pub avatar: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub invite: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub vanity: Option<String>,
    #[serde(default)]
    pub server_count: Option<u64>,
    #[serde(default)]
    pub reviews: Reviews,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reviews {
    #[serde(rename = "averageScore", default)]
    pub average_score: f64,
    #[serde(default)]
    pub count: u64,
}

/// One page of `GET /bots` results.
#[derive(Debug, Clone, Deserialize)]
pub struct BotPage {
    pub results: Vec<Bot>,
    pub limit: u32,
    pub offset: u32,
    pub count: u32,
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotStats {
    #[serde(default)]
    pub server_count: Option<u64>,
}

/// Statistics posted to Top.gg by the autoposter or by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub server_count: u64,
}

impl Stats {
    pub fn new(server_count: u64) -> Self {
        Self { server_count }
    }
}

/// A user who voted for the bot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Voter {
    #[serde(deserialize_with = "snowflake")]
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "snowflake")]
    pub id: u64,
    pub username: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub avatar: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub bio: Option<String>,
    #[serde(default)]
    pub social: Socials,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub supporter: bool,
    #[serde(rename = "mod", default)]
    pub is_mod: bool,
    #[serde(rename = "webMod", default)]
    pub web_mod: bool,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Socials {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub youtube: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub reddit: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub twitter: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub instagram: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub github: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Id,
    SubmissionDate,
    MonthlyVotes,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Id => "id",
            SortBy::SubmissionDate => "date",
            SortBy::MonthlyVotes => "monthlyPoints",
        }
    }
}

/// Search parameters for `GET /bots`.
#[derive(Debug, Clone, Default)]
pub struct BotQuery {
    limit: Option<u16>,
    offset: Option<u32>,
    sort: Option<SortBy>,
    search: BTreeMap<String, String>,
    fields: Vec<String>,
}

impl BotQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamped to [`MAX_BOTS_PER_PAGE`].
    pub fn limit(mut self, limit: u16) -> Self {
        self.limit = Some(limit.min(MAX_BOTS_PER_PAGE));
        self
    }

    pub fn skip(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn sort_by(mut self, sort: SortBy) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn search(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.search.insert(field.into(), value.into());
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(5);

        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        if let Some(sort) = self.sort {
            pairs.push(("sort".to_string(), sort.as_str().to_string()));
        }
        if !self.search.is_empty() {
            let search = self
                .search
                .iter()
                .map(|(field, value)| format!("{}: {}", field, value))
                .collect::<Vec<_>>()
                .join(" ");
            pairs.push(("search".to_string(), search));
        }
        if !self.fields.is_empty() {
            pairs.push(("fields".to_string(), self.fields.join(", ")));
        }

        pairs
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(u64),
}

fn snowflake<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Number(id) => Ok(id),
        StringOrNumber::String(id) => id.parse().map_err(serde::de::Error::custom),
    }
}

fn snowflakes<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<StringOrNumber>::deserialize(deserializer)?
        .into_iter()
        .map(|id| match id {
            StringOrNumber::Number(id) => Ok(id),
            StringOrNumber::String(id) => id.parse().map_err(serde::de::Error::custom),
        })
        .collect()
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
