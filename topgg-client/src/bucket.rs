use reqwest::Method;
use std::fmt;

const ID_PLACEHOLDER: &str = ":id";

/// A rate-limit domain: the global bucket or one normalized route.
///
/// Numeric path segments collapse to `:id`, so `GET /bots/123` and
/// `GET /bots/456` share a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketKey {
    Global,
    Route { method: Method, template: String },
}

impl BucketKey {
    pub fn route(method: &Method, path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let template = path
            .split('/')
            .map(|segment| {
                if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                    ID_PLACEHOLDER
                } else {
                    segment
                }
            })
            .collect::<Vec<_>>()
            .join("/");

        BucketKey::Route {
            method: method.clone(),
            template,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, BucketKey::Global)
    }

    /// Whether the route falls under the shared `/bots` quota.
    pub fn is_bots_route(&self) -> bool {
        match self {
            BucketKey::Global => false,
            BucketKey::Route { template, .. } => {
                template == "/bots" || template.starts_with("/bots/")
            }
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Global => f.write_str("global"),
            BucketKey::Route { method, template } => write!(f, "{} {}", method, template),
        }
    }
}
