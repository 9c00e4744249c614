use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Bot,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub timestamp: String,
}

impl Message {
    pub fn new(kind: MessageKind, content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind,
            timestamp: timestamp.into(),
        }
    }

    /// A locally authored message stamped with the current time.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageKind::User, content, iso_timestamp(Utc::now()))
    }

    /// Two messages are the same message iff timestamp and content match.
    pub fn same_identity(&self, other: &Message) -> bool {
        self.timestamp == other.timestamp && self.content == other.content
    }
}

/// Renders a timestamp the way browsers do for `Date.toISOString()`.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessagesEnvelope {
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AuthStatus {
    #[serde(default)]
    pub authenticated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HealthStatus {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResponse {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatHistoryEntry {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VideoAnalysisEntry {
    #[serde(default)]
    pub video_name: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub timestamp: String,
}

/// The `{history: [...]}` wrapper both history endpoints answer with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History<T> {
    #[serde(default = "Vec::new")]
    pub history: Vec<T>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Pro,
    Agency,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Agency => "agency",
        }
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            v if v.eq_ignore_ascii_case("pro") => Ok(Self::Pro),
            v if v.eq_ignore_ascii_case("agency") => Ok(Self::Agency),
            other => Err(format!("unknown plan `{other}` (expected pro or agency)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Active,
    Canceled,
    PastDue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub tier: SubscriptionTier,
    pub status: SubscriptionState,
}

/// A purchasable plan as listed on the pricing page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A hosted payment page the user has to be sent to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedirectSession {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingConfig {
    #[serde(rename = "publishableKey", alias = "publishable_key")]
    pub publishable_key: String,
}

/// Error body shape the service uses; `detail` wins over `message`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn reason(&self) -> Option<String> {
        match &self.detail {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Null) | None => self.message.clone(),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Human readable `MMM d, yyyy HH:mm:ss` rendering of whatever the service
/// used as a timestamp.
pub fn format_timestamp(raw: &str) -> String {
    parse_timestamp(raw)
        .map(|at| at.format("%b %-d, %Y %H:%M:%S").to_string())
        .unwrap_or_else(|| {
            tracing::debug!(raw, "unparseable timestamp");
            "Invalid date".to_string()
        })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
