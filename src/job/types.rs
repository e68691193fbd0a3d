use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Extraction workflow a job drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    FetchInfo,
    FetchFirstPage,
    FetchGivenPage,
    RefreshCookie,
    GetSupportedServices,
    FetchSponsorblockSegmentList,
    SubmitSponsorblockSegment,
    VoteSponsorblockSegment,
}

impl JobType {
    pub const ALL: [JobType; 8] = [
        JobType::FetchInfo,
        JobType::FetchFirstPage,
        JobType::FetchGivenPage,
        JobType::RefreshCookie,
        JobType::GetSupportedServices,
        JobType::FetchSponsorblockSegmentList,
        JobType::SubmitSponsorblockSegment,
        JobType::VoteSponsorblockSegment,
    ];

    /// Wire name, also used as the error log task label
    pub fn name(&self) -> &'static str {
        match self {
            JobType::FetchInfo => "FETCH_INFO",
            JobType::FetchFirstPage => "FETCH_FIRST_PAGE",
            JobType::FetchGivenPage => "FETCH_GIVEN_PAGE",
            JobType::RefreshCookie => "REFRESH_COOKIE",
            JobType::GetSupportedServices => "GET_SUPPORTED_SERVICES",
            JobType::FetchSponsorblockSegmentList => "FETCH_SPONSORBLOCK_SEGMENT_LIST",
            JobType::SubmitSponsorblockSegment => "SUBMIT_SPONSORBLOCK_SEGMENT",
            JobType::VoteSponsorblockSegment => "VOTE_SPONSORBLOCK_SEGMENT",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobType {
    type Err = String;

    /// Accepts `FETCH_INFO`, `fetch_info` and `fetch-info`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_uppercase();
        JobType::ALL
            .iter()
            .copied()
            .find(|job_type| job_type.name() == normalized)
            .ok_or_else(|| format!("unknown job type: {}", s))
    }
}

/// Outcome the remote handler reports for a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Complete,
    Continue,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
}

/// Declarative HTTP request the handler wants the client to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub method: RequestMethod,

    pub url: String,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON body, only meaningful for POST
    #[serde(default)]
    pub body: Option<String>,

    /// Return the body as base64 of the raw bytes instead of text
    #[serde(default)]
    pub should_return_base64_bytes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTask {
    /// Handler-assigned identifier, used only to correlate results
    pub task_id: String,

    pub payload: RequestPayload,
}

/// Outcome of one client task, correlated by task identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,

    /// Text body, or base64 of the bytes
    pub result: Option<String>,

    /// Response headers flattened to single values
    pub response_header: Option<HashMap<String, String>>,
}

/// Terminal failure of a whole job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatalError {
    /// Stable error code
    pub code: String,

    pub stack_trace: String,

    /// Error log record id, written once by the driver
    #[serde(default)]
    pub error_id: Option<i64>,
}

/// One page of items plus the cursor for the next one
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedData {
    #[serde(default)]
    pub item_list: Vec<Value>,

    #[serde(default)]
    pub next_page_url: Option<String>,
}

/// Output of an extraction workflow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResult {
    #[serde(default)]
    pub info: Option<Value>,

    #[serde(default)]
    pub paged_data: Option<PagedData>,

    #[serde(default)]
    pub fatal_error: Option<FatalError>,
}

impl ExtractResult {
    /// Whether the result carries info or paged data
    pub fn has_payload(&self) -> bool {
        self.info.as_ref().map_or(false, |info| !info.is_null()) || self.paged_data.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.fatal_error.is_some()
    }

    /// Decode the info entity into the shape the caller's job type produces
    pub fn info_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.info {
            Some(info) if !info.is_null() => serde_json::from_value(info.clone()).map(Some),
            _ => Ok(None),
        }
    }

    /// Decode the paged items into the shape the caller's job type produces
    pub fn items_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, serde_json::Error> {
        match &self.paged_data {
            Some(paged) => paged.item_list
                .iter()
                .map(|item| serde_json::from_value(item.clone()))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Resolve both entity shapes at once
    pub fn decode<I, P>(&self) -> Result<TypedExtract<I, P>, serde_json::Error>
    where
        I: DeserializeOwned,
        P: DeserializeOwned,
    {
        let items = match &self.paged_data {
            Some(_) => Some(self.items_as::<P>()?),
            None => None,
        };

        Ok(TypedExtract {
            info: self.info_as::<I>()?,
            items,
            next_page_url: self.paged_data.as_ref().and_then(|p| p.next_page_url.clone()),
            fatal_error: self.fatal_error.clone(),
        })
    }
}

/// `ExtractResult` resolved into concrete entity types
#[derive(Debug, Clone, PartialEq)]
pub struct TypedExtract<I, P> {
    pub info: Option<I>,
    pub items: Option<Vec<P>>,
    pub next_page_url: Option<String>,
    pub fatal_error: Option<FatalError>,
}

/// Cookie for a service plus its absolute expiry (epoch seconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieInfo {
    pub cookie: Option<String>,
    pub time_out: i64,
}

impl CookieInfo {
    pub fn new(cookie: impl Into<String>, time_out: i64) -> Self {
        Self {
            cookie: Some(cookie.into()),
            time_out,
        }
    }

    pub fn is_expired_at(&self, now_epoch_secs: i64) -> bool {
        now_epoch_secs >= self.time_out
    }
}

/// State round-tripped between rounds and kept in the session cache
///
/// On the wire every state is a JSON object tagged by `kind`. Only the
/// `cached_extract` and `pre_fetch_payload` kinds are interpreted here; any
/// other value belongs to the handler and is kept exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// A finished result, served directly for `cache://` URLs
    CachedExtract { data: ExtractResult },

    /// Caller-supplied raw payload for jobs that start from local data
    PreFetchPayload { payload: String },

    /// Handler-defined state, including its `kind`, passed through untouched
    Workflow(Value),
}

const CACHED_EXTRACT: &str = "cached_extract";
const PRE_FETCH_PAYLOAD: &str = "pre_fetch_payload";

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum KnownStateRef<'a> {
    CachedExtract { data: &'a ExtractResult },
    PreFetchPayload { payload: &'a str },
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum KnownState {
    CachedExtract { data: ExtractResult },
    PreFetchPayload { payload: String },
}

impl SessionState {
    pub fn kind(&self) -> &str {
        match self {
            SessionState::CachedExtract { .. } => CACHED_EXTRACT,
            SessionState::PreFetchPayload { .. } => PRE_FETCH_PAYLOAD,
            SessionState::Workflow(value) => value.get("kind").and_then(Value::as_str).unwrap_or("workflow"),
        }
    }
}

impl Serialize for SessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SessionState::CachedExtract { data } => KnownStateRef::CachedExtract { data }.serialize(serializer),
            SessionState::PreFetchPayload { payload } => KnownStateRef::PreFetchPayload { payload }.serialize(serializer),
            SessionState::Workflow(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for SessionState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        match value.get("kind").and_then(Value::as_str) {
            Some(CACHED_EXTRACT) | Some(PRE_FETCH_PAYLOAD) => {
                let known = serde_json::from_value::<KnownState>(value).map_err(<D::Error as de::Error>::custom)?;
                Ok(match known {
                    KnownState::CachedExtract { data } => SessionState::CachedExtract { data },
                    KnownState::PreFetchPayload { payload } => SessionState::PreFetchPayload { payload },
                })
            },
            _ => Ok(SessionState::Workflow(value)),
        }
    }
}

/// One round's request to the remote handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub session_id: Option<String>,
    pub job_type: JobType,
    pub url: Option<String>,

    /// Only populated on rounds following a CONTINUE
    pub results: Option<Vec<TaskResult>>,

    pub service_id: Option<String>,
    pub cookie: Option<String>,
    pub state: Option<SessionState>,
}

/// One round's answer from the remote handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub status: JobStatus,

    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub tasks: Option<Vec<ClientTask>>,

    #[serde(default)]
    pub state: Option<SessionState>,

    #[serde(default)]
    pub result: Option<ExtractResult>,
}
