use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Custom deserializer for attribute maps that drops null values.
/// Hosts serialize missing attributes as `null`.
fn deserialize_nullable_string_map<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: BTreeMap<String, Option<String>> = BTreeMap::deserialize(deserializer)?;
    Ok(map
        .into_iter()
        .filter_map(|(k, v)| v.map(|val| (k, val)))
        .collect())
}

/// Classified kind of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Input,
    Change,
    Submit,
    Navigation,
    PageLoad,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Input => "input",
            ActionKind::Change => "change",
            ActionKind::Submit => "submit",
            ActionKind::Navigation => "navigation",
            ActionKind::PageLoad => "page_load",
        }
    }

    /// Kinds a content context listens for. `page_load` is synthesized on load.
    pub const LISTENED: [ActionKind; 5] = [
        ActionKind::Click,
        ActionKind::Input,
        ActionKind::Change,
        ActionKind::Submit,
        ActionKind::Navigation,
    ];
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of an execution context (a browser tab in practice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Pointer position of a click, in three reference frames.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    /// Document (page) coordinates.
    pub absolute: Point,
    pub element_relative: Point,
    pub viewport_relative: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub viewport_size: Size,
    pub scroll_offset: Point,
    pub agent_string: String,
}

/// Field value carried by input/change steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Flag(b) => write!(f, "{}", b),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// Everything known about the interacted element at capture time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementLocatorInfo {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub class_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub selector: String,
    pub xpath: String,
    pub rect: Rect,
    #[serde(default, deserialize_with = "deserialize_nullable_string_map")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementLocatorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_metadata: Option<PageMetadata>,
}

/// Encoded page image. Serialized as base64 text.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(serialize_with = "encode_base64", deserialize_with = "decode_base64")]
    pub data: Vec<u8>,
}

fn default_format() -> String {
    "png".to_string()
}

impl Screenshot {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            format: default_format(),
            data,
        }
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        let data = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Ok(Self::png(data))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screenshot")
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

fn encode_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

fn decode_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(serde::de::Error::custom)
}

/// One recorded semantic action.
///
/// `sequence` is the ordering key. The position of a step inside any list is
/// completion order, which can differ from sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub sequence: u64,
    pub action: ActionKind,
    pub payload: ActionPayload,
    pub captured_at_ms: u64,
    pub page_url: String,
    pub page_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Screenshot>,
}

impl Step {
    /// Sets the screenshot unless one is already present. Returns whether it was set.
    pub fn attach_screenshot(&mut self, screenshot: Screenshot) -> bool {
        if self.screenshot.is_some() {
            return false;
        }
        self.screenshot = Some(screenshot);
        true
    }
}

/// Sorts steps by their sequence number.
pub fn sort_by_sequence(steps: &mut [Step]) {
    steps.sort_by_key(|s| s.sequence);
}

/// State mirrored to the host's key/value storage on every transition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub is_recording: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_context_id: Option<ContextId>,
    #[serde(default)]
    pub navigation_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_flag_timestamp: Option<u64>,
}

/// How the host should carry out a navigation the engine deferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NavigationTarget {
    #[serde(rename_all = "camelCase")]
    Url {
        url: String,
        #[serde(default)]
        new_view: bool,
    },
    /// Submit the form addressed by `selector`.
    SubmitForm { selector: String },
    /// Re-dispatch the click on `selector` without interception.
    ReplayClick { selector: String },
}

/// Requests a content context sends to its host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostRequest {
    StartRecording,
    StopRecording,
    CaptureScreenshot,
    GetCurrentTabId,
    StepCaptured { step: Box<Step> },
    Navigate { target: NavigationTarget },
}

impl HostRequest {
    /// `stepCaptured` is a notification; the host never replies to it.
    pub fn expects_response(&self) -> bool {
        !matches!(self, HostRequest::StepCaptured { .. })
    }
}

/// Host replies. Untagged on the wire: `{success}`, `{screenshot}`, `{tabId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostResponse {
    Success {
        success: bool,
    },
    Screenshot {
        #[serde(deserialize_with = "present_or_null")]
        screenshot: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TabId {
        #[serde(deserialize_with = "present_or_null")]
        tab_id: Option<ContextId>,
    },
}

/// Like the derived `Option` handling, except the field must be present.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

/// Wire envelope correlating a request with its reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEnvelope<T> {
    pub id: u64,
    #[serde(flatten)]
    pub body: T,
}
