//! Declarative recording sessions: page fixtures plus a timeline of events.
//!
//! ```yaml
//! context: 1
//! pages:
//!   login:
//!     url: https://shop.test/login
//!     title: Sign in
//!     body:
//!       - tag: input
//!         attrs: { id: email, name: email }
//! events:
//!   - { at: 0, kind: start, page: login }
//!   - { at: 100, kind: input, target: "#email", value: a@b.c }
//! ```

use scribe_engine::capture::NavigationCause;
use scribe_engine::dom::{DocumentSpec, ElementSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse script: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Event at {at} ms refers to unknown page '{page}'")]
    UnknownPage { at: u64, page: String },
    #[error("Event at {at} ms has no document loaded")]
    NoDocument { at: u64 },
    #[error("Event at {at} ms: no element matches '{selector}'")]
    NoMatch { at: u64, selector: String },
    #[error("Event at {at} ms: invalid selector '{selector}': {reason}")]
    BadSelector {
        at: u64,
        selector: String,
        reason: String,
    },
    #[error("Events out of order: {at} ms follows {previous} ms")]
    OutOfOrder { at: u64, previous: u64 },
    #[error("Page '{page}' uses invalid tag or attribute name '{name}'")]
    InvalidName { page: String, name: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Identity this recording context reports to the host.
    #[serde(default = "default_context")]
    pub context: u64,
    #[serde(default)]
    pub pages: BTreeMap<String, DocumentSpec>,
    #[serde(default)]
    pub events: Vec<TimedEvent>,
}

fn default_context() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimedEvent {
    /// Milliseconds since the start of the script.
    pub at: u64,
    #[serde(flatten)]
    pub event: ScriptEvent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptEvent {
    /// Load `page` and begin recording in it.
    Start { page: String },
    /// Load `page` as a fresh context and pick up persisted state.
    Resume { page: String },
    Stop,
    /// A full document load (after a reload or a navigating click).
    Load { page: String },
    Click {
        target: String,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    Input { target: String, value: String },
    Change {
        target: String,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        checked: Option<bool>,
    },
    Submit { target: String },
    /// A same-document transition (history API or back/forward).
    Navigate {
        url: String,
        #[serde(default = "default_cause")]
        cause: NavigationCause,
    },
    /// Remove the matched element before later events refer to it.
    Detach { target: String },
}

fn default_cause() -> NavigationCause {
    NavigationCause::PushState
}

impl Script {
    pub async fn load(path: &Path) -> Result<Self, ScriptError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ScriptError> {
        let script: Script = serde_yaml::from_str(content)?;
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<(), ScriptError> {
        for (page, spec) in &self.pages {
            for element in &spec.body {
                check_names(page, element)?;
            }
        }
        let mut previous = 0;
        for timed in &self.events {
            if timed.at < previous {
                return Err(ScriptError::OutOfOrder {
                    at: timed.at,
                    previous,
                });
            }
            previous = timed.at;
            if let ScriptEvent::Start { page } | ScriptEvent::Resume { page } | ScriptEvent::Load { page } =
                &timed.event
                && !self.pages.contains_key(page)
            {
                return Err(ScriptError::UnknownPage {
                    at: timed.at,
                    page: page.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Letter first, then letters, digits, `-`, `_` or `:`.
pub(crate) fn is_markup_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

fn check_names(page: &str, element: &ElementSpec) -> Result<(), ScriptError> {
    let invalid = std::iter::once(&element.tag)
        .chain(element.attrs.keys())
        .find(|name| !is_markup_name(name));
    if let Some(name) = invalid {
        return Err(ScriptError::InvalidName {
            page: page.to_string(),
            name: name.clone(),
        });
    }
    element
        .children
        .iter()
        .try_for_each(|child| check_names(page, child))
}
