//! Command requests.
//!
//! A request names the command to run and whether it wants a terminal. On the
//! wire it travels in the query string of the connection URL:
//!
//! ```text
//! ws://host:port/path?tty=false&command=echo&command=hi
//! ```
//!
//! # Example
//!
//! ```
//! use ws_shell::ShellRequest;
//!
//! let request = ShellRequest::new(["echo", "hi"]).unwrap();
//! let url = request.to_url("ws://127.0.0.1:2222/").unwrap();
//! assert_eq!(url.as_str(), "ws://127.0.0.1:2222/?tty=false&command=echo&command=hi");
//!
//! let parsed = ShellRequest::from_request_target("/?tty=false&command=echo&command=hi").unwrap();
//! assert_eq!(parsed, request);
//! ```

use serde::{Deserialize, Deserializer};
use url::{form_urlencoded, Url};

use crate::error::{Result, ShellError};

/// Query key for the terminal flag.
const TTY_KEY: &str = "tty";

/// Query key for command arguments, repeated once per argument.
const COMMAND_KEY: &str = "command";

/// A command to run remotely.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShellRequest {
    /// Whether the command should run under a terminal.
    #[serde(default)]
    pub tty: bool,
    /// Program followed by its arguments. Never empty.
    #[serde(deserialize_with = "one_or_many")]
    pub command: Vec<String>,
}

impl ShellRequest {
    /// Create a request for `command` without a terminal.
    ///
    /// Fails if `command` is empty.
    pub fn new<I, S>(command: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = Self {
            tty: false,
            command: command.into_iter().map(Into::into).collect(),
        };
        request.validate()?;
        Ok(request)
    }

    /// Set the terminal flag.
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Parse a request from JSON.
    ///
    /// `command` may be a single string (promoted to a one-element list) or
    /// an array of strings. Any other element type is an error.
    pub fn from_json(json: &str) -> Result<Self> {
        let request: Self = serde_json::from_str(json)?;
        request.validate()?;
        Ok(request)
    }

    /// Check the request is runnable.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(ShellError::InvalidRequest(
                "command must contain at least one argument".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the connection URL for this request against `target`.
    ///
    /// `target` must be a `ws://` or `wss://` URL. Any existing query is
    /// replaced.
    pub fn to_url(&self, target: &str) -> Result<Url> {
        let mut url = Url::parse(target)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ShellError::InvalidRequest(format!(
                "url must be ws:// or wss://, got: {}",
                target
            )));
        }
        self.validate()?;

        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(TTY_KEY, if self.tty { "true" } else { "false" });
            for arg in &self.command {
                query.append_pair(COMMAND_KEY, arg);
            }
        }
        Ok(url)
    }

    /// Parse the request from an HTTP request target such as
    /// `/path?tty=true&command=bash`.
    pub fn from_request_target(target: &str) -> Result<Self> {
        let query = target.split_once('?').map(|(_, q)| q).unwrap_or("");

        let mut tty = false;
        let mut command = Vec::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                TTY_KEY => tty = value == "true",
                COMMAND_KEY => command.push(value.into_owned()),
                other => tracing::debug!(key = other, "ignoring unknown query parameter"),
            }
        }

        let request = Self { tty, command };
        request.validate()?;
        Ok(request)
    }
}

/// Accept either `"cmd"` or `["cmd", "arg", ...]`.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer) {
        Ok(OneOrMany::One(arg)) => Ok(vec![arg]),
        Ok(OneOrMany::Many(args)) => Ok(args),
        Err(_) => Err(serde::de::Error::custom(
            "command must be a string or an array of strings",
        )),
    }
}
