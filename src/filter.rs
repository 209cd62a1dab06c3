use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::record::{is_truthy, scalar_to_string};

/// User-selected message filters. All active filters are ANDed; an unset
/// option never rejects anything.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub incoming_only: bool,
    pub outgoing_only: bool,
    pub from_user: Option<String>,
    pub pattern: Option<String>,
    pub has_media: bool,
    pub forwarded_only: bool,
    pub replies_only: bool,
    pub has_reactions: bool,
}

/// Compiled, validated form of [`FilterOptions`].
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    direction: Option<bool>,
    from_user: Option<String>,
    pattern: Option<Regex>,
    require: Vec<&'static str>,
}

impl MessageFilter {
    pub fn new(options: &FilterOptions) -> Result<Self> {
        if options.incoming_only && options.outgoing_only {
            anyhow::bail!("--incoming-only and --outgoing-only are mutually exclusive");
        }

        let direction = match (options.incoming_only, options.outgoing_only) {
            (true, _) => Some(false),
            (_, true) => Some(true),
            _ => None,
        };

        let pattern = options
            .pattern
            .as_deref()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("Invalid --pattern regex: {}", p))
            })
            .transpose()?;

        let require = [
            (options.has_media, "media"),
            (options.forwarded_only, "fwd_from"),
            (options.replies_only, "reply_to"),
            (options.has_reactions, "reactions"),
        ]
        .into_iter()
        .filter_map(|(on, field)| on.then_some(field))
        .collect();

        Ok(Self {
            direction,
            from_user: options.from_user.clone(),
            pattern,
            require,
        })
    }

    /// A filter that keeps every record.
    #[cfg(test)]
    pub fn pass_all() -> Self {
        Self::default()
    }

    pub fn is_pass_all(&self) -> bool {
        self.direction.is_none()
            && self.from_user.is_none()
            && self.pattern.is_none()
            && self.require.is_empty()
    }

    /// Decide whether a raw record is kept. Missing or wrong-typed fields never match.
    pub fn keep(&self, record: &Value) -> bool {
        if let Some(want_out) = self.direction {
            let is_out = record.get("out") == Some(&Value::Bool(true));
            if is_out != want_out {
                return false;
            }
        }

        if let Some(ref wanted) = self.from_user {
            let sender = record
                .get("from_id")
                .and_then(|from| from.get("user_id"))
                .filter(|id| is_truthy(id))
                .and_then(scalar_to_string);
            if sender.as_deref() != Some(wanted.as_str()) {
                return false;
            }
        }

        if let Some(ref pattern) = self.pattern {
            let body = match record.get("message") {
                None | Some(Value::Null) => "",
                Some(Value::String(s)) => s.as_str(),
                Some(_) => return false,
            };
            if !pattern.is_match(body) {
                return false;
            }
        }

        self.require
            .iter()
            .all(|field| record.get(*field).is_some_and(is_truthy))
    }
}
