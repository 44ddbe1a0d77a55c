//! Serving ↔ downstream host mapping.
//!
//! # Responsibilities
//! - Rewrite the authority/scheme of every forwarded request
//! - Rewrite absolute URLs in headers and modifier output between origins

use std::borrow::Cow;

use axum::http::Uri;
use url::Url;

use crate::config::HostMappingConfig;
use crate::modifier::Phase;

/// The serving → downstream rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMapping {
    serving_host: String,
    serving_scheme: String,
    downstream_host: String,
    downstream_scheme: String,
}

impl HostMapping {
    pub fn new(
        serving_host: impl Into<String>,
        serving_scheme: impl Into<String>,
        downstream_host: impl Into<String>,
        downstream_scheme: impl Into<String>,
    ) -> Self {
        Self {
            serving_host: serving_host.into().to_ascii_lowercase(),
            serving_scheme: serving_scheme.into().to_ascii_lowercase(),
            downstream_host: downstream_host.into().to_ascii_lowercase(),
            downstream_scheme: downstream_scheme.into().to_ascii_lowercase(),
        }
    }

    pub fn from_config(config: &HostMappingConfig) -> Self {
        Self::new(
            &config.serving_host,
            &config.serving_scheme,
            &config.downstream_host,
            &config.downstream_scheme,
        )
    }

    pub fn serving_host(&self) -> &str {
        &self.serving_host
    }

    pub fn serving_scheme(&self) -> &str {
        &self.serving_scheme
    }

    pub fn downstream_host(&self) -> &str {
        &self.downstream_host
    }

    pub fn downstream_scheme(&self) -> &str {
        &self.downstream_scheme
    }

    /// `scheme://host` clients use.
    pub fn serving_origin(&self) -> String {
        format!("{}://{}", self.serving_scheme, self.serving_host)
    }

    /// `scheme://host` of the origin server.
    pub fn downstream_origin(&self) -> String {
        format!("{}://{}", self.downstream_scheme, self.downstream_host)
    }

    /// Downstream URL for an inbound request URI. Only path and query are kept.
    pub fn downstream_url(&self, uri: &Uri) -> Result<Url, url::ParseError> {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        Url::parse(&format!("{}{}", self.downstream_origin(), path_and_query))
    }

    /// Rewrite absolute serving-origin URLs in `text` to the downstream origin.
    pub fn to_downstream<'a>(&self, text: &'a str) -> Cow<'a, str> {
        UrlRewrite::new(self.serving_origin(), self.downstream_origin()).apply(text)
    }

    /// Rewrite absolute downstream-origin URLs in `text` to the serving origin.
    pub fn to_serving<'a>(&self, text: &'a str) -> Cow<'a, str> {
        UrlRewrite::new(self.downstream_origin(), self.serving_origin()).apply(text)
    }

    /// Rewrite applied to values a modifier writes during `phase`.
    ///
    /// Request bodies travel downstream, response bodies travel to the client.
    pub fn rewrite_for(&self, phase: Phase) -> UrlRewrite {
        match phase {
            Phase::Request => UrlRewrite::new(self.serving_origin(), self.downstream_origin()),
            Phase::Response => UrlRewrite::new(self.downstream_origin(), self.serving_origin()),
        }
    }
}

/// Replaces one absolute origin with another inside arbitrary text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRewrite {
    from: String,
    to: String,
}

impl UrlRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into().to_ascii_lowercase(),
            to: to.into(),
        }
    }

    /// Replace every occurrence of the `from` origin that ends on an origin boundary.
    ///
    /// `https://origin.local.evil` and `https://origin.local:8443` are left alone.
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.from.is_empty() || self.from == self.to {
            return Cow::Borrowed(text);
        }
        // ASCII lowercasing keeps byte offsets stable.
        let folded = text.to_ascii_lowercase();
        let mut out: Option<String> = None;
        let mut copied = 0;
        let mut search = 0;
        while let Some(found) = folded[search..].find(&self.from) {
            let start = search + found;
            let end = start + self.from.len();
            search = end;
            let boundary = text[end..].chars().next().map_or(true, |c| !is_origin_char(c));
            if !boundary {
                continue;
            }
            let buf = out.get_or_insert_with(|| String::with_capacity(text.len()));
            buf.push_str(&text[copied..start]);
            buf.push_str(&self.to);
            copied = end;
        }
        match out {
            Some(mut buf) => {
                buf.push_str(&text[copied..]);
                Cow::Owned(buf)
            }
            None => Cow::Borrowed(text),
        }
    }
}

fn is_origin_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_' | '@')
}
