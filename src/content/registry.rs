//! MIME type → abstraction lookup.
//!
//! # Responsibilities
//! - Hold the ordered content-provider registrations from configuration
//! - Normalize MIME strings on both registration and lookup
//! - Answer whether two MIME types belong to the same registration (aliases)

use std::collections::HashMap;

use crate::config::ContentProviderConfig;
use crate::content::{normalize_mime, Abstraction};

#[derive(Debug, Clone)]
struct Registration {
    abstraction: Abstraction,
    mime_types: Vec<String>,
}

/// Registry of content abstractions keyed by normalized MIME type.
#[derive(Debug, Clone, Default)]
pub struct ContentRegistry {
    registrations: Vec<Registration>,
    index: HashMap<String, usize>,
}

impl ContentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(providers: &[ContentProviderConfig]) -> Self {
        let mut registry = Self::new();
        for provider in providers {
            registry.register(provider.abstraction, &provider.mime_types);
        }
        registry
    }

    /// Register `abstraction` for every MIME type in `mime_types`.
    ///
    /// The first registration of a MIME type wins.
    pub fn register<I, S>(&mut self, abstraction: Abstraction, mime_types: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let slot = self.registrations.len();
        let mut normalized = Vec::new();
        for raw in mime_types {
            let mime = normalize_mime(raw.as_ref());
            if mime.is_empty() {
                continue;
            }
            if let Some(existing) = self.index.get(&mime) {
                tracing::debug!(
                    mime = %mime,
                    registered = %self.registrations[*existing].abstraction,
                    ignored = %abstraction,
                    "MIME type already registered"
                );
                continue;
            }
            self.index.insert(mime.clone(), slot);
            normalized.push(mime);
        }
        self.registrations.push(Registration {
            abstraction,
            mime_types: normalized,
        });
    }

    /// Abstraction responsible for `mime_type`, if any.
    pub fn resolve(&self, mime_type: &str) -> Option<Abstraction> {
        self.index
            .get(&normalize_mime(mime_type))
            .map(|slot| self.registrations[*slot].abstraction)
    }

    pub fn is_registered(&self, mime_type: &str) -> bool {
        self.index.contains_key(&normalize_mime(mime_type))
    }

    /// True when both MIME types are equal after normalization or were registered together.
    pub fn same_family(&self, a: &str, b: &str) -> bool {
        let a = normalize_mime(a);
        let b = normalize_mime(b);
        if a == b {
            return true;
        }
        match (self.index.get(&a), self.index.get(&b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Every registered (abstraction, normalized MIME type) pair in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (Abstraction, &str)> {
        self.registrations.iter().flat_map(|registration| {
            registration
                .mime_types
                .iter()
                .map(move |mime| (registration.abstraction, mime.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::default_content_providers;

    #[test]
    fn test_default_registrations_resolve() {
        let registry = ContentRegistry::from_config(&default_content_providers());

        assert_eq!(registry.resolve("text/html; charset=utf-8"), Some(Abstraction::Html));
        assert_eq!(registry.resolve("APPLICATION/JSON"), Some(Abstraction::Json));
        assert_eq!(registry.resolve("multipart/form-data; boundary=x"), Some(Abstraction::Form));
        assert_eq!(registry.resolve("application/x-www-form-urlencoded"), Some(Abstraction::Form));
        assert_eq!(registry.resolve("image/png"), None);
    }

    #[test]
    fn test_invisible_characters_do_not_matter() {
        let registry = ContentRegistry::from_config(&default_content_providers());

        // The default list carries a zero-width space in front of this alias.
        assert_eq!(registry.resolve("text/x-javascript"), Some(Abstraction::JavaScript));
        assert_eq!(registry.resolve("\u{200B}TEXT/X-JavaScript"), Some(Abstraction::JavaScript));
    }

    #[test]
    fn test_same_family_aliases() {
        let registry = ContentRegistry::from_config(&default_content_providers());

        assert!(registry.same_family("text/javascript", "application/x-javascript"));
        assert!(registry.same_family("Text/Html", "text/html;charset=utf-8"));
        assert!(!registry.same_family("text/html", "application/json"));
        assert!(!registry.same_family("image/png", "image/gif"));
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = ContentRegistry::new();
        registry.register(Abstraction::Json, ["text/plain"]);
        registry.register(Abstraction::JavaScript, ["text/plain", "text/js"]);

        assert_eq!(registry.resolve("text/plain"), Some(Abstraction::Json));
        assert_eq!(registry.resolve("text/js"), Some(Abstraction::JavaScript));
        assert_eq!(registry.entries().count(), 2);
    }
}
