//! Ordered, phase-scoped modifier execution.
//!
//! # Responsibilities
//! - Compile configured modifiers and freeze them in execution order
//! - Select the modifiers for one (content type, phase) pair
//! - Run each selected modifier atomically and report failures
//!
//! # Design Decisions
//! - Order is priority ascending, ties in declaration order (stable sort)
//! - Content types match exactly or when registered by the same provider
//! - A failed modifier leaves the document as it was before that modifier ran

use std::sync::Arc;

use rhai::AST;

use crate::config::ModifierConfig;
use crate::content::{normalize_mime, ContentRegistry};
use crate::document::{Document, DocumentError};
use crate::modifier::engine::{ScriptDocument, ScriptEngine};
use crate::modifier::{ModifierError, Phase};
use crate::observability::metrics;
use crate::routing::UrlRewrite;

/// A compiled modifier.
#[derive(Debug, Clone)]
pub struct Modifier {
    name: String,
    priority: i64,
    phase: Phase,
    target_content_type: String,
    ast: Arc<AST>,
}

impl Modifier {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Normalized target MIME type.
    pub fn target_content_type(&self) -> &str {
        &self.target_content_type
    }
}

/// Why a modifier did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    PathNotFound,
    Fault,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::PathNotFound => "path_not_found",
            FailureKind::Fault => "fault",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierFailure {
    pub modifier: String,
    pub content_type: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Modifiers that completed, in execution order.
    pub applied: Vec<String>,
    pub failures: Vec<ModifierFailure>,
}

/// The process-wide, immutable set of modifiers.
#[derive(Debug)]
pub struct ModifierSet {
    engine: ScriptEngine,
    modifiers: Vec<Modifier>,
    registry: ContentRegistry,
}

impl ModifierSet {
    /// Compile every configured modifier. Fails on the first script that does not compile.
    pub fn compile(configs: &[ModifierConfig], registry: ContentRegistry) -> Result<Self, ModifierError> {
        let engine = ScriptEngine::new();
        let mut modifiers = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let name = config
                .name
                .clone()
                .unwrap_or_else(|| format!("modifier-{}", index + 1));
            let ast = engine.compile(&config.script).map_err(|e| ModifierError::Compile {
                modifier: name.clone(),
                message: e.to_string(),
            })?;
            modifiers.push(Modifier {
                name,
                priority: config.priority,
                phase: config.phase,
                target_content_type: normalize_mime(&config.target_content_type),
                ast: Arc::new(ast),
            });
        }
        // `sort_by_key` is stable: equal priorities keep declaration order.
        modifiers.sort_by_key(|m| m.priority);

        tracing::info!(count = modifiers.len(), "Modifiers compiled");
        Ok(Self {
            engine,
            modifiers,
            registry,
        })
    }

    pub fn empty(registry: ContentRegistry) -> Self {
        Self {
            engine: ScriptEngine::new(),
            modifiers: Vec::new(),
            registry,
        }
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.registry
    }

    /// All modifiers in execution order.
    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    /// Modifiers that apply to `content_type` during `phase`, in execution order.
    pub fn matching<'a>(&'a self, content_type: &'a str, phase: Phase) -> impl Iterator<Item = &'a Modifier> + 'a {
        self.modifiers.iter().filter(move |m| {
            m.phase == phase && self.registry.same_family(&m.target_content_type, content_type)
        })
    }

    pub fn has_modifiers(&self, content_type: &str, phase: Phase) -> bool {
        self.matching(content_type, phase).next().is_some()
    }

    /// Run the matching modifiers against `document`.
    ///
    /// Values written by scripts pass through `rewrite`. Each modifier runs
    /// against the document as left by the previous one.
    pub fn apply(
        &self,
        document: Document,
        content_type: &str,
        phase: Phase,
        rewrite: Option<UrlRewrite>,
    ) -> (Document, PipelineReport) {
        let mut report = PipelineReport::default();
        let selected: Vec<&Modifier> = self.matching(content_type, phase).collect();
        if selected.is_empty() {
            return (document, report);
        }

        let handle = ScriptDocument::new(document.clone(), rewrite);
        let mut last_good = document;

        for modifier in selected {
            let span = tracing::debug_span!("modifier", name = %modifier.name, phase = %phase);
            let _enter = span.enter();

            let outcome = self.engine.run(&modifier.ast, &handle, phase, content_type);
            let recorded = handle.take_error();
            match outcome {
                Ok(()) => {
                    if let Some(document) = handle.snapshot() {
                        last_good = document;
                    }
                    tracing::debug!(content_type = %content_type, "Modifier applied");
                    report.applied.push(modifier.name.clone());
                }
                Err(err) => {
                    let message = err.to_string();
                    let kind = match recorded {
                        Some(DocumentError::PathNotFound(_)) => FailureKind::PathNotFound,
                        _ => FailureKind::Fault,
                    };
                    handle.restore(last_good.clone());

                    tracing::warn!(
                        modifier = %modifier.name,
                        content_type = %content_type,
                        phase = %phase,
                        kind = kind.as_str(),
                        error = %message,
                        "Modifier failed; its changes were discarded"
                    );
                    metrics::record_modifier_failure(&modifier.name, kind.as_str());
                    report.failures.push(ModifierFailure {
                        modifier: modifier.name.clone(),
                        content_type: content_type.to_string(),
                        kind,
                        message,
                    });
                }
            }
        }

        let document = handle.into_document().unwrap_or(last_good);
        (document, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::default_content_providers;
    use crate::content::{Abstraction, MediaType};

    fn modifier(name: &str, priority: i64, phase: Phase, target: &str, script: &str) -> ModifierConfig {
        ModifierConfig {
            name: Some(name.to_string()),
            priority,
            phase,
            target_content_type: target.to_string(),
            script: script.to_string(),
        }
    }

    fn set(configs: &[ModifierConfig]) -> ModifierSet {
        ModifierSet::compile(configs, ContentRegistry::from_config(&default_content_providers())).unwrap()
    }

    fn parse(abstraction: Abstraction, content_type: &str, body: &str) -> Document {
        abstraction
            .parse(body.as_bytes(), &MediaType::parse(content_type).unwrap())
            .unwrap()
    }

    fn append(tag: &str) -> String {
        format!(r#"document.append_child("/", "x").set_inner_content("{tag}");"#)
    }

    #[test]
    fn test_priority_then_declaration_order() {
        let modifiers = set(&[
            modifier("C", 2, Phase::Response, "text/javascript", &append("C")),
            modifier("A", 1, Phase::Response, "text/javascript", &append("A")),
            modifier("B", 1, Phase::Response, "text/javascript", &append("B")),
        ]);

        for _ in 0..3 {
            let document = parse(Abstraction::JavaScript, "text/javascript", "");
            let (document, report) = modifiers.apply(document, "text/javascript", Phase::Response, None);
            assert_eq!(report.applied, vec!["A", "B", "C"]);
            assert_eq!(Abstraction::JavaScript.serialize(&document), b"ABC".to_vec());
        }
    }

    #[test]
    fn test_phase_and_type_filtering() {
        let modifiers = set(&[
            modifier("html", 1, Phase::Response, "text/html", "throw \"must not run\";"),
            modifier("request-js", 1, Phase::Request, "text/javascript", "throw \"must not run\";"),
            modifier("alias", 1, Phase::Response, "\u{200B}Text/X-JavaScript", &append("!")),
        ]);

        assert!(!modifiers.has_modifiers("application/json", Phase::Response));
        assert!(modifiers.has_modifiers("text/html; charset=utf-8", Phase::Response));
        assert!(!modifiers.has_modifiers("text/html", Phase::Request));

        let json = parse(Abstraction::Json, "application/json", "{}");
        let (json, report) = modifiers.apply(json, "application/json", Phase::Response, None);
        assert_eq!(report, PipelineReport::default());
        assert!(!json.is_dirty());

        let js = parse(Abstraction::JavaScript, "application/javascript", "x");
        let (js, report) = modifiers.apply(js, "application/javascript", Phase::Response, None);
        assert_eq!(report.applied, vec!["alias"]);
        assert_eq!(Abstraction::JavaScript.serialize(&js), b"x!".to_vec());
    }

    #[test]
    fn test_fault_rolls_back_and_later_modifier_runs() {
        let modifiers = set(&[
            modifier(
                "broken",
                1,
                Phase::Response,
                "text/html",
                r#"
                    let div = document.append_child("/html/body", "div");
                    div.set_attribute("id", "half-done");
                    throw "boom";
                "#,
            ),
            modifier(
                "footer",
                2,
                Phase::Response,
                "text/html",
                r#"
                    let div = document.append_child("/html/body", "div");
                    div.set_attribute("id", "x");
                    document.commit();
                "#,
            ),
        ]);

        let document = parse(Abstraction::Html, "text/html", "<html><body></body></html>");
        let (document, report) = modifiers.apply(document, "text/html", Phase::Response, None);

        assert_eq!(report.applied, vec!["footer"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].modifier, "broken");
        assert_eq!(report.failures[0].kind, FailureKind::Fault);
        assert_eq!(report.failures[0].content_type, "text/html");

        let out = String::from_utf8(Abstraction::Html.serialize(&document)).unwrap();
        assert_eq!(out, "<html><head></head><body><div id=\"x\"></div></body></html>");
    }

    #[test]
    fn test_path_not_found_is_reported_separately() {
        let modifiers = set(&[modifier(
            "needs-footer",
            1,
            Phase::Request,
            "application/x-www-form-urlencoded",
            r#"
                document.select_one("/a").set_inner_content("changed");
                document.append_child("/footer", "b");
            "#,
        )]);

        let form = parse(Abstraction::Form, "application/x-www-form-urlencoded", "a=1");
        let (form, report) = modifiers.apply(form, "application/x-www-form-urlencoded", Phase::Request, None);

        assert_eq!(report.failures[0].kind, FailureKind::PathNotFound);
        assert_eq!(Abstraction::Form.serialize(&form), b"a=1".to_vec());
    }

    #[test]
    fn test_caught_path_miss_then_throw_is_fault() {
        let modifiers = set(&[modifier(
            "recovers-then-throws",
            1,
            Phase::Request,
            "application/x-www-form-urlencoded",
            r#"
                try {
                    document.append_child("/footer", "b");
                } catch (err) {
                    document.select_one("/a").set_inner_content("fallback");
                }
                throw "gave up";
            "#,
        )]);

        let form = parse(Abstraction::Form, "application/x-www-form-urlencoded", "a=1");
        let (form, report) = modifiers.apply(form, "application/x-www-form-urlencoded", Phase::Request, None);

        assert_eq!(report.failures[0].kind, FailureKind::Fault);
        assert_eq!(Abstraction::Form.serialize(&form), b"a=1".to_vec());
    }

    #[test]
    fn test_compile_error_names_modifier() {
        let err = ModifierSet::compile(
            &[modifier("bad", 1, Phase::Response, "text/html", "let = ;")],
            ContentRegistry::from_config(&default_content_providers()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("`bad`"));
    }
}
