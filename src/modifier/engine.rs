//! Sandboxed rhai engine and the document API exposed to modifier scripts.
//!
//! # Responsibilities
//! - Compile modifier scripts into reusable ASTs
//! - Bind the document manipulation API as `Document` / `Node` methods
//! - Bound script execution (operations, call depth, string and array sizes)
//!
//! # Script API
//! ```text
//! document.select_one(path)      -> Node or ()
//! document.select_all(path)      -> [Node]
//! document.exists(path)          -> bool
//! document.append_child(path, n) -> Node        (throws if path matches nothing)
//! document.remove(path)          -> int
//! document.attribute(path)       -> string or () (path ends in /@attr)
//! document.replace_text(a, b)    -> int
//! document.root()                -> Node
//! document.commit()
//!
//! node.set_attribute(n, v)   node.get_attribute(n)   node.remove_attribute(n)
//! node.set_inner_content(v)  node.set_text(v)        node.inner_content()
//! node.append_child(n)       node.remove()           node.name()   node.path()
//! ```
//! Scope constants: `phase` ("request" | "response") and `content_type`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use rhai::{Array, Dynamic, Engine, EvalAltResult, ParseError, Scope, AST};

use crate::document::{Document, DocumentError, NodeId};
use crate::modifier::Phase;
use crate::routing::UrlRewrite;

const MAX_OPERATIONS: u64 = 1_000_000;
const MAX_CALL_LEVELS: usize = 32;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FUNCTION_EXPR_DEPTH: usize = 32;
const MAX_STRING_SIZE: usize = 16 * 1024 * 1024;
const MAX_ARRAY_SIZE: usize = 100_000;
const MAX_MAP_SIZE: usize = 10_000;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

fn fault(message: impl AsRef<str>) -> Box<EvalAltResult> {
    message.as_ref().into()
}

struct ScriptContext {
    document: Option<Document>,
    rewrite: Option<UrlRewrite>,
    error: Option<DocumentError>,
}

/// Shared handle a script uses to reach the document of one exchange.
#[derive(Clone)]
pub struct ScriptDocument {
    inner: Arc<Mutex<ScriptContext>>,
}

impl ScriptDocument {
    /// Wrap `document`; values written by scripts pass through `rewrite` first.
    pub fn new(document: Document, rewrite: Option<UrlRewrite>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptContext {
                document: Some(document),
                rewrite,
                error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptContext> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn node(&self, id: NodeId) -> ScriptNode {
        ScriptNode { doc: self.clone(), id }
    }

    /// Run `f` against the document. The outcome replaces the recorded error.
    fn with<T>(
        &self,
        f: impl FnOnce(&mut Document, Option<&UrlRewrite>) -> Result<T, DocumentError>,
    ) -> ScriptResult<T> {
        let mut ctx = self.lock();
        let ScriptContext { document, rewrite, error } = &mut *ctx;
        let document = document
            .as_mut()
            .ok_or_else(|| fault("document is no longer available"))?;
        match f(document, rewrite.as_ref()) {
            Ok(value) => {
                *error = None;
                Ok(value)
            }
            Err(e) => {
                let message = e.to_string();
                *error = Some(e);
                Err(fault(message))
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Option<Document> {
        self.lock().document.clone()
    }

    pub(crate) fn restore(&self, document: Document) {
        self.lock().document = Some(document);
    }

    /// Error raised by the most recent document API call, if that call failed.
    pub(crate) fn take_error(&self) -> Option<DocumentError> {
        self.lock().error.take()
    }

    pub(crate) fn into_document(self) -> Option<Document> {
        self.lock().document.take()
    }
}

impl fmt::Debug for ScriptDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptDocument").finish_non_exhaustive()
    }
}

/// A node handle. Valid for the lifetime of one script run.
#[derive(Debug, Clone)]
pub struct ScriptNode {
    doc: ScriptDocument,
    id: NodeId,
}

fn rewritten(rewrite: Option<&UrlRewrite>, value: &str) -> String {
    match rewrite {
        Some(rewrite) => rewrite.apply(value).into_owned(),
        None => value.to_string(),
    }
}

/// The shared, sandboxed script engine.
pub struct ScriptEngine {
    engine: Engine,
}

impl ScriptEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine
            .set_max_operations(MAX_OPERATIONS)
            .set_max_call_levels(MAX_CALL_LEVELS)
            .set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FUNCTION_EXPR_DEPTH)
            .set_max_string_size(MAX_STRING_SIZE)
            .set_max_array_size(MAX_ARRAY_SIZE)
            .set_max_map_size(MAX_MAP_SIZE);
        engine.disable_symbol("eval");
        engine.on_print(|text| tracing::info!(output = %text, "modifier script print"));
        engine.on_debug(|text, source, position| {
            tracing::debug!(
                output = %text,
                source = source.unwrap_or_default(),
                position = %position,
                "modifier script debug"
            )
        });
        register_document_api(&mut engine);
        register_node_api(&mut engine);
        Self { engine }
    }

    pub fn compile(&self, script: &str) -> Result<AST, ParseError> {
        self.engine.compile(script)
    }

    /// Run a compiled script against `document`.
    pub fn run(&self, ast: &AST, document: &ScriptDocument, phase: Phase, content_type: &str) -> ScriptResult<()> {
        let mut scope = Scope::new();
        scope.push("document", document.clone());
        scope.push_constant("phase", phase.as_str().to_string());
        scope.push_constant("content_type", content_type.to_string());
        self.engine.run_ast_with_scope(&mut scope, ast)
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("max_operations", &MAX_OPERATIONS)
            .finish_non_exhaustive()
    }
}

fn register_document_api(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptDocument>("Document");

    engine.register_fn("select_one", |doc: &mut ScriptDocument, path: &str| -> ScriptResult<Dynamic> {
        let found = doc.with(|d, _| d.select_one(path))?;
        Ok(found.map_or(Dynamic::UNIT, |id| Dynamic::from(doc.node(id))))
    });
    engine.register_fn("select_all", |doc: &mut ScriptDocument, path: &str| -> ScriptResult<Array> {
        let found = doc.with(|d, _| d.select_all(path))?;
        Ok(found.into_iter().map(|id| Dynamic::from(doc.node(id))).collect())
    });
    engine.register_fn("exists", |doc: &mut ScriptDocument, path: &str| -> ScriptResult<bool> {
        doc.with(|d, _| Ok(d.select_one(path)?.is_some()))
    });
    engine.register_fn(
        "append_child",
        |doc: &mut ScriptDocument, parent: &str, name: &str| -> ScriptResult<ScriptNode> {
            let id = doc.with(|d, _| d.append_child(parent, name))?;
            Ok(doc.node(id))
        },
    );
    engine.register_fn("remove", |doc: &mut ScriptDocument, path: &str| -> ScriptResult<i64> {
        doc.with(|d, _| d.remove(path).map(|removed| removed as i64))
    });
    engine.register_fn("attribute", |doc: &mut ScriptDocument, path: &str| -> ScriptResult<Dynamic> {
        let value = doc.with(|d, _| d.select_attribute(path))?;
        Ok(value.map_or(Dynamic::UNIT, Dynamic::from))
    });
    engine.register_fn(
        "replace_text",
        |doc: &mut ScriptDocument, from: &str, to: &str| -> ScriptResult<i64> {
            doc.with(|d, rewrite| Ok(d.replace_text(from, &rewritten(rewrite, to)) as i64))
        },
    );
    engine.register_fn("root", |doc: &mut ScriptDocument| -> ScriptResult<ScriptNode> {
        let root = doc.with(|d, _| Ok(d.root()))?;
        Ok(doc.node(root))
    });
    engine.register_fn("commit", |doc: &mut ScriptDocument| -> ScriptResult<()> {
        doc.with(|d, _| {
            d.commit();
            Ok(())
        })
    });
}

fn register_node_api(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptNode>("Node");

    engine.register_fn(
        "set_attribute",
        |node: &mut ScriptNode, name: &str, value: &str| -> ScriptResult<()> {
            let id = node.id;
            node.doc
                .with(|d, rewrite| d.set_attribute(id, name, &rewritten(rewrite, value)))
        },
    );
    engine.register_fn("get_attribute", |node: &mut ScriptNode, name: &str| -> ScriptResult<Dynamic> {
        let id = node.id;
        let value = node.doc.with(|d, _| Ok(d.attribute(id, name).map(str::to_string)))?;
        Ok(value.map_or(Dynamic::UNIT, Dynamic::from))
    });
    engine.register_fn("remove_attribute", |node: &mut ScriptNode, name: &str| -> ScriptResult<bool> {
        let id = node.id;
        node.doc.with(|d, _| d.remove_attribute(id, name))
    });
    engine.register_fn("set_inner_content", |node: &mut ScriptNode, value: &str| -> ScriptResult<()> {
        let id = node.id;
        node.doc
            .with(|d, rewrite| d.set_inner_content(id, &rewritten(rewrite, value)))
    });
    engine.register_fn("set_text", |node: &mut ScriptNode, value: &str| -> ScriptResult<()> {
        let id = node.id;
        node.doc.with(|d, rewrite| d.set_text(id, &rewritten(rewrite, value)))
    });
    engine.register_fn("inner_content", |node: &mut ScriptNode| -> ScriptResult<String> {
        let id = node.id;
        node.doc.with(|d, _| Ok(d.text_content(id)))
    });
    engine.register_fn("append_child", |node: &mut ScriptNode, name: &str| -> ScriptResult<ScriptNode> {
        let id = node.id;
        let child = node.doc.with(|d, _| d.append_child_to(id, name))?;
        Ok(node.doc.node(child))
    });
    engine.register_fn("remove", |node: &mut ScriptNode| -> ScriptResult<()> {
        let id = node.id;
        node.doc.with(|d, _| d.detach(id))
    });
    engine.register_fn("name", |node: &mut ScriptNode| -> ScriptResult<String> {
        let id = node.id;
        node.doc.with(|d, _| {
            d.node(id)
                .map(|n| n.name().to_string())
                .ok_or(DocumentError::UnknownNode(id.index()))
        })
    });
    engine.register_fn("path", |node: &mut ScriptNode| -> ScriptResult<String> {
        let id = node.id;
        node.doc.with(|d, _| Ok(d.path_of(id)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Abstraction, MediaType};

    fn html(body: &str) -> Document {
        let media = MediaType::parse("text/html").unwrap();
        Abstraction::Html.parse(body.as_bytes(), &media).unwrap()
    }

    fn run(script: &str, document: Document, rewrite: Option<UrlRewrite>) -> (ScriptResult<()>, ScriptDocument) {
        let engine = ScriptEngine::new();
        let ast = engine.compile(script).unwrap();
        let handle = ScriptDocument::new(document, rewrite);
        let result = engine.run(&ast, &handle, Phase::Response, "text/html");
        (result, handle)
    }

    #[test]
    fn test_script_walks_and_mutates_nodes() {
        let script = r#"
            for item in document.select_all("//li") {
                item.set_attribute("data-path", item.path());
            }
            let list = document.select_one("/html/body/ul");
            list.append_child("li").set_text("three");
            if document.select_one("//table") != () { throw "unexpected"; }
            document.commit();
        "#;
        let (result, handle) = run(script, html("<ul><li>one</li><li>two</li></ul>"), None);
        result.unwrap();

        let document = handle.into_document().unwrap();
        assert!(document.is_committed());
        let out = String::from_utf8(Abstraction::Html.serialize(&document)).unwrap();
        assert!(out.contains("<li data-path=\"/html/body/ul/li[1]\">one</li>"));
        assert!(out.contains("<li data-path=\"/html/body/ul/li[2]\">two</li><li>three</li>"));
    }

    #[test]
    fn test_reads_and_scope_constants() {
        let script = r#"
            let href = document.attribute("//a/@href");
            let a = document.select_one("//a");
            a.set_attribute("data-copy", href + "|" + a.get_attribute("href") + "|" + a.inner_content());
            a.set_attribute("data-ctx", phase + " " + content_type);
            if a.get_attribute("missing") != () { throw "missing attribute should be unit"; }
        "#;
        let (result, handle) = run(script, html("<a href=\"/x\">go</a>"), None);
        result.unwrap();
        let document = handle.into_document().unwrap();
        let a = document.select_one("//a").unwrap().unwrap();
        assert_eq!(document.attribute(a, "data-copy"), Some("/x|/x|go"));
        assert_eq!(document.attribute(a, "data-ctx"), Some("response text/html"));
    }

    #[test]
    fn test_missing_parent_is_recorded() {
        let (result, handle) = run(
            r#"document.append_child("/html/body/footer", "div");"#,
            html("<p>x</p>"),
            None,
        );
        assert!(result.is_err());
        assert_eq!(
            handle.take_error(),
            Some(DocumentError::PathNotFound("/html/body/footer".into()))
        );
        assert_eq!(handle.take_error(), None);
    }

    #[test]
    fn test_written_urls_are_rewritten() {
        let rewrite = UrlRewrite::new("https://origin.local", "http://proxy.local");
        let script = r#"
            document.select_one("//a").set_attribute("href", "https://origin.local/next");
        "#;
        let (result, handle) = run(script, html("<a>n</a>"), Some(rewrite));
        result.unwrap();
        let document = handle.into_document().unwrap();
        let a = document.select_one("//a").unwrap().unwrap();
        assert_eq!(document.attribute(a, "href"), Some("http://proxy.local/next"));
    }

    #[test]
    fn test_runaway_script_is_stopped() {
        let (result, _) = run("loop { }", html("<p></p>"), None);
        assert!(result.is_err());
    }
}
