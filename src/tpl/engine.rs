use std::fmt;
use std::sync::Arc;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TemplateError, TemplateLocation};
use crate::script::{Backend, Interpreter, RenderFn, ScriptError};
use crate::tpl::ast::Doc;
use crate::tpl::codegen::{self, Compiled};
use crate::tpl::filters::FilterRegistry;
use crate::tpl::parser::parse;
use crate::tpl::position_map::PositionMap;
use crate::tpl::render_context::RenderContext;
use crate::tpl::transform::apply_default_filters;
use crate::value::{Map, Value, to_value};

pub const DEFAULT_TEMPLATE_NAME: &str = "<template>";

/// Compile-time settings of a [`Template`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TemplateOptions {
    /// Used in log lines and error messages.
    pub name: String,
    /// Appended to every `${...}` that does not carry the `n` filter.
    pub default_filters: Vec<String>,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_TEMPLATE_NAME.to_string(),
            default_filters: vec!["h".to_string()],
        }
    }
}

pub struct TemplateBuilder {
    text: String,
    options: TemplateOptions,
    filters: Option<Arc<FilterRegistry>>,
    backend: Option<Arc<dyn Backend>>,
}

impl TemplateBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    pub fn default_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.default_filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn filters(mut self, filters: Arc<FilterRegistry>) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn options(mut self, options: TemplateOptions) -> Self {
        self.options = options;
        self
    }

    /// Parses, transforms, generates and compiles the template.
    pub fn build(self) -> Result<Template> {
        let TemplateBuilder {
            text,
            options,
            filters,
            backend,
        } = self;
        let filters = filters.unwrap_or_else(FilterRegistry::shared);
        let backend = backend.unwrap_or_else(|| Arc::new(Interpreter));

        let mut ast = parse(&text).inspect_err(|e| {
            debug!("Failed to parse template '{}': {}", options.name, e);
        })?;
        apply_default_filters(&mut ast, &options.default_filters);
        let compiled = codegen::compile(&ast);
        trace!(
            "Generated source for template '{}':\n{}",
            options.name, compiled.source
        );

        let render_fn = match backend.compile(&compiled.source) {
            Ok(render_fn) => render_fn,
            Err(e) => {
                let (location, has_incorrect_line_numbers) =
                    locate(backend.as_ref(), &compiled, &text, e.line);
                debug!(
                    "Failed to compile template '{}' with backend '{}': {}",
                    options.name,
                    backend.name(),
                    e
                );
                return Err(TemplateError::Compile {
                    message: e.to_string(),
                    generated_source: compiled.source,
                    generated_line: e.line,
                    location,
                    has_incorrect_line_numbers,
                });
            }
        };

        debug!(
            "Compiled template '{}': {} nodes, {} generated lines",
            options.name,
            ast.node_count(),
            compiled.line_count()
        );

        Ok(Template {
            name: options.name,
            text,
            ast,
            compiled,
            filters,
            backend,
            render_fn,
        })
    }
}

/// Maps a generated-source line back to the template, if the backend can
/// report lines at all. The flag is set whenever that fails.
fn locate(
    backend: &dyn Backend,
    compiled: &Compiled,
    text: &str,
    generated_line: Option<usize>,
) -> (Option<TemplateLocation>, bool) {
    if !backend.reports_line_numbers() {
        return (None, true);
    }
    match generated_line.and_then(|line| compiled.positions.template_location(text, line)) {
        Some(location) => (Some(location), false),
        None => (None, true),
    }
}

/// A compiled template: parse once, render many times.
///
/// Rendering never mutates the template, so one instance can be shared
/// across threads.
pub struct Template {
    name: String,
    text: String,
    ast: Doc,
    compiled: Compiled,
    filters: Arc<FilterRegistry>,
    backend: Arc<dyn Backend>,
    render_fn: Box<dyn RenderFn>,
}

impl Template {
    /// Compiles `text` with the default options.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        Self::builder(text).build()
    }

    pub fn builder(text: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder {
            text: text.into(),
            options: TemplateOptions::default(),
            filters: None,
            backend: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The tree after default filters were applied.
    pub fn ast(&self) -> &Doc {
        &self.ast
    }

    /// Generated render-script source.
    pub fn source(&self) -> &str {
        &self.compiled.source
    }

    pub fn positions(&self) -> &PositionMap {
        &self.compiled.positions
    }

    pub fn compiled(&self) -> &Compiled {
        &self.compiled
    }

    /// Renders with any serializable data as the scope.
    pub fn render<T: Serialize + ?Sized>(&self, data: &T) -> Result<String> {
        self.render_value(to_value(data)?)
    }

    /// Renders with an empty scope.
    pub fn render_empty(&self) -> Result<String> {
        self.render_value(Value::Map(Map::new()))
    }

    pub fn render_value(&self, data: Value) -> Result<String> {
        let mut ctx = RenderContext::new(data, &self.filters);
        match self.render_fn.call(&mut ctx) {
            Ok(()) => Ok(ctx.into_output()),
            Err(e) => Err(self.render_error(e)),
        }
    }

    fn render_error(&self, e: ScriptError) -> TemplateError {
        let (location, has_incorrect_line_numbers) =
            locate(self.backend.as_ref(), &self.compiled, &self.text, e.line);
        match location {
            Some(location) => debug!(
                "Failed to render template '{}' at {}: {}",
                self.name, location, e
            ),
            None => debug!("Failed to render template '{}': {}", self.name, e),
        }
        TemplateError::Render {
            message: e.to_string(),
            generated_line: e.line,
            location,
            has_incorrect_line_numbers,
        }
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// Compiles `text` and renders it once with `data`.
pub fn render<T: Serialize + ?Sized>(text: &str, data: &T) -> Result<String> {
    Template::new(text)?.render(data)
}
