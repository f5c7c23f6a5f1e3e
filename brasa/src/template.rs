//! HTML views rendered with minijinja.

use std::path::Path;
use std::sync::Arc;

use minijinja::Environment;
use serde::Serialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::context::RequestContext;
use crate::error::{Error, StartupError};
use crate::render::{ContextRenderer, OutputDoc, Rendering, Reply, ResponseWriter};
use crate::schema::{SchemaError, SchemaRegistry};

/// Templates loaded at startup, shared by every request.
#[derive(Debug, Clone)]
pub struct Templates(Arc<Environment<'static>>);

impl Templates {
    /// Loads every file under `dir` whose relative path matches one of `globs`.
    ///
    /// Patterns are matched segment by segment; `*` and `?` never cross a `/`.
    /// Templates are named by their path relative to `dir`.
    pub fn load(dir: impl AsRef<Path>, globs: &[&str]) -> Result<Self, StartupError> {
        let dir = dir.as_ref();
        let mut env = Environment::new();
        let mut loaded = 0usize;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| StartupError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !globs.iter().any(|glob| glob_match(glob, &name)) {
                continue;
            }
            let source = std::fs::read_to_string(entry.path())?;
            env.add_template_owned(name, source)?;
            loaded += 1;
        }
        tracing::debug!(dir = %dir.display(), loaded, "loaded templates");
        Ok(Self(Arc::new(env)))
    }

    pub fn from_env(env: Environment<'static>) -> Self {
        Self(Arc::new(env))
    }

    pub fn env(&self) -> &Environment<'static> {
        &self.0
    }

    pub fn render(&self, name: &str, data: &Value) -> Result<String, Error> {
        self.0
            .get_template(name)
            .and_then(|tpl| tpl.render(data))
            .map_err(|e| Error::render(e.to_string()))
    }
}

fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = pattern.trim_start_matches("./").split('/').collect();
    let path: Vec<&str> = path.split('/').collect();
    pattern.len() == path.len() && pattern.iter().zip(&path).all(|(p, s)| segment_match(p.as_bytes(), s.as_bytes()))
}

fn segment_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => segment_match(&pattern[1..], text) || (!text.is_empty() && segment_match(pattern, &text[1..])),
        (Some(b'?'), Some(_)) => segment_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => segment_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

/// A named template plus its data; returned from a controller it renders as HTML.
pub struct Template {
    name: String,
    data: Result<Value, String>,
}

impl Template {
    pub fn new(name: impl Into<String>, data: &impl Serialize) -> Self {
        Self {
            name: name.into(),
            data: serde_json::to_value(data).map_err(|e| e.to_string()),
        }
    }
}

impl ContextRenderer for Template {
    fn render_with(&self, ctx: &RequestContext, w: &mut ResponseWriter) -> Result<(), Error> {
        let templates = ctx
            .templates()
            .ok_or_else(|| Error::render("no templates are configured"))?;
        let data = self.data.as_ref().map_err(|e| Error::render(e.clone()))?;
        let html = templates.render(&self.name, data)?;
        w.write_str(&html);
        Ok(())
    }
}

impl Reply for Template {
    fn into_rendering(self) -> Result<Rendering, Error> {
        Ok(Rendering::Context(Box::new(self)))
    }

    fn describe(_: &mut SchemaRegistry) -> Result<OutputDoc, SchemaError> {
        Ok(OutputDoc::Html)
    }
}
