//! Template rendering.
//!
//! Templates are Jinja-style files loaded from a directory on disk. Anything
//! that ends up in an XML document is escaped so that an environment value
//! cannot break the document structure; properties files are rendered raw.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use minijinja::value::Value;
use minijinja::{AutoEscape, Error, ErrorKind, Output, State};

use crate::env::Environment;

/// Name of the custom auto-escape mode applied to XML templates.
const XML_ESCAPE: &str = "xml";

/// Errors produced while rendering a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// No template with this name exists in the template directory.
    #[error("template {name} not found in {}", dir.display())]
    NotFound {
        /// Requested template name.
        name: String,
        /// Directory that was searched.
        dir: PathBuf,
    },
    /// The template exists but could not be parsed or rendered.
    #[error("failed to render template {name}: {source}")]
    Render {
        /// Template name.
        name: String,
        /// Underlying engine error.
        #[source]
        source: Error,
    },
}

/// Stateless renderer over a fixed template directory.
#[derive(Debug)]
pub struct Renderer {
    dir: PathBuf,
    env: minijinja::Environment<'static>,
}

impl Renderer {
    /// Create a renderer loading templates from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let mut env = minijinja::Environment::new();
        env.set_loader(minijinja::path_loader(&dir));
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_auto_escape_callback(auto_escape_for);
        env.set_formatter(format_value);
        Self { dir, env }
    }

    /// Directory templates are loaded from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Render `name` with the whole environment as context.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::NotFound`] for unknown templates and
    /// [`TemplateError::Render`] for syntax or evaluation failures.
    pub fn render(&self, name: &str, vars: &Environment) -> Result<String, TemplateError> {
        self.render_map(name, vars.as_map())
    }

    /// Render `name` against an explicit variable map.
    ///
    /// # Errors
    ///
    /// See [`Renderer::render`].
    pub fn render_map(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, TemplateError> {
        let template = self.env.get_template(name).map_err(|e| {
            if e.kind() == ErrorKind::TemplateNotFound {
                TemplateError::NotFound {
                    name: name.to_owned(),
                    dir: self.dir.clone(),
                }
            } else {
                TemplateError::Render {
                    name: name.to_owned(),
                    source: e,
                }
            }
        })?;

        template.render(vars).map_err(|e| TemplateError::Render {
            name: name.to_owned(),
            source: e,
        })
    }
}

/// Returns `true` when the template produces an XML document.
pub fn is_xml_template(name: &str) -> bool {
    let stem = name.strip_suffix(".j2").unwrap_or(name);
    stem.to_lowercase().ends_with(".xml")
}

fn auto_escape_for(name: &str) -> AutoEscape {
    if is_xml_template(name) {
        AutoEscape::Custom(XML_ESCAPE)
    } else {
        AutoEscape::None
    }
}

fn format_value(out: &mut Output, state: &State, value: &Value) -> Result<(), Error> {
    match state.auto_escape() {
        AutoEscape::Custom(XML_ESCAPE) => {
            if value.is_undefined() || value.is_none() {
                return Ok(());
            }
            let text = match value.as_str() {
                Some(s) => s.to_owned(),
                None => value.to_string(),
            };
            let rendered = if value.is_safe() {
                text
            } else {
                xml_escape(&text)
            };
            out.write_str(&rendered)
                .map_err(|_| Error::new(ErrorKind::WriteFailure, "failed to write output"))
        }
        _ => minijinja::escape_formatter(out, state, value),
    }
}

/// Escape the five XML special characters.
pub fn xml_escape(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
