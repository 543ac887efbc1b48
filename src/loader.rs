//! Registers named templates from files on disk or from embedded assets.
//!
//! A template is named after its file stem, so `views/user_list.tpl` is
//! found as `user_list`. Loaded templates live in the [`cache`].

use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use glob::glob;
use log::{info, warn};

use crate::error::{Result, TemplateError};
use crate::tpl::cache;
use crate::tpl::engine::Template;

/// Template name -> the file or asset path it came from.
static SOURCES: OnceLock<DashMap<String, String>> = OnceLock::new();

/// Loads every file matching `pattern`, e.g. `"templates/**/*.tpl"`.
pub fn load(pattern: &str) -> Result<()> {
    let paths = glob(pattern)
        .map_err(|e| TemplateError::Load(format!("invalid glob pattern '{}': {}", pattern, e)))?;
    let mut count = 0;
    for entry in paths {
        let path = entry
            .map_err(|e| TemplateError::Load(format!("cannot read path for '{}': {}", pattern, e)))?;
        if path.is_file() {
            load_file(&path)?;
            count += 1;
        }
    }
    info!("Loaded {} template file(s) matching '{}'", count, pattern);
    Ok(())
}

/// Registers templates embedded in the binary as `(path, content)` pairs.
pub fn load_assets(assets: Vec<(&str, &str)>) -> Result<()> {
    for (source, content) in assets {
        register(source, content).inspect_err(|e| {
            warn!("Failed to register template asset '{}': {}", source, e);
        })?;
    }
    Ok(())
}

pub fn find_template(name: &str) -> Option<Arc<Template>> {
    if !SOURCES.get()?.contains_key(name) {
        return None;
    }
    cache::get(name)
}

/// Forgets every loaded template (mainly for tests).
pub fn clear() {
    if let Some(sources) = SOURCES.get() {
        for entry in sources.iter() {
            cache::remove(entry.key());
        }
        sources.clear();
    }
}

fn load_file(path: &Path) -> Result<()> {
    let content = fs::read_to_string(path).map_err(|e| {
        TemplateError::Load(format!("failed to read template file {}: {}", path.display(), e))
    })?;
    register(&path.display().to_string(), &content)
}

fn register(source: &str, content: &str) -> Result<()> {
    let name = template_name(source)?;
    let template = Template::builder(content).name(name.as_str()).build()?;

    // The entry guard is held until the cache holds the new template, so a
    // racing registration under the same name sees one source or the other.
    let sources = SOURCES.get_or_init(DashMap::new);
    match sources.entry(name.clone()) {
        Entry::Occupied(existing) if existing.get() != source => {
            return Err(TemplateError::Load(format!(
                "duplicate template name '{}' (sources: '{}', '{}')",
                name,
                existing.get(),
                source
            )));
        }
        entry => {
            cache::insert(Arc::new(template));
            entry.insert(source.to_string());
        }
    }
    info!("Registered template '{}' from {}", name, source);
    Ok(())
}

fn template_name(source: &str) -> Result<String> {
    Path::new(source)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TemplateError::Load(format!("cannot derive a template name from '{}'", source)))
}
