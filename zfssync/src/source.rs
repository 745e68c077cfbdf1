use std::collections::BTreeSet;

use common::CommandRunner;
use tracing::instrument;

use crate::dataset::DatasetKey;
use crate::error::{Error, Result};
use crate::resolver::Registry;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandOptions {
    /// Treat the dataset part of the specification as a shell glob pattern
    pub glob: bool,
    /// Also include every descendant of the selected datasets
    pub recursive: bool,
}

/// A source specification and the datasets it selects
#[derive(Debug, Clone)]
pub struct SourceSet {
    pub spec: String,
    pub root: DatasetKey,
    pub datasets: BTreeSet<DatasetKey>,
}

impl std::fmt::Display for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} with {} datasets", self.root, self.datasets.len())
    }
}

/// Wrap `{` and `}` outside character classes in brackets so they match literally
fn escape_alternation(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    let mut in_class = false;
    for c in path.chars() {
        match c {
            '[' if !in_class => {
                in_class = true;
                escaped.push(c);
            }
            ']' if in_class => {
                in_class = false;
                escaped.push(c);
            }
            '{' | '}' if !in_class => {
                escaped.push('[');
                escaped.push(c);
                escaped.push(']');
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Glob matcher for a root dataset; the pool name is always matched literally
///
/// Only `*`, `?` and `[...]` are special. Braces match themselves, and an
/// unclosed `[` is rejected.
fn glob_matcher(spec: &str, root: &DatasetKey) -> Result<globset::GlobMatcher> {
    let pattern = format!(
        "{}{}",
        globset::escape(&root.pool),
        escape_alternation(&root.path)
    );
    let glob = globset::GlobBuilder::new(&pattern)
        .literal_separator(false)
        .backslash_escape(false)
        .build()
        .map_err(|error| Error::specification(spec, format!("invalid glob pattern: {error}")))?;
    Ok(glob.compile_matcher())
}

/// Expand `spec` into the set of datasets it selects
///
/// Without glob the root dataset must exist. Recursion is applied after glob
/// matching and adds strict descendants of every matched dataset.
#[instrument(skip(registry, runner))]
pub async fn expand<R: CommandRunner>(
    registry: &mut Registry,
    runner: &R,
    spec: &str,
    options: ExpandOptions,
) -> Result<SourceSet> {
    let root = registry.resolve(runner, spec, None).await?;
    let pool_key = root.pool_key();
    let root_name = root.full_name();
    let pool = registry.pool(runner, &pool_key).await?;
    let root_listed = pool.has_dataset(&root_name);
    let pool_datasets = pool.datasets.clone();
    let mut selected = BTreeSet::new();
    if options.glob {
        let matcher = glob_matcher(spec, &root)?;
        selected.extend(
            pool_datasets
                .iter()
                .filter(|name| matcher.is_match(name.as_str()))
                .cloned(),
        );
        if selected.is_empty() {
            tracing::warn!("pattern \"{root}\" matches no datasets");
        }
    } else {
        if !root_listed {
            return Err(Error::NotFound {
                host: root.host.to_string(),
                dataset: root_name,
            });
        }
        selected.insert(root_name.clone());
    }
    if options.recursive {
        let parents: Vec<String> = selected.iter().map(|name| format!("{name}/")).collect();
        selected.extend(
            pool_datasets
                .iter()
                .filter(|name| parents.iter().any(|prefix| name.starts_with(prefix.as_str())))
                .cloned(),
        );
    }
    let mut datasets = BTreeSet::new();
    for name in selected {
        let key = if name == root_name {
            root.clone()
        } else {
            registry.resolve(runner, &name, Some(&pool_key)).await?
        };
        datasets.insert(key);
    }
    let set = SourceSet {
        spec: spec.to_string(),
        root,
        datasets,
    };
    tracing::info!("source {set}");
    Ok(set)
}
