use std::sync::LazyLock;

use crate::error::{Error, Result};

static SPEC_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(?:(?P<host>(?:[^:/@]+@)?[^:/@]+):)?(?P<pool>[^:/@]+)(?P<path>(?:/[^/@]+)*)$")
        .expect("dataset specification pattern must compile")
});

/// A parsed `[host:]pool[/path...]` dataset specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    /// Host named in the specification, if any, possibly as `user@host`
    pub host: Option<String>,
    pub pool: String,
    /// Empty, or starting with `/`
    pub path: String,
}

impl DatasetSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let captures = SPEC_PATTERN
            .captures(spec)
            .ok_or_else(|| Error::specification(spec, "expected [host:]pool[/path...]"))?;
        let group = |name| captures.name(name).map(|m| m.as_str().to_string());
        Ok(Self {
            host: group("host"),
            pool: group("pool").unwrap_or_default(),
            path: group("path").unwrap_or_default(),
        })
    }
}
