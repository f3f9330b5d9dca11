use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

fn invalid(pattern: &str, e: globset::Error) -> Error {
    Error::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.kind().to_string(),
    }
}

/// `*` stays inside one segment, `**` crosses segments, `{a,b}` alternates,
/// `[!a]`/`[^a]` negate. A trailing `/**` also matches the directory itself.
fn add_glob(builder: &mut GlobSetBuilder, pattern: &str) -> Result<()> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .build()
        .map_err(|e| invalid(pattern, e))?;
    builder.add(glob);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PatternSet {
    set: GlobSet,
    len: usize,
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            set: GlobSet::empty(),
            len: 0,
        }
    }
}

impl PatternSet {
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for p in patterns {
            let p = p.as_ref();
            add_glob(&mut builder, p)?;
            if let Some(dir) = p.strip_suffix("/**").filter(|d| !d.is_empty()) {
                add_glob(&mut builder, dir)?;
            }
        }
        let set = builder.build().map_err(|e| Error::InvalidPattern {
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
            message: e.kind().to_string(),
        })?;
        Ok(Self {
            set,
            len: patterns.len(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        self.set.is_match(rel_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Include,
    /// Leave this file out, keep walking siblings.
    Skip,
    /// Leave this directory and everything below it out.
    Prune,
}

/// Exclude beats include; the include list only ever filters files.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    include: PatternSet,
    exclude: PatternSet,
}

impl Filter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        Ok(Self {
            include: PatternSet::compile(include)?,
            exclude: PatternSet::compile(exclude)?,
        })
    }

    pub fn decide(&self, rel_path: &str, is_dir: bool) -> Decision {
        if self.exclude.matches(rel_path) {
            return if is_dir {
                Decision::Prune
            } else {
                Decision::Skip
            };
        }
        if is_dir || self.include.is_empty() || self.include.matches(rel_path) {
            Decision::Include
        } else {
            Decision::Skip
        }
    }
}
