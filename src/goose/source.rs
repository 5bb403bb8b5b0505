use crate::constants::MIGRATION_FILE_PATTERN;
use anyhow::{Context, Result, anyhow, bail};
use include_dir::Dir;
use itertools::Itertools;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where migration files are read from
#[derive(Clone)]
pub enum MigrationSource {
    /// A directory on disk, resolved against the working directory when read
    Directory(PathBuf),
    /// A directory inside a tree embedded with `include_dir!`
    Embedded {
        root: &'static Dir<'static>,
        dir: PathBuf,
    },
}

impl fmt::Debug for MigrationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationSource::Directory(path) => f.debug_tuple("Directory").field(path).finish(),
            MigrationSource::Embedded { dir, .. } => {
                f.debug_struct("Embedded").field("dir", dir).finish_non_exhaustive()
            }
        }
    }
}

impl fmt::Display for MigrationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationSource::Directory(path) => write!(f, "{}", path.display()),
            MigrationSource::Embedded { dir, .. } => write!(f, "embedded:{}", dir.display()),
        }
    }
}

/// A migration file's name and contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

/// A versioned migration ready to be parsed and applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: String,
}

impl MigrationSource {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        MigrationSource::Directory(path.into())
    }

    pub fn embedded(root: &'static Dir<'static>, dir: impl Into<PathBuf>) -> Self {
        MigrationSource::Embedded {
            root,
            dir: dir.into(),
        }
    }

    /// All `.sql` files directly inside the source, sorted by name
    pub fn files(&self) -> Result<Vec<SourceFile>> {
        let pattern = glob::Pattern::new(MIGRATION_FILE_PATTERN)?;

        let mut files = match self {
            MigrationSource::Directory(path) => read_directory(path, &pattern)?,
            MigrationSource::Embedded { root, dir } => read_embedded(root, dir, &pattern)?,
        };

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

fn read_directory(path: &Path, pattern: &glob::Pattern) -> Result<Vec<SourceFile>> {
    if !path.is_dir() {
        bail!(
            "Migrations directory does not exist: {} (working directory: {})",
            path.display(),
            std::env::current_dir()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|_| "<unknown>".to_string())
        );
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("Failed to read migrations directory {}", path.display()))?
    {
        let entry = entry?;
        let file_path = entry.path();

        if !file_path.is_file() {
            continue;
        }

        if let Some(name) = file_path.file_name().and_then(|n| n.to_str())
            && pattern.matches(name)
        {
            let contents = std::fs::read_to_string(&file_path).with_context(|| {
                format!("Failed to read migration file {}", file_path.display())
            })?;
            files.push(SourceFile {
                name: name.to_string(),
                contents,
            });
        }
    }

    Ok(files)
}

fn read_embedded(
    root: &'static Dir<'static>,
    dir: &Path,
    pattern: &glob::Pattern,
) -> Result<Vec<SourceFile>> {
    let is_root = dir.as_os_str().is_empty() || dir == Path::new(".");
    let directory = if is_root {
        root
    } else {
        root.get_dir(dir).ok_or_else(|| {
            anyhow!(
                "Embedded migrations directory does not exist: {}",
                dir.display()
            )
        })?
    };

    let mut files = Vec::new();
    for file in directory.files() {
        let Some(name) = file.path().file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !pattern.matches(name) {
            continue;
        }

        let contents = file
            .contents_utf8()
            .ok_or_else(|| anyhow!("Embedded migration {} is not valid UTF-8", name))?;
        files.push(SourceFile {
            name: name.to_string(),
            contents: contents.to_string(),
        });
    }

    Ok(files)
}

/// Parse the version from a goose filename like "00002_add_cats.sql"
pub fn parse_version(filename: &str) -> Result<i64> {
    let stem = filename
        .strip_suffix(".sql")
        .ok_or_else(|| anyhow!("Migration file {} does not end in .sql", filename))?;

    let numeric = stem.split_once('_').map(|(n, _)| n).unwrap_or(stem);

    let version: i64 = numeric.parse().map_err(|_| {
        anyhow!(
            "Migration file {} does not start with a numeric version",
            filename
        )
    })?;

    if version < 1 {
        bail!(
            "Migration file {} has version {}: versions must be greater than zero",
            filename,
            version
        );
    }

    Ok(version)
}

/// Read and version every migration in `source`, sorted by version
pub fn collect_migrations(source: &MigrationSource) -> Result<Vec<Migration>> {
    let mut migrations = source
        .files()?
        .into_iter()
        .map(|file| {
            Ok(Migration {
                version: parse_version(&file.name)?,
                name: file.name,
                sql: file.contents,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    migrations.sort_by_key(|m| m.version);

    if let Some((first, second)) = migrations
        .iter()
        .tuple_windows()
        .find(|(a, b)| a.version == b.version)
    {
        bail!(
            "Duplicate migration version {}: {} and {}",
            first.version,
            first.name,
            second.name
        );
    }

    Ok(migrations)
}
