use crate::goose::MigrationSource;
use crate::goose::source::SourceFile;
use anyhow::Result;

/// Builds the md5 fingerprint a migrator reports as its hash
///
/// Every entry is length-delimited so that shifting bytes between a key and
/// its value, or between two files, changes the digest.
#[derive(Debug, Clone, Default)]
pub struct Hasher {
    buffer: Vec<u8>,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mix in a named setting
    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.write(b"field");
        self.write(key.as_bytes());
        self.write(value.as_bytes());
        self
    }

    /// Mix in one file; only its name, not its directory, is hashed
    pub fn file(mut self, name: &str, contents: &str) -> Self {
        self.write(b"file");
        self.write(name.as_bytes());
        self.write(contents.as_bytes());
        self
    }

    pub fn files(self, files: &[SourceFile]) -> Self {
        files
            .iter()
            .fold(self, |hasher, f| hasher.file(&f.name, &f.contents))
    }

    /// Mix in every migration file of `source`, in name order
    pub fn source(self, source: &MigrationSource) -> Result<Self> {
        Ok(self.files(&source.files()?))
    }

    pub fn finish(&self) -> String {
        format!("{:x}", md5::compute(&self.buffer))
    }

    fn write(&mut self, bytes: &[u8]) {
        self.buffer
            .extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.buffer.extend_from_slice(bytes);
    }
}
