//! A filesystem-backed JSON document [`Effector`] using `tokio::fs`, for
//! demos and tests that want durable-but-simple storage without a real
//! database — the same niche `NoOpResponseStorage` fills for the teacher's
//! `data_connector`, minus the "no-op" part.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use zerver_core::{Effect, EffectKind, Effector, Error, Kind};

/// `Effect::target` is `"read:<path>"` or `"write:<path>"`, rooted under
/// `FileJsonEffector`'s configured `base_dir` — callers may not escape it
/// with `..`. `write` validates `Effect::payload` is well-formed JSON
/// before touching disk; `read` returns the file's bytes verbatim.
pub struct FileJsonEffector {
    base_dir: PathBuf,
}

enum Op<'a> {
    Read(&'a str),
    Write(&'a str),
}

impl FileJsonEffector {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn parse_target(target: &str) -> Option<Op<'_>> {
        let (op, path) = target.split_once(':')?;
        if path.is_empty() {
            return None;
        }
        match op {
            "read" => Some(Op::Read(path)),
            "write" => Some(Op::Write(path)),
            _ => None,
        }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, Error> {
        if Path::new(relative).components().any(|c| {
            matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir)
        }) {
            return Err(Error::new(Kind::InvalidInput, "file_json_effect", relative.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }
}

#[async_trait]
impl Effector for FileJsonEffector {
    fn supports(&self, effect: &Effect) -> bool {
        effect.kind == EffectKind::Io && Self::parse_target(&effect.target).is_some()
    }

    async fn execute(&self, effect: &Effect) -> Result<Bytes, Error> {
        let op = Self::parse_target(&effect.target)
            .ok_or_else(|| Error::new(Kind::InvalidInput, "file_json_effect", effect.target.clone()))?;

        match op {
            Op::Read(relative) => {
                let path = self.resolve(relative)?;
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Ok(Bytes::from(bytes)),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        Err(Error::new(Kind::NotFound, "file_json_effect", relative.to_string()))
                    }
                    Err(_) => Err(Error::internal("file_json_effect", relative.to_string())),
                }
            }
            Op::Write(relative) => {
                serde_json::from_slice::<serde_json::Value>(&effect.payload).map_err(|_| {
                    Error::new(Kind::InvalidInput, "file_json_effect", relative.to_string())
                })?;
                let path = self.resolve(relative)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|_| Error::internal("file_json_effect", relative.to_string()))?;
                }
                tokio::fs::write(&path, &effect.payload)
                    .await
                    .map_err(|_| Error::internal("file_json_effect", relative.to_string()))?;
                Ok(effect.payload.clone())
            }
        }
    }

    fn kinds(&self) -> &'static [EffectKind] {
        &[EffectKind::Io]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let effector = FileJsonEffector::new(dir.path());

        let write = Effect::new("write", EffectKind::Io, "write:doc.json")
            .with_payload(Bytes::from_static(b"{\"a\":1}"))
            .with_timeout(Duration::from_secs(1));
        effector.execute(&write).await.unwrap();

        let read = Effect::new("read", EffectKind::Io, "read:doc.json");
        let out = effector.execute(&read).await.unwrap();
        assert_eq!(out, Bytes::from_static(b"{\"a\":1}"));
    }

    #[tokio::test]
    async fn write_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let effector = FileJsonEffector::new(dir.path());
        let write = Effect::new("write", EffectKind::Io, "write:bad.json")
            .with_payload(Bytes::from_static(b"not json"));
        let err = effector.execute(&write).await.unwrap_err();
        assert_eq!(err.kind, Kind::InvalidInput);
    }

    #[tokio::test]
    async fn read_of_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let effector = FileJsonEffector::new(dir.path());
        let read = Effect::new("read", EffectKind::Io, "read:missing.json");
        let err = effector.execute(&read).await.unwrap_err();
        assert_eq!(err.kind, Kind::NotFound);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let effector = FileJsonEffector::new(dir.path());
        let read = Effect::new("read", EffectKind::Io, "read:../escape.json");
        let err = effector.execute(&read).await.unwrap_err();
        assert_eq!(err.kind, Kind::InvalidInput);
    }
}
