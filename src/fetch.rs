use crate::error::{FetchError, ResolveError};
use crate::value::Value;
use std::path::{Component, Path, PathBuf};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Retrieves the text of a document named by a cross-document reference.
///
/// Called synchronously from inside the resolver; the fetched document is
/// fully resolved before the walk that needed it continues.
pub trait DocumentFetcher {
    fn fetch(&self, url: &str) -> Result<String, BoxError>;
}

impl<F> DocumentFetcher for F
where
    F: Fn(&str) -> Result<String, BoxError>,
{
    fn fetch(&self, url: &str) -> Result<String, BoxError> {
        self(url)
    }
}

/// Serves documents from a directory. `file://` prefixes are stripped and
/// the remainder is taken relative to `root`; names that climb out of
/// `root` are refused.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileFetcher { root: root.into() }
    }

    /// The file `url` names under `root`, with `.` and `..` applied.
    fn locate(&self, url: &str) -> Result<PathBuf, FetchError> {
        let relative = url.strip_prefix("file://").unwrap_or(url);
        let mut path = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(relative.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir if depth > 0 => {
                    path.pop();
                    depth -= 1;
                }
                _ => {
                    return Err(FetchError::OutsideRoot {
                        url: url.to_string(),
                    });
                }
            }
        }
        Ok(path)
    }
}

impl DocumentFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<String, BoxError> {
        let path = self.locate(url)?;
        log::debug!("reading external document {}", path.display());
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Hook attached to lazy stubs; materializes the value a reference names.
pub trait Loader {
    fn load(&self, reference: &str) -> Result<Value, ResolveError>;
}

impl<F> Loader for F
where
    F: Fn(&str) -> Result<Value, ResolveError>,
{
    fn load(&self, reference: &str) -> Result<Value, ResolveError> {
        self(reference)
    }
}
