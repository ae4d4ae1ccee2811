//! Slash-separated resource paths

use std::fmt;

/// A resource address relative to the tree root.
///
/// Leading, trailing and repeated separators are ignored, so `/tracks/42/`,
/// `tracks/42` and `//tracks//42` all name the same resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Path of a child of this resource
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Path of a descendant several segments below this resource
    pub fn join_all<S: AsRef<str>>(&self, rest: &[S]) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(rest.iter().map(|s| s.as_ref().to_string()));
        Self { segments }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}
