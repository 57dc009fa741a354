use std::path::Path;

/// Descriptive metadata attached to a song or reported by a decoder stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tag {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Duration in seconds, if known.
    pub duration: Option<f32>,
}

impl Tag {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }
}

/// A playable item. Shared by reference between the playlist, the player
/// and the decoder for as long as any of them needs it.
#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    pub uri: String,
    pub tag: Option<Tag>,
}

impl Song {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            tag: None,
        }
    }

    pub fn with_tag(uri: impl Into<String>, tag: Tag) -> Self {
        Self {
            uri: uri.into(),
            tag: Some(tag),
        }
    }

    pub fn duration(&self) -> Option<f32> {
        self.tag.as_ref().and_then(|t| t.duration)
    }

    /// Whether the URI names something on the local filesystem.
    pub fn is_local(&self) -> bool {
        !self.uri.contains("://") || self.uri.starts_with("file://")
    }

    /// Local filesystem path for the song, if it is local.
    pub fn local_path(&self) -> Option<&Path> {
        if !self.is_local() {
            return None;
        }
        Some(Path::new(
            self.uri.strip_prefix("file://").unwrap_or(&self.uri),
        ))
    }

    /// Lower-cased URI suffix used for decoder lookup.
    pub fn suffix(&self) -> Option<String> {
        uri_suffix(&self.uri)
    }
}

/// Extract the lower-cased extension of the last path segment of `uri`,
/// ignoring any query string.
pub fn uri_suffix(uri: &str) -> Option<String> {
    let tail = uri.split('?').next().unwrap_or(uri);
    let file = tail.rsplit('/').next().unwrap_or(tail);
    let mut parts = file.rsplit('.');
    let ext = parts.next()?;
    if parts.next().is_some() && !ext.is_empty() {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_suffix_handles_query_and_missing_ext() {
        assert_eq!(uri_suffix("http://example/a.FLAC?x=1"), Some("flac".to_string()));
        assert_eq!(uri_suffix("http://example/a"), None);
        assert_eq!(uri_suffix("music/archive.track.ogg"), Some("ogg".to_string()));
        assert_eq!(uri_suffix("music/trailing."), None);
    }

    #[test]
    fn local_path_strips_file_scheme() {
        let song = Song::new("file:///music/a.flac");
        assert_eq!(song.local_path(), Some(Path::new("/music/a.flac")));
        let remote = Song::new("http://host/a.mp3");
        assert!(remote.local_path().is_none());
    }

    #[test]
    fn duration_comes_from_tag() {
        let song = Song::with_tag(
            "a.flac",
            Tag {
                duration: Some(12.5),
                ..Tag::default()
            },
        );
        assert_eq!(song.duration(), Some(12.5));
        assert_eq!(Song::new("b.flac").duration(), None);
    }
}
