//! Video ids, transcripts, and where transcripts come from.
//!
//! The pipeline only ever sees plain text. [`Transcript::to_text`] renders
//! timed segments as `[HH:MM:SS] text` lines so map calls can cite moments
//! and link back into the video.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

#[allow(clippy::expect_used)]
static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.)?(?:youtu\.be/|youtube\.com/(?:embed/|v/|watch\?v=|watch\?.+&v=))([\w-]{11})(?:\S+)?$",
    )
    .expect("valid youtube url regex")
});

/// An 11-character YouTube video id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    /// Extract the id from any of the usual YouTube URL shapes.
    pub fn parse(url: &str) -> Result<Self> {
        YOUTUBE_URL
            .captures(url.trim())
            .and_then(|caps| caps.get(1))
            .map(|id| Self(id.as_str().to_string()))
            .ok_or_else(|| Error::InvalidVideoUrl {
                url: url.to_string(),
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Transcript ─────────────────────────────────────────────────────

/// One caption or phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start: Option<Duration>,
    pub text: String,
}

/// Full source text for one request, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    segments: Vec<Segment>,
}

impl Transcript {
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// A transcript with no timing information.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment {
                start: None,
                text: text.into(),
            }],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }

    /// Render as pipeline input, one line per segment.
    pub fn to_text(&self) -> String {
        let lines: Vec<String> = self
            .segments
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| match s.start {
                Some(start) => format!("[{}] {}", format_timestamp(start), s.text.trim()),
                None => s.text.trim().to_string(),
            })
            .collect();
        lines.join("\n")
    }
}

/// `HH:MM:SS`, truncating fractional seconds.
pub fn format_timestamp(at: Duration) -> String {
    let secs = at.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

// ── Providers ──────────────────────────────────────────────────────

pub type TranscriptFuture<'a> = Pin<Box<dyn Future<Output = Result<Transcript>> + Send + 'a>>;

/// Supplies the transcript for a video.
pub trait TranscriptProvider: Send + Sync {
    /// Fails with [`Error::TranscriptUnavailable`] when there is none.
    fn fetch<'a>(&'a self, video: &'a VideoId) -> TranscriptFuture<'a>;
}

/// In-memory transcripts keyed by video id.
#[derive(Debug, Clone, Default)]
pub struct StaticTranscripts {
    transcripts: HashMap<String, Transcript>,
}

impl StaticTranscripts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transcript(mut self, video_id: impl Into<String>, transcript: Transcript) -> Self {
        self.transcripts.insert(video_id.into(), transcript);
        self
    }
}

impl TranscriptProvider for StaticTranscripts {
    fn fetch<'a>(&'a self, video: &'a VideoId) -> TranscriptFuture<'a> {
        Box::pin(async move {
            self.transcripts
                .get(video.as_str())
                .cloned()
                .ok_or_else(|| Error::transcript_unavailable(video.as_str(), "no transcript stored"))
        })
    }
}

/// Transcripts stored on disk as `<dir>/<id>.json` (segment array) or
/// `<dir>/<id>.txt` (plain text). JSON wins when both exist.
#[derive(Debug, Clone)]
pub struct DirectoryTranscripts {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct StoredSegment {
    #[serde(default)]
    start: Option<f64>,
    text: String,
}

impl DirectoryTranscripts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn load(&self, video: &VideoId) -> Result<Transcript> {
        let json_path = self.dir.join(format!("{video}.json"));
        if let Ok(raw) = tokio::fs::read_to_string(&json_path).await {
            debug!("Loading transcript from {}", json_path.display());
            let stored: Vec<StoredSegment> = serde_json::from_str(&raw).map_err(|e| {
                Error::transcript_unavailable(video.as_str(), format!("malformed {}: {e}", json_path.display()))
            })?;
            let segments = stored
                .into_iter()
                .map(|s| Segment {
                    start: s.start.and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
                    text: s.text,
                })
                .collect();
            return Ok(Transcript::from_segments(segments));
        }

        let txt_path = self.dir.join(format!("{video}.txt"));
        match tokio::fs::read_to_string(&txt_path).await {
            Ok(text) => {
                debug!("Loading transcript from {}", txt_path.display());
                Ok(Transcript::from_text(text))
            }
            Err(e) => Err(Error::transcript_unavailable(
                video.as_str(),
                format!("no transcript in {}: {e}", self.dir.display()),
            )),
        }
    }
}

impl TranscriptProvider for DirectoryTranscripts {
    fn fetch<'a>(&'a self, video: &'a VideoId) -> TranscriptFuture<'a> {
        Box::pin(self.load(video))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_url_shapes() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "youtube.com/watch?v=dQw4w9WgXcQ&t=42s",
            "https://youtu.be/dQw4w9WgXcQ",
            "http://youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
        ] {
            assert_eq!(VideoId::parse(url).unwrap().as_str(), "dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn rejects_non_video_urls() {
        for url in [
            "https://vimeo.com/12345678901",
            "https://youtube.com/watch?v=short",
            "not a url",
            "",
        ] {
            let err = VideoId::parse(url).unwrap_err();
            assert!(matches!(err, Error::InvalidVideoUrl { .. }), "{url}");
        }
    }

    #[test]
    fn renders_timestamps() {
        let transcript = Transcript::from_segments(vec![
            Segment {
                start: Some(Duration::from_secs(5)),
                text: " hello ".into(),
            },
            Segment {
                start: Some(Duration::from_secs(3725)),
                text: "later".into(),
            },
            Segment {
                start: None,
                text: "   ".into(),
            },
            Segment {
                start: None,
                text: "untimed".into(),
            },
        ]);
        assert_eq!(
            transcript.to_text(),
            "[00:00:05] hello\n[01:02:05] later\nuntimed"
        );
    }

    #[test]
    fn blank_transcript_is_empty() {
        assert!(Transcript::from_text(" \n ").is_empty());
        assert!(!Transcript::from_text("words").is_empty());
    }

    #[tokio::test]
    async fn static_provider_misses_are_unavailable() {
        let provider = StaticTranscripts::new().with_transcript("dQw4w9WgXcQ", Transcript::from_text("hi"));
        let hit = VideoId::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(provider.fetch(&hit).await.unwrap().to_text(), "hi");

        let miss = VideoId::parse("https://youtu.be/aaaaaaaaaaa").unwrap();
        let err = provider.fetch(&miss).await.unwrap_err();
        assert!(matches!(err, Error::TranscriptUnavailable { .. }));
    }

    #[tokio::test]
    async fn directory_provider_reads_json_and_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("aaaaaaaaaaa.json"),
            r#"[{"start": 61.5, "text": "first"}, {"text": "second"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("bbbbbbbbbbb.txt"), "plain words").unwrap();
        let provider = DirectoryTranscripts::new(dir.path());

        let json = provider
            .fetch(&VideoId::parse("https://youtu.be/aaaaaaaaaaa").unwrap())
            .await
            .unwrap();
        assert_eq!(json.to_text(), "[00:01:01] first\nsecond");

        let txt = provider
            .fetch(&VideoId::parse("https://youtu.be/bbbbbbbbbbb").unwrap())
            .await
            .unwrap();
        assert_eq!(txt.to_text(), "plain words");

        let err = provider
            .fetch(&VideoId::parse("https://youtu.be/ccccccccccc").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TranscriptUnavailable { .. }));
    }
}
