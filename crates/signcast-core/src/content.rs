//! Content references and edge-side file-type dispatch.
//!
//! The core never touches media bytes; it forwards content by id. Only a
//! display endpoint looks at `type`/`file_url` to pick a renderer.

use serde::{Deserialize, Serialize};

use crate::protocol::ids::ContentId;

/// Content metadata as returned by the content API (`GET /api/contents/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub id: ContentId,
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// How a display should present a content item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    Video { url: String },
    Image { url: String },
    /// Known item but nothing a screen can render.
    Unsupported { content_type: String },
    /// No file attached yet.
    Empty,
}

impl ContentRef {
    /// Pick a renderer for this item.
    ///
    /// Videos must point at an `.mp4`; anything else typed `video` falls back
    /// to the image path, as screens only ship an mp4 decoder.
    pub fn presentation(&self) -> Presentation {
        let Some(url) = self.file_url.as_deref().filter(|u| !u.is_empty()) else {
            return Presentation::Empty;
        };
        let url = url.to_string();
        match self.content_type.as_str() {
            "video" if url.to_ascii_lowercase().ends_with(".mp4") => Presentation::Video { url },
            "video" | "image" => Presentation::Image { url },
            other => Presentation::Unsupported {
                content_type: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(ty: &str, url: Option<&str>) -> ContentRef {
        ContentRef {
            id: ContentId::from(7u64),
            content_type: ty.into(),
            file_url: url.map(str::to_string),
            title: Some("promo".into()),
        }
    }

    #[test]
    fn mp4_video_plays_as_video() {
        assert_eq!(
            item("video", Some("https://cdn/x/Promo.MP4")).presentation(),
            Presentation::Video { url: "https://cdn/x/Promo.MP4".into() }
        );
    }

    #[test]
    fn non_mp4_video_falls_back_to_image() {
        assert!(matches!(
            item("video", Some("/storage/a.webm")).presentation(),
            Presentation::Image { .. }
        ));
    }

    #[test]
    fn other_types_are_unsupported_and_missing_url_is_empty() {
        assert_eq!(
            item("pdf", Some("/storage/a.pdf")).presentation(),
            Presentation::Unsupported { content_type: "pdf".into() }
        );
        assert_eq!(item("image", None).presentation(), Presentation::Empty);
        assert_eq!(item("image", Some("")).presentation(), Presentation::Empty);
    }
}
