use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    /// `video/*` uploads are videos, everything else is treated as an image.
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown media kind {0:?}")]
pub struct UnknownMediaKind(String);

impl TryFrom<String> for MediaKind {
    type Error = UnknownMediaKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            _ => Err(UnknownMediaKind(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_content_type() {
        assert_eq!(MediaKind::from_content_type("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_content_type("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::try_from("video".to_string()).unwrap(), MediaKind::Video);
        assert!(MediaKind::try_from("gif".to_string()).is_err());
    }
}
