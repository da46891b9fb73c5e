use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::path::{Path, PathBuf};

use threadchat::models::message::Message;

/// An image read from disk, ready to go with the next message.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub path: PathBuf,
    pub media_type: &'static str,
    pub data: String,
}

impl Attachment {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let media_type = media_type(path)?;
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            media_type,
            data: BASE64.encode(bytes),
        })
    }
}

fn media_type(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => Ok("image/jpeg"),
        Some("png") => Ok("image/png"),
        _ => bail!("Only jpg and png images can be attached: {}", path.display()),
    }
}

/// The user message for `text` with `attachments` after it.
pub fn user_message(text: &str, attachments: &[Attachment]) -> Message {
    attachments
        .iter()
        .fold(Message::user().with_text(text), |message, image| {
            message.with_image(image.media_type, image.data.as_str())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_encodes_images() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Photo.JPG");
        fs::write(&path, [0xff, 0xd8, 0xff]).unwrap();

        let image = Attachment::load(&path).unwrap();
        assert_eq!(image.media_type, "image/jpeg");
        assert_eq!(image.data, "/9j/");

        let message = user_message("what is this?", &[image]);
        assert_eq!(message.text(), "what is this?");
        assert_eq!(message.images(), vec![("image/jpeg", "/9j/")]);
    }

    #[test]
    fn test_only_jpg_and_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.gif");
        fs::write(&path, b"GIF89a").unwrap();
        let err = Attachment::load(&path).unwrap_err();
        assert!(err.to_string().contains("Only jpg and png"));

        assert!(Attachment::load(dir.path().join("missing.png")).is_err());
    }
}
