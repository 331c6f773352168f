//! Source images: loading, the placeholder, output naming and file watching.

use crate::error::{FilterError, Result};
use image::RgbaImage;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use tracing::{info, warn};

/// Output name used when no input file was chosen.
pub const DEFAULT_OUTPUT_NAME: &str = "result.gif";

const PLACEHOLDER_SIZE: u32 = 64;

/// The image fed to the filters, and the file it came from.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub image: RgbaImage,
    /// `None` for the placeholder.
    pub path: Option<PathBuf>,
}

impl ImageInput {
    /// Decodes an image file. The format is sniffed from the contents, so
    /// a misleading extension does not matter.
    pub fn open(path: &Path) -> Result<Self> {
        let unsupported = |reason: String| FilterError::UnsupportedInputFile {
            path: path.to_path_buf(),
            reason,
        };
        let reader = image::ImageReader::open(path)
            .map_err(|e| unsupported(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| unsupported(e.to_string()))?;
        if reader.format().is_none() {
            return Err(unsupported("not an image".to_string()));
        }
        let image = reader.decode().map_err(|e| unsupported(e.to_string()))?;
        info!("Loaded {:?} ({}x{})", path, image.width(), image.height());
        Ok(Self {
            image: image.to_rgba8(),
            path: Some(path.to_path_buf()),
        })
    }

    /// The built-in image shown when no usable file is selected.
    pub fn placeholder() -> Self {
        Self {
            image: placeholder_image(),
            path: None,
        }
    }

    /// Opens `path`, falling back to the placeholder (and forgetting the
    /// path) when it is not a usable image.
    pub fn open_or_placeholder(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::placeholder();
        };
        match Self::open(path) {
            Ok(input) => input,
            Err(e) => {
                warn!("{}; using placeholder", e);
                Self::placeholder()
            }
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.path.is_none()
    }

    /// Name of the exported GIF for this input.
    pub fn output_file_name(&self) -> String {
        output_file_name(self.path.as_deref())
    }
}

/// `<file name without its last extension>.gif`, or `result.gif`.
pub fn output_file_name(path: Option<&Path>) -> String {
    let Some(name) = path.and_then(Path::file_name).map(|n| n.to_string_lossy()) else {
        return DEFAULT_OUTPUT_NAME.to_string();
    };
    let stem = match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => &name[..],
    };
    format!("{}.gif", stem)
}

/// Red cross on a light gray tile.
fn placeholder_image() -> RgbaImage {
    let size = PLACEHOLDER_SIZE;
    RgbaImage::from_fn(size, size, |x, y| {
        let on_diagonal = x.abs_diff(y) <= 4 || (x + y).abs_diff(size - 1) <= 4;
        let on_border = x < 3 || y < 3 || x >= size - 3 || y >= size - 3;
        if on_diagonal && !on_border {
            image::Rgba([204, 32, 32, 255])
        } else if on_border {
            image::Rgba([120, 120, 120, 255])
        } else {
            image::Rgba([230, 230, 230, 255])
        }
    })
}

/// Watches the source image and reports when it changed on disk.
pub struct ImageWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
}

impl ImageWatcher {
    pub fn new(path: &Path) -> Option<Self> {
        let (tx, rx) = channel();
        match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
                    warn!("Failed to watch image {:?}: {}", path, e);
                    return None;
                }
                info!("Watching image {:?} for changes", path);
                Some(Self {
                    path: path.to_path_buf(),
                    _watcher: watcher,
                    rx,
                })
            }
            Err(e) => {
                warn!("Failed to create image watcher: {}", e);
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drains pending events; returns the reloaded image if the file was
    /// modified. Unreadable intermediate states are skipped.
    pub fn check_for_changes(&mut self) -> Option<ImageInput> {
        let mut changed = false;
        while let Ok(res) = self.rx.try_recv() {
            if let Ok(event) = res {
                if matches!(event.kind, notify::EventKind::Modify(_) | notify::EventKind::Create(_)) {
                    changed = true;
                }
            }
        }
        if !changed {
            return None;
        }
        match ImageInput::open(&self.path) {
            Ok(input) => Some(input),
            Err(e) => {
                warn!("Ignoring change: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name(None), "result.gif");
        assert_eq!(output_file_name(Some(Path::new("/tmp/kappa.png"))), "kappa.gif");
        assert_eq!(output_file_name(Some(Path::new("dir/emote.v2.webp"))), "emote.v2.gif");
        assert_eq!(output_file_name(Some(Path::new("noext"))), "noext.gif");
    }

    #[test]
    fn test_open_decodes_sniffed_image() {
        let dir = tempfile::tempdir().unwrap();
        // PNG contents behind a misleading extension.
        let path = dir.path().join("emote.jpg");
        let image = RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]));
        image.save_with_format(&path, image::ImageFormat::Png).unwrap();

        let input = ImageInput::open(&path).unwrap();
        assert_eq!(input.image.dimensions(), (3, 2));
        assert_eq!(input.image.get_pixel(0, 0), &image::Rgba([1, 2, 3, 255]));
        assert_eq!(input.output_file_name(), "emote.gif");
    }

    #[test]
    fn test_non_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.png");
        fs::write(&path, "just some text, not pixels").unwrap();

        let err = ImageInput::open(&path).unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedInputFile { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_non_image_falls_back_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "hello").unwrap();

        let input = ImageInput::open_or_placeholder(Some(&path));
        assert!(input.is_placeholder());
        assert!(input.path.is_none());
        assert_eq!(input.image, ImageInput::placeholder().image);
        assert_eq!(input.output_file_name(), "result.gif");
    }

    #[test]
    fn test_missing_file_falls_back_to_placeholder() {
        let input = ImageInput::open_or_placeholder(Some(Path::new("/nonexistent/emote.png")));
        assert!(input.is_placeholder());
    }
}
