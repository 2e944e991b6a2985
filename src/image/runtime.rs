//! Local image runtime
//!
//! The packager never talks to a registry. It asks the local runtime for the
//! image's content id and, on a cache miss, for a full `save` export.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};

use super::{ImageError, ImageReference};

/// Inspects and exports images from the local image store.
pub trait ImageRuntime: Send + Sync {
    /// Content id of the image, without the algorithm prefix.
    fn image_id(&self, image: &ImageReference) -> Result<String, ImageError>;

    /// Unpack a full export of the image into `dest`.
    fn export(&self, image: &ImageReference, dest: &Path) -> Result<(), ImageError>;
}

/// Runtime driven through a docker-compatible CLI (`docker`, `podman`).
#[derive(Debug, Clone)]
pub struct CliRuntime {
    program: String,
}

impl CliRuntime {
    /// Create a runtime that invokes `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn spawn_error(&self, source: std::io::Error) -> ImageError {
        ImageError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

impl Default for CliRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

/// Strip the `algo:` prefix from an inspect id.
pub(crate) fn parse_image_id(output: &str) -> Option<String> {
    let id = output.trim();
    let hex = id.rsplit_once(':').map_or(id, |(_, hex)| hex);
    let valid = !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    valid.then(|| hex.to_string())
}

impl ImageRuntime for CliRuntime {
    fn image_id(&self, image: &ImageReference) -> Result<String, ImageError> {
        let output = Command::new(&self.program)
            .args(["image", "inspect", "--format", "{{.Id}}"])
            .arg(image.to_string())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(ImageError::ToolFailed {
                program: self.program.clone(),
                action: "inspect".to_string(),
                image: image.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_image_id(&stdout).ok_or_else(|| ImageError::BadImageId {
            program: self.program.clone(),
            output: stdout.trim().to_string(),
        })
    }

    fn export(&self, image: &ImageReference, dest: &Path) -> Result<(), ImageError> {
        let mut child = Command::new(&self.program)
            .arg("save")
            .arg(image.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // Drain stderr on the side so a chatty runtime cannot block the pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        let unpacked = match child.stdout.take() {
            Some(stdout) => tar::Archive::new(stdout).unpack(dest),
            None => Ok(()),
        };

        let status = child.wait().map_err(|e| self.spawn_error(e))?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(ImageError::ToolFailed {
                program: self.program.clone(),
                action: "save".to_string(),
                image: image.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        unpacked.map_err(ImageError::Unpack)?;

        tracing::debug!(image = %image, dest = %dest.display(), "Exported image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_id_strips_algorithm() {
        assert_eq!(parse_image_id("sha256:ab12\n").as_deref(), Some("ab12"));
        assert_eq!(parse_image_id("cafe").as_deref(), Some("cafe"));
    }

    #[test]
    fn test_parse_image_id_rejects_garbage() {
        assert_eq!(parse_image_id(""), None);
        assert_eq!(parse_image_id("sha256:"), None);
        assert_eq!(parse_image_id("no such image"), None);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let runtime = CliRuntime::new("boinc2docker-no-such-runtime");
        let image = ImageReference::parse("app").unwrap();
        assert!(matches!(
            runtime.image_id(&image),
            Err(ImageError::Spawn { .. })
        ));
    }
}
