use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use image::{DynamicImage, GrayImage, ImageOutputFormat};
use log::debug;
use serde::{Deserialize, Serialize};

/// Axis-aligned face box as reported by an annotator, in pixels.
///
/// Signed so that boxes hanging off the image edge survive deserialization;
/// [`FaceRegion::clamp`] trims them to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl FaceRegion {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        FaceRegion { x, y, width, height }
    }

    /// Intersect with a `width` x `height` image.
    ///
    /// Returns `(x, y, w, h)` in image coordinates, or `None` when nothing of
    /// the box lies inside the image.
    pub fn clamp(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = self.x.saturating_add(self.width).min(width as i64);
        let y1 = self.y.saturating_add(self.height).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Face detection capability.
///
/// Receives a single-channel copy of the image and returns zero or more
/// regions. Implementations are shared across extraction workers.
pub trait ImageAnnotator: Send + Sync {
    fn detect_faces(&self, image: &GrayImage) -> Result<Vec<FaceRegion>>;
}

/// Annotator backed by an external detector process.
///
/// The grayscale image is written to the child's stdin as PNG; the child
/// must print a JSON array of `{"x", "y", "width", "height"}` objects on
/// stdout and exit successfully. One process is spawned per image.
#[derive(Debug, Clone)]
pub struct CommandAnnotator {
    program: String,
    args: Vec<String>,
}

impl CommandAnnotator {
    /// Build from an argv-style command line
    pub fn from_command(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .filter(|(p, _)| !p.trim().is_empty())
            .ok_or_else(|| anyhow!("annotator command is empty"))?;
        Ok(CommandAnnotator {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl ImageAnnotator for CommandAnnotator {
    fn detect_faces(&self, image: &GrayImage) -> Result<Vec<FaceRegion>> {
        let mut png = Vec::new();
        DynamicImage::ImageLuma8(image.clone())
            .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
            .context("Failed to encode image for annotator")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start annotator '{}'", self.program))?;

        // Feed stdin from another thread so a chatty child cannot deadlock us
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("annotator stdin unavailable"))?;
        let writer = thread::spawn(move || stdin.write_all(&png));

        let output = child
            .wait_with_output()
            .context("Failed to wait for annotator")?;
        let write_result = writer
            .join()
            .map_err(|_| anyhow!("annotator input thread panicked"))?;

        if !output.status.success() {
            bail!(
                "annotator exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        // A detector may legitimately stop reading once it has its answer
        if let Err(e) = write_result {
            debug!("Annotator closed its input early: {}", e);
        }

        let regions: Vec<FaceRegion> = serde_json::from_slice(&output.stdout)
            .context("Annotator output is not a JSON array of face regions")?;
        debug!("Annotator reported {} face regions", regions.len());
        Ok(regions)
    }
}
