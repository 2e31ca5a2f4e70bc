//! Frame sources: a live camera read through ffmpeg, or a single still image.

use failure::Error;
use image::RgbImage;
use log::{debug, info, warn};
use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Supplies frames one at a time. `None` means the source is exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Result<RgbImage, Error>>;
}

/// A camera device decoded by an `ffmpeg` child process into raw RGB frames.
///
/// The child is killed and reaped when the camera is dropped, which releases
/// the device no matter how the reading loop ends.
pub struct FfmpegCamera {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

impl FfmpegCamera {
    pub fn open(device: &str, width: u32, height: u32) -> Result<FfmpegCamera, Error> {
        let device = device_path(device);
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("video4linux2")
            .arg("-i")
            .arg(&device)
            .arg("-vf")
            .arg(format!("scale={}:{}", width, height))
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| format_err!("Could not start ffmpeg for {}: {}", device, e))?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format_err!("Failed to capture ffmpeg stdout"));
            }
        };
        info!("Opened camera {} at {}x{}", device, width, height);
        Ok(FfmpegCamera {
            child,
            stdout,
            width,
            height,
        })
    }
}

impl FrameSource for FfmpegCamera {
    fn next_frame(&mut self) -> Option<Result<RgbImage, Error>> {
        let mut buf = vec![0u8; frame_len(self.width, self.height)];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!("Camera stream ended");
                return None;
            }
            Err(e) => return Some(Err(e.into())),
        }
        Some(
            RgbImage::from_raw(self.width, self.height, buf)
                .ok_or_else(|| format_err!("Camera frame has the wrong size")),
        )
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("Failed to stop ffmpeg: {}", e);
        }
        let _ = self.child.wait();
        info!("Camera released");
    }
}

fn frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Accepts a bare index ("0") as shorthand for `/dev/video0`.
fn device_path(device: &str) -> String {
    if !device.is_empty() && device.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{}", device)
    } else {
        device.to_string()
    }
}

/// Yields one frame, then ends.
pub struct StillImage {
    frame: Option<RgbImage>,
}

impl StillImage {
    pub fn new(frame: RgbImage) -> StillImage {
        StillImage { frame: Some(frame) }
    }
}

impl FrameSource for StillImage {
    fn next_frame(&mut self) -> Option<Result<RgbImage, Error>> {
        self.frame.take().map(Ok)
    }
}

/// Grants the single camera to one stream at a time.
#[derive(Clone, Default)]
pub struct CameraGate {
    busy: Arc<AtomicBool>,
}

/// Proof of exclusive camera use; returned to the gate on drop.
pub struct CameraLease {
    busy: Arc<AtomicBool>,
}

impl CameraGate {
    pub fn try_acquire(&self) -> Option<CameraLease> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(CameraLease {
                busy: self.busy.clone(),
            })
        } else {
            None
        }
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
