//! Local video file source decoded with FFmpeg.
//!
//! Frames are decoded in memory and converted to RGB24. Elapsed time comes
//! from each frame's presentation timestamp, falling back to `index / fps`
//! when the container carries none. Only local paths are opened.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{SourceSettings, SourceStats};
use crate::frame::Frame;

pub struct FileSource {
    path: String,
    settings: SourceSettings,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: f64,
    fallback_fps: f64,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    first_pts: Option<i64>,
    frame_count: u64,
    draining: bool,
    finished: bool,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

impl FileSource {
    pub fn new(path: &str, settings: SourceSettings) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video track", path))?;
        let stream_index = input_stream.index();
        let time_base = f64::from(input_stream.time_base());
        let rate = f64::from(input_stream.avg_frame_rate());
        let fallback_fps = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            settings.target_fps.max(1) as f64
        };
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.to_string(),
            settings,
            input,
            stream_index,
            time_base,
            fallback_fps,
            decoder,
            scaler,
            first_pts: None,
            frame_count: 0,
            draining: false,
            finished: false,
            connected_at: None,
            last_error: None,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        self.connected_at = Some(Instant::now());
        log::info!(
            "FileSource: opened {} ({}x{}, {:.1} fps)",
            self.path,
            self.decoder.width(),
            self.decoder.height(),
            self.fallback_fps
        );
        Ok(())
    }

    /// Decode the next frame; `None` once the file is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.connected_at.is_none() {
            return Err(anyhow!("file source {} not connected", self.path));
        }
        if let Some(limit) = self.settings.max_frames {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        if self.finished {
            return Ok(None);
        }

        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.emit(&decoded).map(Some);
        }

        while let Some((stream, packet)) = self.input.packets().next() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.emit(&decoded).map(Some);
            }
        }

        // Drain frames still buffered in the decoder.
        if !self.draining {
            self.draining = true;
            self.decoder.send_eof().context("flush ffmpeg decoder")?;
        }
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.emit(&decoded).map(Some);
        }
        self.finished = true;
        log::info!(
            "FileSource: {} ended after {} frames",
            self.path,
            self.frame_count
        );
        Ok(None)
    }

    fn emit(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                err
            })?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;

        let index = self.frame_count;
        self.frame_count += 1;
        let elapsed = self.elapsed_for(decoded.pts(), index);
        Frame::new(pixels, width, height, index, elapsed)
    }

    fn elapsed_for(&mut self, pts: Option<i64>, index: u64) -> Duration {
        match pts {
            Some(pts) if self.time_base > 0.0 => {
                let first = *self.first_pts.get_or_insert(pts);
                let seconds = (pts - first) as f64 * self.time_base;
                Duration::from_secs_f64(seconds.max(0.0))
            }
            _ => Duration::from_secs_f64(index as f64 / self.fallback_fps),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.last_error.is_none() && self.connected_at.is_some()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
