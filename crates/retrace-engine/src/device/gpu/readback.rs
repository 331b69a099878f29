use std::sync::mpsc::{Receiver, TryRecvError};

use crate::device::texel;
use crate::device::types::{PixelFormat, PixelType, Rect, TextureFormat};
use crate::device::{Fence, FenceStatus};

/// Where a staged copy sits inside the requested rectangle, and how to
/// convert it.
///
/// Rectangles are in bottom-left window coordinates. Staged rows arrive
/// top-down with `padded_row` bytes each.
#[derive(Debug, Clone)]
pub struct ReadLayout {
    pub rect: Rect,
    pub copied: Rect,
    pub padded_row: usize,
    pub source: TextureFormat,
    pub format: PixelFormat,
    pub ty: PixelType,
}

impl ReadLayout {
    /// Converts staged bytes into tightly packed bottom-up rows. Pixels
    /// outside the copied region read as zero.
    pub fn convert(&self, staged: &[u8]) -> Vec<u8> {
        let channels = self.format.channels();
        let texel_size = self.source.texel_size();
        let (w, h) = (self.rect.width.max(0), self.rect.height.max(0));
        let c = self.copied;
        let mut out = Vec::with_capacity(w as usize * h as usize * channels * self.ty.size());

        for gy in self.rect.y..self.rect.y + h {
            for gx in self.rect.x..self.rect.x + w {
                let inside = gx >= c.x && gx < c.x + c.width && gy >= c.y && gy < c.y + c.height;
                let value = if inside {
                    let row = (c.y + c.height - 1 - gy) as usize;
                    let at = row * self.padded_row + (gx - c.x) as usize * texel_size;
                    staged
                        .get(at..at + texel_size)
                        .map(|b| texel::decode(self.source, b).to_f64())
                        .unwrap_or([0.0; 4])
                } else {
                    [0.0; 4]
                };
                for v in value.iter().take(channels) {
                    self.ty.push(*v, &mut out);
                }
            }
        }
        out
    }
}

/// How the mapped bytes of a fence become its result.
#[derive(Debug, Clone)]
pub enum Decode {
    Pixels(ReadLayout),
    /// Two resolved timestamps, start then end, in ticks of `period`
    /// nanoseconds.
    Elapsed { period: f32 },
}

impl Decode {
    fn apply(&self, staged: &[u8]) -> Vec<u8> {
        match self {
            Decode::Pixels(layout) => layout.convert(staged),
            Decode::Elapsed { period } => {
                let tick = |i: usize| {
                    staged
                        .get(i * 8..i * 8 + 8)
                        .and_then(|b| b.try_into().ok())
                        .map(u64::from_le_bytes)
                        .unwrap_or(0)
                };
                // Timestamps may go backwards across a power-state change.
                let ticks = tick(1).saturating_sub(tick(0));
                let nanos = (ticks as f64 * f64::from(*period)) as u64;
                nanos.to_le_bytes().to_vec()
            }
        }
    }
}

impl From<ReadLayout> for Decode {
    fn from(layout: ReadLayout) -> Self {
        Decode::Pixels(layout)
    }
}

enum Stage {
    Mapping {
        buffer: wgpu::Buffer,
        done: Receiver<Result<(), wgpu::BufferAsyncError>>,
    },
    /// Nothing was inside the attachment; resolves to zeros on first poll.
    Empty,
    /// Rejected before anything was staged.
    Failed(String),
    Finished,
    Cancelled,
}

/// Readback or query result staged into a mappable buffer.
///
/// `poll` drives the device without waiting and checks whether the map
/// callback has fired.
pub struct GpuFence {
    device: wgpu::Device,
    stage: Stage,
    decode: Decode,
}

impl GpuFence {
    pub fn mapping(
        device: wgpu::Device,
        buffer: wgpu::Buffer,
        done: Receiver<Result<(), wgpu::BufferAsyncError>>,
        decode: impl Into<Decode>,
    ) -> Self {
        Self {
            device,
            stage: Stage::Mapping { buffer, done },
            decode: decode.into(),
        }
    }

    pub fn empty(device: wgpu::Device, decode: impl Into<Decode>) -> Self {
        Self {
            device,
            stage: Stage::Empty,
            decode: decode.into(),
        }
    }

    pub fn failed(
        device: wgpu::Device,
        decode: impl Into<Decode>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            device,
            stage: Stage::Failed(reason.into()),
            decode: decode.into(),
        }
    }
}

impl Fence for GpuFence {
    fn poll(&mut self) -> FenceStatus {
        match &self.stage {
            Stage::Cancelled => return FenceStatus::Failed("cancelled".into()),
            Stage::Finished => return FenceStatus::Failed("fence already consumed".into()),
            Stage::Empty => {
                self.stage = Stage::Finished;
                return FenceStatus::Ready(self.decode.apply(&[]));
            }
            Stage::Failed(reason) => {
                let reason = reason.clone();
                self.stage = Stage::Finished;
                return FenceStatus::Failed(reason);
            }
            Stage::Mapping { .. } => {}
        }

        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("device poll failed: {e}");
        }

        let Stage::Mapping { buffer, done } = &self.stage else {
            return FenceStatus::Pending;
        };
        match done.try_recv() {
            Err(TryRecvError::Empty) => FenceStatus::Pending,
            Err(TryRecvError::Disconnected) => {
                self.stage = Stage::Finished;
                FenceStatus::Failed("map callback dropped".into())
            }
            Ok(Err(e)) => {
                self.stage = Stage::Finished;
                FenceStatus::Failed(e.to_string())
            }
            Ok(Ok(())) => {
                let data = {
                    let view = buffer.slice(..).get_mapped_range();
                    self.decode.apply(&view)
                };
                buffer.unmap();
                self.stage = Stage::Finished;
                FenceStatus::Ready(data)
            }
        }
    }

    fn cancel(&mut self) {
        if let Stage::Mapping { buffer, .. } = &self.stage {
            buffer.destroy();
        }
        self.stage = Stage::Cancelled;
    }
}
