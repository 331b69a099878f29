//! The command executor.
//!
//! Every operation is a [`Command`] value fed through [`Executor::apply`].
//! [`Context`] executes commands against its device; the recorder wraps any
//! executor and logs what passes through. [`ExecutorExt`] adds one typed
//! method per operation on top of either.

mod clear;
mod create;
mod draw;
mod params;
mod timer;
mod transfer;

pub use params::{
    Attachment, AttributeParams, BlitParams, BlobParams, BufferParams, ClearParams, ClearPattern,
    CopyParams, DrawParams, FrameTargetParams, ProgramParams, ReadPixelsParams,
    RenderTargetParams, SamplerParams, TextureParams, VertexArrayParams, WriteBufferParams,
    WriteTextureParams,
};

use std::time::Duration;

use crate::context::Context;
use crate::device::Device;
use crate::error::{Error, Result, StatusError};
use crate::handle::{
    BlobId, BufferId, FrameTargetId, Handle, ProgramId, RenderTargetId, ResourceKind, SamplerId,
    TextureId, VertexArrayId,
};
use crate::poll::{AsyncResult, PixelBuffer};
use crate::record::Command;
use crate::state::{StateUpdate, apply_update};

/// What a command produced.
#[derive(Debug)]
pub enum Outcome {
    Done,
    /// Raw handle of the created object.
    Created(u32),
    Read(AsyncResult<PixelBuffer>),
    Elapsed(AsyncResult<Duration>),
    Status(Option<StatusError>),
}

pub trait Executor {
    fn apply(&mut self, command: Command) -> Result<Outcome>;

    /// Lowest free handle of `kind`.
    fn next_handle(&mut self, kind: ResourceKind) -> Result<u32>;
}

fn unexpected(op: &str, outcome: Outcome) -> Error {
    Error::invalid(format!("{op} produced {outcome:?}"))
}

fn created<H: Handle>(op: &str, outcome: Outcome) -> Result<H> {
    match outcome {
        Outcome::Created(raw) => Ok(H::from_raw(raw)),
        other => Err(unexpected(op, other)),
    }
}

fn done(op: &str, outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::Done => Ok(()),
        other => Err(unexpected(op, other)),
    }
}

/// Typed entry points over [`Executor::apply`].
pub trait ExecutorExt: Executor {
    fn reserve_handle<H: Handle>(&mut self) -> Result<H> {
        self.next_handle(H::KIND).map(H::from_raw)
    }

    fn create_program(&mut self, id: ProgramId, params: ProgramParams) -> Result<ProgramId> {
        created("createProgram", self.apply(Command::CreateProgram(id, params))?)
    }

    fn delete_program(&mut self, id: ProgramId) -> Result<()> {
        done("deleteProgram", self.apply(Command::DeleteProgram(id))?)
    }

    fn create_buffer(&mut self, id: BufferId, params: BufferParams) -> Result<BufferId> {
        created("createBuffer", self.apply(Command::CreateBuffer(id, params))?)
    }

    fn write_buffer(&mut self, id: BufferId, params: WriteBufferParams) -> Result<()> {
        done("writeBuffer", self.apply(Command::WriteBuffer(id, params))?)
    }

    fn delete_buffer(&mut self, id: BufferId) -> Result<()> {
        done("deleteBuffer", self.apply(Command::DeleteBuffer(id))?)
    }

    fn create_vertex_array(
        &mut self,
        id: VertexArrayId,
        params: VertexArrayParams,
    ) -> Result<VertexArrayId> {
        created(
            "createVertexArray",
            self.apply(Command::CreateVertexArray(id, params))?,
        )
    }

    fn delete_vertex_array(&mut self, id: VertexArrayId) -> Result<()> {
        done("deleteVertexArray", self.apply(Command::DeleteVertexArray(id))?)
    }

    fn create_sampler(&mut self, id: SamplerId, params: SamplerParams) -> Result<SamplerId> {
        created("createSampler", self.apply(Command::CreateSampler(id, params))?)
    }

    fn delete_sampler(&mut self, id: SamplerId) -> Result<()> {
        done("deleteSampler", self.apply(Command::DeleteSampler(id))?)
    }

    fn create_texture(&mut self, id: TextureId, params: TextureParams) -> Result<TextureId> {
        created("createTexture", self.apply(Command::CreateTexture(id, params))?)
    }

    fn write_texture(&mut self, id: TextureId, params: WriteTextureParams) -> Result<()> {
        done("writeTexture", self.apply(Command::WriteTexture(id, params))?)
    }

    fn delete_texture(&mut self, id: TextureId) -> Result<()> {
        done("deleteTexture", self.apply(Command::DeleteTexture(id))?)
    }

    fn create_render_target(
        &mut self,
        id: RenderTargetId,
        params: RenderTargetParams,
    ) -> Result<RenderTargetId> {
        created(
            "createRenderTarget",
            self.apply(Command::CreateRenderTarget(id, params))?,
        )
    }

    fn delete_render_target(&mut self, id: RenderTargetId) -> Result<()> {
        done("deleteRenderTarget", self.apply(Command::DeleteRenderTarget(id))?)
    }

    fn create_frame_target(
        &mut self,
        id: FrameTargetId,
        params: FrameTargetParams,
    ) -> Result<FrameTargetId> {
        created(
            "createFrameTarget",
            self.apply(Command::CreateFrameTarget(id, params))?,
        )
    }

    fn delete_frame_target(&mut self, id: FrameTargetId) -> Result<()> {
        done("deleteFrameTarget", self.apply(Command::DeleteFrameTarget(id))?)
    }

    fn create_blob(&mut self, id: BlobId, params: BlobParams) -> Result<BlobId> {
        created("createBlob", self.apply(Command::CreateBlob(id, params))?)
    }

    fn delete_blob(&mut self, id: BlobId) -> Result<()> {
        done("deleteBlob", self.apply(Command::DeleteBlob(id))?)
    }

    fn state(&mut self, update: StateUpdate) -> Result<()> {
        done("state", self.apply(Command::State(Box::new(update)))?)
    }

    fn clear(&mut self, params: ClearParams) -> Result<()> {
        done("clear", self.apply(Command::Clear(params))?)
    }

    fn draw(&mut self, params: DrawParams) -> Result<()> {
        done("draw", self.apply(Command::Draw(params))?)
    }

    fn blit(&mut self, params: BlitParams) -> Result<()> {
        done("blit", self.apply(Command::Blit(params))?)
    }

    fn copy(&mut self, params: CopyParams) -> Result<()> {
        done("copy", self.apply(Command::Copy(params))?)
    }

    /// Starts a readback. Returns at once; drive the result with `poll`.
    fn read_pixels(&mut self, params: ReadPixelsParams) -> Result<AsyncResult<PixelBuffer>> {
        match self.apply(Command::ReadPixels(params))? {
            Outcome::Read(result) => Ok(result),
            other => Err(unexpected("readPixels", other)),
        }
    }

    fn begin_timer(&mut self) -> Result<()> {
        done("beginTimer", self.apply(Command::BeginTimer)?)
    }

    /// Closes the running timer. The result resolves to the device time
    /// spent between the two calls.
    fn end_timer(&mut self) -> Result<AsyncResult<Duration>> {
        match self.apply(Command::EndTimer)? {
            Outcome::Elapsed(result) => Ok(result),
            other => Err(unexpected("endTimer", other)),
        }
    }

    fn flush(&mut self) -> Result<()> {
        done("flush", self.apply(Command::Flush)?)
    }

    /// Pops the oldest advisory device status.
    fn check_status(&mut self) -> Result<Option<StatusError>> {
        match self.apply(Command::CheckStatus)? {
            Outcome::Status(status) => Ok(status),
            other => Err(unexpected("checkStatus", other)),
        }
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}

impl<D: Device> Executor for Context<D> {
    fn apply(&mut self, command: Command) -> Result<Outcome> {
        self.ensure_live()?;
        log::trace!("exec {}", command.name());
        match command {
            Command::CreateProgram(id, p) => {
                self.insert_program(id, p).map(|_| Outcome::Created(id.0))
            }
            Command::DeleteProgram(id) => self.remove_program(id).map(|_| Outcome::Done),
            Command::CreateBuffer(id, p) => {
                self.insert_buffer(id, p).map(|_| Outcome::Created(id.0))
            }
            Command::WriteBuffer(id, p) => self.update_buffer(id, p).map(|_| Outcome::Done),
            Command::DeleteBuffer(id) => self.remove_buffer(id).map(|_| Outcome::Done),
            Command::CreateVertexArray(id, p) => {
                self.insert_vertex_array(id, p).map(|_| Outcome::Created(id.0))
            }
            Command::DeleteVertexArray(id) => self.remove_vertex_array(id).map(|_| Outcome::Done),
            Command::CreateSampler(id, p) => {
                self.insert_sampler(id, p).map(|_| Outcome::Created(id.0))
            }
            Command::DeleteSampler(id) => self.remove_sampler(id).map(|_| Outcome::Done),
            Command::CreateTexture(id, p) => {
                self.insert_texture(id, p).map(|_| Outcome::Created(id.0))
            }
            Command::WriteTexture(id, p) => self.update_texture(id, p).map(|_| Outcome::Done),
            Command::DeleteTexture(id) => self.remove_texture(id).map(|_| Outcome::Done),
            Command::CreateRenderTarget(id, p) => {
                self.insert_render_target(id, p).map(|_| Outcome::Created(id.0))
            }
            Command::DeleteRenderTarget(id) => {
                self.remove_render_target(id).map(|_| Outcome::Done)
            }
            Command::CreateFrameTarget(id, p) => {
                self.insert_frame_target(id, p).map(|_| Outcome::Created(id.0))
            }
            Command::DeleteFrameTarget(id) => self.remove_frame_target(id).map(|_| Outcome::Done),
            Command::CreateBlob(id, p) => self.insert_blob(id, p).map(|_| Outcome::Created(id.0)),
            Command::DeleteBlob(id) => self.remove_blob(id).map(|_| Outcome::Done),
            Command::State(update) => apply_update(
                &mut self.device,
                &mut self.table,
                &self.limits,
                &mut self.state,
                &update,
            )
            .map(|_| Outcome::Done),
            Command::Clear(p) => self.clear_planes(&p).map(|_| Outcome::Done),
            Command::Draw(p) => self.draw_primitives(&p).map(|_| Outcome::Done),
            Command::Blit(p) => self.blit_region(&p).map(|_| Outcome::Done),
            Command::Copy(p) => self.copy_range(&p).map(|_| Outcome::Done),
            Command::ReadPixels(p) => self.start_readback(&p).map(Outcome::Read),
            Command::BeginTimer => self.start_timer().map(|_| Outcome::Done),
            Command::EndTimer => self.stop_timer().map(Outcome::Elapsed),
            Command::Flush => {
                self.device.flush()?;
                Ok(Outcome::Done)
            }
            Command::CheckStatus => Ok(Outcome::Status(self.device.check_status())),
        }
    }

    fn next_handle(&mut self, kind: ResourceKind) -> Result<u32> {
        self.ensure_live()?;
        Ok(self.table.next_free(kind))
    }
}
