use serde::de::{DeserializeOwned, Error as _};
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::binary::BinarySource;
use crate::error::{Error, Result};
use crate::exec::{
    BlitParams, BlobParams, BufferParams, ClearParams, CopyParams, DrawParams, FrameTargetParams,
    ProgramParams, ReadPixelsParams, RenderTargetParams, SamplerParams, TextureParams,
    VertexArrayParams, WriteBufferParams, WriteTextureParams,
};
use crate::handle::{
    BlobId, BufferId, FrameTargetId, ProgramId, RenderTargetId, SamplerId, TextureId,
    VertexArrayId,
};
use crate::state::StateUpdate;

/// One executor operation with its arguments.
///
/// The set is closed: live execution, recording and replay all go through
/// the same variants. The wire form is a JSON array whose first element is
/// the operation name and whose remaining elements are the positional
/// arguments, e.g. `["createBuffer", 0, {"data": {"base64": "AAAA"}}]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateProgram(ProgramId, ProgramParams),
    DeleteProgram(ProgramId),
    CreateBuffer(BufferId, BufferParams),
    WriteBuffer(BufferId, WriteBufferParams),
    DeleteBuffer(BufferId),
    CreateVertexArray(VertexArrayId, VertexArrayParams),
    DeleteVertexArray(VertexArrayId),
    CreateSampler(SamplerId, SamplerParams),
    DeleteSampler(SamplerId),
    CreateTexture(TextureId, TextureParams),
    WriteTexture(TextureId, WriteTextureParams),
    DeleteTexture(TextureId),
    CreateRenderTarget(RenderTargetId, RenderTargetParams),
    DeleteRenderTarget(RenderTargetId),
    CreateFrameTarget(FrameTargetId, FrameTargetParams),
    DeleteFrameTarget(FrameTargetId),
    CreateBlob(BlobId, BlobParams),
    DeleteBlob(BlobId),
    State(Box<StateUpdate>),
    Clear(ClearParams),
    Draw(DrawParams),
    Blit(BlitParams),
    Copy(CopyParams),
    ReadPixels(ReadPixelsParams),
    BeginTimer,
    EndTimer,
    Flush,
    CheckStatus,
}

/// Positional arguments of one log entry.
struct Args<'a> {
    op: &'static str,
    values: &'a [Value],
}

impl Args<'_> {
    fn get<T: DeserializeOwned>(&self, i: usize) -> Result<T> {
        let value = self.values.get(i).ok_or_else(|| {
            Error::format(format!("{} is missing argument {i}", self.op), self.values.len())
        })?;
        T::deserialize(value)
            .map_err(|e| Error::format(format!("bad argument {i} to {} ({e})", self.op), value))
    }

    fn at_most(self, n: usize) -> Result<Self> {
        if self.values.len() > n {
            return Err(Error::format(
                format!("{} takes {n} arguments", self.op),
                self.values.len(),
            ));
        }
        Ok(self)
    }
}

impl Command {
    /// Operation name as it appears in a command log.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateProgram(..) => "createProgram",
            Command::DeleteProgram(_) => "deleteProgram",
            Command::CreateBuffer(..) => "createBuffer",
            Command::WriteBuffer(..) => "writeBuffer",
            Command::DeleteBuffer(_) => "deleteBuffer",
            Command::CreateVertexArray(..) => "createVertexArray",
            Command::DeleteVertexArray(_) => "deleteVertexArray",
            Command::CreateSampler(..) => "createSampler",
            Command::DeleteSampler(_) => "deleteSampler",
            Command::CreateTexture(..) => "createTexture",
            Command::WriteTexture(..) => "writeTexture",
            Command::DeleteTexture(_) => "deleteTexture",
            Command::CreateRenderTarget(..) => "createRenderTarget",
            Command::DeleteRenderTarget(_) => "deleteRenderTarget",
            Command::CreateFrameTarget(..) => "createFrameTarget",
            Command::DeleteFrameTarget(_) => "deleteFrameTarget",
            Command::CreateBlob(..) => "createBlob",
            Command::DeleteBlob(_) => "deleteBlob",
            Command::State(_) => "state",
            Command::Clear(_) => "clear",
            Command::Draw(_) => "draw",
            Command::Blit(_) => "blit",
            Command::Copy(_) => "copy",
            Command::ReadPixels(_) => "readPixels",
            Command::BeginTimer => "beginTimer",
            Command::EndTimer => "endTimer",
            Command::Flush => "flush",
            Command::CheckStatus => "checkStatus",
        }
    }

    fn args(&self) -> serde_json::Result<Vec<Value>> {
        use serde_json::to_value as v;
        Ok(match self {
            Command::CreateProgram(id, p) => vec![v(id)?, v(p)?],
            Command::CreateBuffer(id, p) => vec![v(id)?, v(p)?],
            Command::WriteBuffer(id, p) => vec![v(id)?, v(p)?],
            Command::CreateVertexArray(id, p) => vec![v(id)?, v(p)?],
            Command::CreateSampler(id, p) => vec![v(id)?, v(p)?],
            Command::CreateTexture(id, p) => vec![v(id)?, v(p)?],
            Command::WriteTexture(id, p) => vec![v(id)?, v(p)?],
            Command::CreateRenderTarget(id, p) => vec![v(id)?, v(p)?],
            Command::CreateFrameTarget(id, p) => vec![v(id)?, v(p)?],
            Command::CreateBlob(id, p) => vec![v(id)?, v(p)?],
            Command::DeleteProgram(id) => vec![v(id)?],
            Command::DeleteBuffer(id) => vec![v(id)?],
            Command::DeleteVertexArray(id) => vec![v(id)?],
            Command::DeleteSampler(id) => vec![v(id)?],
            Command::DeleteTexture(id) => vec![v(id)?],
            Command::DeleteRenderTarget(id) => vec![v(id)?],
            Command::DeleteFrameTarget(id) => vec![v(id)?],
            Command::DeleteBlob(id) => vec![v(id)?],
            Command::State(update) => vec![v(update)?],
            Command::Clear(p) => vec![v(p)?],
            Command::Draw(p) => vec![v(p)?],
            Command::Blit(p) => vec![v(p)?],
            Command::Copy(p) => vec![v(p)?],
            Command::ReadPixels(p) => vec![v(p)?],
            Command::BeginTimer | Command::EndTimer | Command::Flush | Command::CheckStatus => {
                Vec::new()
            }
        })
    }

    /// The `[name, ...args]` wire form.
    pub fn to_json(&self) -> Result<Value> {
        let args = self
            .args()
            .map_err(|e| Error::format(format!("cannot encode {}", self.name()), e))?;
        let mut out = Vec::with_capacity(args.len() + 1);
        out.push(Value::String(self.name().to_owned()));
        out.extend(args);
        Ok(Value::Array(out))
    }

    /// Parses one log entry. Unknown names and malformed arguments are
    /// `Format` errors carrying the offending value.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Some((head, rest)) = value.as_array().and_then(|a| a.split_first()) else {
            return Err(Error::format("command must be a non-empty array", value));
        };
        let name = head
            .as_str()
            .ok_or_else(|| Error::format("command name must be a string", head))?;

        let args = |op: &'static str, n: usize| Args { op, values: rest }.at_most(n);
        let command = match name {
            "createProgram" => {
                let a = args("createProgram", 2)?;
                Command::CreateProgram(a.get(0)?, a.get(1)?)
            }
            "deleteProgram" => Command::DeleteProgram(args("deleteProgram", 1)?.get(0)?),
            "createBuffer" => {
                let a = args("createBuffer", 2)?;
                Command::CreateBuffer(a.get(0)?, a.get(1)?)
            }
            "writeBuffer" => {
                let a = args("writeBuffer", 2)?;
                Command::WriteBuffer(a.get(0)?, a.get(1)?)
            }
            "deleteBuffer" => Command::DeleteBuffer(args("deleteBuffer", 1)?.get(0)?),
            "createVertexArray" => {
                let a = args("createVertexArray", 2)?;
                Command::CreateVertexArray(a.get(0)?, a.get(1)?)
            }
            "deleteVertexArray" => {
                Command::DeleteVertexArray(args("deleteVertexArray", 1)?.get(0)?)
            }
            "createSampler" => {
                let a = args("createSampler", 2)?;
                Command::CreateSampler(a.get(0)?, a.get(1)?)
            }
            "deleteSampler" => Command::DeleteSampler(args("deleteSampler", 1)?.get(0)?),
            "createTexture" => {
                let a = args("createTexture", 2)?;
                Command::CreateTexture(a.get(0)?, a.get(1)?)
            }
            "writeTexture" => {
                let a = args("writeTexture", 2)?;
                Command::WriteTexture(a.get(0)?, a.get(1)?)
            }
            "deleteTexture" => Command::DeleteTexture(args("deleteTexture", 1)?.get(0)?),
            "createRenderTarget" => {
                let a = args("createRenderTarget", 2)?;
                Command::CreateRenderTarget(a.get(0)?, a.get(1)?)
            }
            "deleteRenderTarget" => {
                Command::DeleteRenderTarget(args("deleteRenderTarget", 1)?.get(0)?)
            }
            "createFrameTarget" => {
                let a = args("createFrameTarget", 2)?;
                Command::CreateFrameTarget(a.get(0)?, a.get(1)?)
            }
            "deleteFrameTarget" => {
                Command::DeleteFrameTarget(args("deleteFrameTarget", 1)?.get(0)?)
            }
            "createBlob" => {
                let a = args("createBlob", 2)?;
                Command::CreateBlob(a.get(0)?, a.get(1)?)
            }
            "deleteBlob" => Command::DeleteBlob(args("deleteBlob", 1)?.get(0)?),
            "state" => Command::State(Box::new(args("state", 1)?.get(0)?)),
            "clear" => Command::Clear(args("clear", 1)?.get(0)?),
            "draw" => Command::Draw(args("draw", 1)?.get(0)?),
            "blit" => Command::Blit(args("blit", 1)?.get(0)?),
            "copy" => Command::Copy(args("copy", 1)?.get(0)?),
            "readPixels" => Command::ReadPixels(args("readPixels", 1)?.get(0)?),
            "beginTimer" => {
                args("beginTimer", 0)?;
                Command::BeginTimer
            }
            "endTimer" => {
                args("endTimer", 0)?;
                Command::EndTimer
            }
            "flush" => {
                args("flush", 0)?;
                Command::Flush
            }
            "checkStatus" => {
                args("checkStatus", 0)?;
                Command::CheckStatus
            }
            _ => return Err(Error::format("unknown command", head)),
        };
        Ok(command)
    }

    /// Every binary payload the command carries.
    pub fn payloads_mut(&mut self) -> Vec<&mut BinarySource> {
        match self {
            Command::CreateBuffer(_, p) => p.data.iter_mut().collect(),
            Command::WriteBuffer(_, p) => vec![&mut p.data],
            Command::CreateTexture(_, p) => p.data.iter_mut().collect(),
            Command::WriteTexture(_, p) => vec![&mut p.data],
            Command::CreateBlob(_, p) => vec![&mut p.data],
            _ => Vec::new(),
        }
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Command::from_json(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::Topology;
    use serde_json::json;

    #[test]
    fn wire_form_is_name_then_args() {
        let c = Command::CreateBuffer(
            BufferId(2),
            BufferParams::with_data(BinarySource::floats(&[0.0, 1.0])),
        );
        assert_eq!(
            c.to_json().unwrap(),
            json!(["createBuffer", 2, {
                "data": {"type": "float32", "array": [0.0, 1.0]},
                "usage": "static"
            }])
        );
        assert_eq!(Command::Flush.to_json().unwrap(), json!(["flush"]));
    }

    #[test]
    fn parses_every_arity() {
        let draw = Command::from_json(&json!(["draw", {"topology": "triangle_strip", "count": 3}]))
            .unwrap();
        assert_eq!(
            draw,
            Command::Draw(DrawParams {
                topology: Some(Topology::TriangleStrip),
                count: Some(3),
                ..Default::default()
            })
        );
        assert_eq!(
            Command::from_json(&json!(["deleteTexture", 4])).unwrap(),
            Command::DeleteTexture(TextureId(4))
        );
        assert_eq!(
            Command::from_json(&json!(["checkStatus"])).unwrap(),
            Command::CheckStatus
        );
        assert_eq!(
            Command::from_json(&json!(["endTimer"])).unwrap(),
            Command::EndTimer
        );
        assert_eq!(Command::BeginTimer.to_json().unwrap(), json!(["beginTimer"]));
    }

    #[test]
    fn unknown_name_names_the_value() {
        let err = Command::from_json(&json!(["drawQuads", {}])).unwrap_err();
        assert!(
            matches!(&err, Error::Format { value, .. } if value.contains("drawQuads")),
            "{err}"
        );
    }

    #[test]
    fn arity_is_checked() {
        assert!(Command::from_json(&json!(["deleteBuffer"])).is_err());
        assert!(Command::from_json(&json!(["flush", 1])).is_err());
        assert!(Command::from_json(&json!(["beginTimer", {}])).is_err());
        assert!(Command::from_json(&json!([])).is_err());
        assert!(Command::from_json(&json!({"op": "flush"})).is_err());
    }

    #[test]
    fn payloads_cover_optional_data() {
        let mut c = Command::CreateBuffer(
            BufferId(0),
            BufferParams {
                size: Some(16),
                ..Default::default()
            },
        );
        assert!(c.payloads_mut().is_empty());
        let mut w = Command::WriteBuffer(
            BufferId(0),
            WriteBufferParams {
                offset: 4,
                data: BinarySource::raw(vec![1, 2]),
            },
        );
        assert_eq!(w.payloads_mut().len(), 1);
    }
}
