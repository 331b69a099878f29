use std::collections::BTreeMap;

use bytes::Bytes;

use crate::binary::NoBlobs;
use crate::error::Result;
use crate::exec::{Executor, Outcome};
use crate::handle::{BlobId, ResourceKind};

use super::{Command, CommandLog};

/// Wraps an executor and logs every call that goes through it.
///
/// Payloads are logged in base64 form so the log replays without the
/// caller's buffers. Blob references are resolved against a mirror of the
/// blobs created through this recorder. A call is logged only if the wrapped
/// executor accepted it.
pub struct Recorder<E> {
    inner: E,
    log: CommandLog,
    blobs: BTreeMap<BlobId, Bytes>,
}

impl<E: Executor> Recorder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            log: CommandLog::new(),
            blobs: BTreeMap::new(),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    /// Hands back the log so far and starts a new one.
    pub fn take_log(&mut self) -> CommandLog {
        std::mem::take(&mut self.log)
    }

    pub fn into_parts(self) -> (E, CommandLog) {
        (self.inner, self.log)
    }

    fn encode(&self, command: &Command) -> Result<Command> {
        let mut entry = command.clone();
        for payload in entry.payloads_mut() {
            if !payload.is_base64() {
                *payload = payload.encode_base64(&self.blobs)?;
            }
        }
        Ok(entry)
    }
}

impl<E: Executor> Executor for Recorder<E> {
    fn apply(&mut self, command: Command) -> Result<Outcome> {
        let entry = self.encode(&command)?;
        let blob = match &entry {
            Command::CreateBlob(id, p) => {
                let bytes = p.data.resolve(&NoBlobs)?.into_bytes().into_owned();
                Some((*id, Bytes::from(bytes)))
            }
            _ => None,
        };

        let outcome = self.inner.apply(command)?;

        match (&entry, blob) {
            (_, Some((id, bytes))) => {
                self.blobs.insert(id, bytes);
            }
            (Command::DeleteBlob(id), None) => {
                self.blobs.remove(id);
            }
            _ => {}
        }
        log::trace!("recorded {} (#{})", entry.name(), self.log.len());
        self.log.push(entry);
        Ok(outcome)
    }

    fn next_handle(&mut self, kind: ResourceKind) -> Result<u32> {
        self.inner.next_handle(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::BinarySource;
    use crate::error::Error;
    use crate::exec::{BlobParams, BufferParams, ExecutorExt};
    use crate::handle::BufferId;

    /// Accepts everything except deleting buffer 99.
    #[derive(Default)]
    struct Sink {
        seen: Vec<Command>,
    }

    impl Executor for Sink {
        fn apply(&mut self, command: Command) -> Result<Outcome> {
            if command == Command::DeleteBuffer(BufferId(99)) {
                return Err(Error::InvalidHandle {
                    kind: ResourceKind::Buffer,
                    handle: 99,
                });
            }
            self.seen.push(command);
            Ok(Outcome::Done)
        }

        fn next_handle(&mut self, _kind: ResourceKind) -> Result<u32> {
            Ok(7)
        }
    }

    #[test]
    fn payloads_are_logged_as_base64_and_forwarded_untouched() {
        let mut rec = Recorder::new(Sink::default());
        let data = BinarySource::floats(&[1.0]);
        rec.apply(Command::CreateBuffer(
            BufferId(0),
            BufferParams::with_data(data.clone()),
        ))
        .unwrap();

        let Command::CreateBuffer(_, logged) = &rec.log().commands()[0] else {
            panic!("wrong command logged");
        };
        assert_eq!(
            logged.data,
            Some(BinarySource::Base64 {
                base64: "AACAPw==".into(),
                ty: Some(crate::binary::ElementType::Float32),
            })
        );
        let Command::CreateBuffer(_, forwarded) = &rec.inner().seen[0] else {
            panic!("wrong command forwarded");
        };
        assert_eq!(forwarded.data, Some(data));
    }

    #[test]
    fn blob_references_resolve_through_the_mirror() {
        let mut rec = Recorder::new(Sink::default());
        rec.apply(Command::CreateBlob(
            BlobId(0),
            BlobParams {
                data: BinarySource::raw(vec![1, 2, 3, 4]),
            },
        ))
        .unwrap();

        rec.apply(Command::CreateBuffer(
            BufferId(0),
            BufferParams::with_data(BinarySource::blob(BlobId(0))),
        ))
        .unwrap();
        let Command::CreateBuffer(_, logged) = &rec.log().commands()[1] else {
            panic!("wrong command logged");
        };
        assert_eq!(
            logged.data,
            Some(BinarySource::Base64 {
                base64: "AQIDBA==".into(),
                ty: None,
            })
        );

        rec.apply(Command::DeleteBlob(BlobId(0))).unwrap();
        let err = rec
            .apply(Command::CreateBuffer(
                BufferId(1),
                BufferParams::with_data(BinarySource::blob(BlobId(0))),
            ))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHandle { kind: ResourceKind::Blob, .. }));
    }

    #[test]
    fn failed_calls_are_not_logged() {
        let mut rec = Recorder::new(Sink::default());
        assert!(rec.apply(Command::DeleteBuffer(BufferId(99))).is_err());
        assert!(rec.log().is_empty());
        assert_eq!(rec.reserve_handle::<BufferId>().unwrap(), BufferId(7));
    }
}
