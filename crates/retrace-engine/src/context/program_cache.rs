use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::device::{Device, DeviceError, ProgramDesc};

/// Identity of a linked program: sources, flag set and declared interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    vertex: u64,
    fragment: u64,
    flags: Vec<String>,
    interface: u64,
}

impl ProgramKey {
    pub fn new(desc: &ProgramDesc<'_>) -> Self {
        let mut flags = desc.flags.to_vec();
        flags.sort();
        flags.dedup();
        Self {
            vertex: hash_of(desc.vertex),
            fragment: hash_of(desc.fragment),
            flags,
            interface: hash_of(&(desc.uniforms, desc.textures, desc.uniform_blocks)),
        }
    }
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut h = DefaultHasher::new();
    value.hash(&mut h);
    h.finish()
}

/// Linked programs shared between handles with identical sources and flags.
///
/// Owned by the context, so its lifetime ends with the context's. An entry
/// lives while any program handle refers to it; [`ProgramCache::evict_unused`]
/// destroys the rest.
pub struct ProgramCache<D: Device> {
    programs: HashMap<ProgramKey, Rc<D::Program>>,
    hits: u64,
}

impl<D: Device> Default for ProgramCache<D> {
    fn default() -> Self {
        Self {
            programs: HashMap::new(),
            hits: 0,
        }
    }
}

impl<D: Device> ProgramCache<D> {
    pub fn get_or_create(
        &mut self,
        device: &mut D,
        desc: &ProgramDesc<'_>,
    ) -> Result<Rc<D::Program>, DeviceError> {
        let key = ProgramKey::new(desc);
        if let Some(program) = self.programs.get(&key) {
            self.hits += 1;
            log::trace!("program cache hit ({} flags)", key.flags.len());
            return Ok(Rc::clone(program));
        }
        let program = Rc::new(device.create_program(desc)?);
        self.programs.insert(key, Rc::clone(&program));
        Ok(program)
    }

    /// Destroys every cached program no handle refers to any more.
    pub fn evict_unused(&mut self, device: &mut D) -> usize {
        let unused: Vec<ProgramKey> = self
            .programs
            .iter()
            .filter(|(_, p)| Rc::strong_count(p) == 1)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &unused {
            if let Some(program) = self.programs.remove(key).and_then(Rc::into_inner) {
                device.destroy_program(program);
            }
        }
        unused.len()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}
