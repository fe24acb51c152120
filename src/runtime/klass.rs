//! Simulated type metadata
//!
//! Klass structures live in a metaspace region and class mirrors in a
//! mirror region, both in simulated memory, so that emitted code can read
//! layout words, flags and init states exactly as it would on a real VM.
//! The table also answers compile-time queries as a [`TypeResolver`].

use super::memory::Memory;
use crate::config::LoweringConfig;
use crate::errors::ExecError;
use crate::layout::{ElementKind, LayoutHelper};
use crate::meta::{ResolvedType, TypeHandle, TypeResolver};
use crate::snippet::Width;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Bytes reserved per class mirror
pub const MIRROR_SIZE: u64 = 32;

/// An instance class to define
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceClass {
    pub name: String,
    /// Instance size in bytes, word aligned
    pub size: u32,
    /// Instances must be allocated by the runtime
    pub slow_path: bool,
    pub access_flags: i32,
    pub initialized: bool,
}

impl InstanceClass {
    pub fn new(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            size,
            slow_path: false,
            access_flags: 0,
            initialized: true,
        }
    }
}

/// Addresses of a defined class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KlassRef {
    pub handle: TypeHandle,
    pub klass: u64,
    pub mirror: u64,
}

#[derive(Debug, Clone)]
struct KlassEntry {
    resolved: ResolvedType,
    mirror: u64,
}

pub struct KlassTable {
    config: Arc<LoweringConfig>,
    klasses: BTreeMap<TypeHandle, KlassEntry>,
    array_classes: HashMap<ElementKind, TypeHandle>,
    primitive_mirrors: HashMap<ElementKind, u64>,
    next_klass: u64,
    klass_limit: u64,
    next_mirror: u64,
    mirror_limit: u64,
}

impl KlassTable {
    /// Allocate klasses and mirrors from two already mapped ranges
    pub fn new(config: Arc<LoweringConfig>, metaspace: (u64, u64), mirrors: (u64, u64)) -> Self {
        Self {
            config,
            klasses: BTreeMap::new(),
            array_classes: HashMap::new(),
            primitive_mirrors: HashMap::new(),
            next_klass: metaspace.0,
            klass_limit: metaspace.0 + metaspace.1,
            next_mirror: mirrors.0,
            mirror_limit: mirrors.0 + mirrors.1,
        }
    }

    fn reserve_klass(&mut self) -> Result<u64, ExecError> {
        let size = self.config.klass.klass_size;
        if self.next_klass + size > self.klass_limit {
            return Err(ExecError::OutOfMemory { requested: size });
        }
        let klass = self.next_klass;
        self.next_klass += size;
        Ok(klass)
    }

    fn reserve_mirror(&mut self) -> Result<u64, ExecError> {
        if self.next_mirror + MIRROR_SIZE > self.mirror_limit {
            return Err(ExecError::OutOfMemory { requested: MIRROR_SIZE });
        }
        let mirror = self.next_mirror;
        self.next_mirror += MIRROR_SIZE;
        Ok(mirror)
    }

    fn write_klass(
        &self,
        memory: &mut Memory,
        klass: u64,
        layout_helper: LayoutHelper,
        access_flags: i32,
        init_state: i64,
        prototype: u64,
    ) -> Result<(), ExecError> {
        let k = &self.config.klass;
        memory.write(klass + k.layout_helper_offset as u64, Width::W32, i64::from(layout_helper.raw()))?;
        memory.write(klass + k.access_flags_offset as u64, Width::W32, i64::from(access_flags))?;
        memory.write(klass + k.init_state_offset as u64, Width::W8, init_state)?;
        memory.write_word(klass + k.prototype_mark_word_offset as u64, prototype)
    }

    fn write_mirror(&self, memory: &mut Memory, mirror: u64, hub: u64, array_klass: u64) -> Result<(), ExecError> {
        memory.write_word(mirror + self.config.klass.mirror_klass_offset as u64, hub)?;
        memory.write_word(mirror + self.config.klass.mirror_array_klass_offset as u64, array_klass)
    }

    fn register(&mut self, klass: u64, mirror: u64, name: String, layout_helper: LayoutHelper) -> KlassRef {
        let handle = TypeHandle(klass);
        let resolved = ResolvedType {
            klass,
            name,
            layout_helper,
            prototype_mark_word: self.config.prototype_mark_word(),
        };
        self.klasses.insert(handle, KlassEntry { resolved, mirror });
        KlassRef { handle, klass, mirror }
    }

    pub fn define_instance(&mut self, memory: &mut Memory, class: &InstanceClass) -> Result<KlassRef, ExecError> {
        let header = self.config.layout.instance_header_size();
        if i64::from(class.size) < header {
            return Err(ExecError::Exception(format!(
                "instance size {} of {} is smaller than the {}-byte header",
                class.size, class.name, header
            )));
        }
        let klass = self.reserve_klass()?;
        let mirror = self.reserve_mirror()?;
        let layout_helper = LayoutHelper::instance(class.size, class.slow_path);
        let init_state = if class.initialized { self.config.klass.fully_initialized } else { 0 };
        self.write_klass(memory, klass, layout_helper, class.access_flags, init_state, self.config.prototype_mark_word())?;
        self.write_mirror(memory, mirror, klass, 0)?;
        tracing::debug!(class = %class.name, klass = format_args!("{:#x}", klass), "defined instance class");
        Ok(self.register(klass, mirror, class.name.clone(), layout_helper))
    }

    /// Define `kind[]`; `component` names the element class of a reference
    /// array and links the array class into its mirror
    pub fn define_array(
        &mut self,
        memory: &mut Memory,
        kind: ElementKind,
        component: Option<&KlassRef>,
    ) -> Result<KlassRef, ExecError> {
        if kind == ElementKind::Void {
            return Err(ExecError::Exception("arrays of void are not defined".to_string()));
        }
        let klass = self.reserve_klass()?;
        let mirror = self.reserve_mirror()?;
        let layout_helper = LayoutHelper::array_of(&self.config.layout, kind);
        self.write_klass(memory, klass, layout_helper, 0, self.config.klass.fully_initialized, self.config.prototype_mark_word())?;
        self.write_mirror(memory, mirror, klass, 0)?;

        let name = match component {
            Some(component) => {
                memory.write_word(klass + self.config.klass.component_klass_offset as u64, component.klass)?;
                memory.write_word(component.mirror + self.config.klass.mirror_array_klass_offset as u64, klass)?;
                let element = self.klasses.get(&component.handle).map_or("?", |e| e.resolved.name.as_str());
                format!("{}[]", element)
            }
            None => format!("{}[]", kind),
        };
        if component.is_none() {
            self.array_classes.entry(kind).or_insert(TypeHandle(klass));
            if let Some(&primitive) = self.primitive_mirrors.get(&kind) {
                memory.write_word(primitive + self.config.klass.mirror_array_klass_offset as u64, klass)?;
            }
        }
        tracing::debug!(class = %name, klass = format_args!("{:#x}", klass), "defined array class");
        Ok(self.register(klass, mirror, name, layout_helper))
    }

    /// Mirror of a primitive type, `void` included; it has no hub
    pub fn primitive_mirror(&mut self, memory: &mut Memory, kind: ElementKind) -> Result<u64, ExecError> {
        if let Some(&mirror) = self.primitive_mirrors.get(&kind) {
            return Ok(mirror);
        }
        let mirror = self.reserve_mirror()?;
        let array_klass = self.array_classes.get(&kind).map_or(0, |handle| handle.0);
        self.write_mirror(memory, mirror, 0, array_klass)?;
        self.primitive_mirrors.insert(kind, mirror);
        Ok(mirror)
    }

    pub fn get(&self, handle: TypeHandle) -> Option<KlassRef> {
        self.klasses.get(&handle).map(|entry| KlassRef {
            handle,
            klass: entry.resolved.klass,
            mirror: entry.mirror,
        })
    }

    pub fn find(&self, name: &str) -> Option<KlassRef> {
        self.klasses
            .iter()
            .find(|(_, entry)| entry.resolved.name == name)
            .and_then(|(handle, _)| self.get(*handle))
    }

    pub fn name_of(&self, klass: u64) -> Option<&str> {
        self.klasses.get(&TypeHandle(klass)).map(|entry| entry.resolved.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.klasses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.klasses.is_empty()
    }
}

impl TypeResolver for KlassTable {
    fn resolve(&self, handle: TypeHandle) -> Option<ResolvedType> {
        self.klasses.get(&handle).map(|entry| entry.resolved.clone())
    }

    fn array_class_of(&self, kind: ElementKind) -> Option<ResolvedType> {
        self.array_classes.get(&kind).and_then(|handle| self.resolve(*handle))
    }
}
