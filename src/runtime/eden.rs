//! Out-of-line allocator behind the fallback calls
//!
//! Allocates from a shared eden region outside any TLAB and returns fully
//! formatted, zeroed objects. Every call is recorded for inspection.

use super::memory::Memory;
use crate::alloc::{FallbackCall, FallbackDescriptor};
use crate::config::LoweringConfig;
use crate::errors::ExecError;
use crate::layout::LayoutHelper;
use crate::snippet::Width;
use parking_lot::Mutex;
use std::sync::Arc;

/// The runtime side of [`FallbackDescriptor`] calls
pub trait SlowPathRuntime {
    fn call(&mut self, memory: &mut Memory, call: &FallbackCall) -> Result<u64, ExecError>;
}

/// Shared record of fallback calls
pub type CallLog = Arc<Mutex<Vec<FallbackCall>>>;

pub struct EdenRuntime {
    config: Arc<LoweringConfig>,
    top: u64,
    end: u64,
    calls: CallLog,
}

impl EdenRuntime {
    /// Allocate from the mapped range `[base, base + size)`
    pub fn new(config: Arc<LoweringConfig>, base: u64, size: u64) -> Self {
        Self {
            config,
            top: base,
            end: base + size,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<FallbackCall> {
        self.calls.lock().clone()
    }

    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    pub fn top(&self) -> u64 {
        self.top
    }

    fn allocate(&mut self, memory: &mut Memory, size: u64) -> Result<u64, ExecError> {
        let align = u64::from(self.config.layout.word_size);
        let size = (size + align - 1) & !(align - 1);
        let new_top = self.top.checked_add(size).ok_or(ExecError::OutOfMemory { requested: size })?;
        if new_top > self.end {
            return Err(ExecError::OutOfMemory { requested: size });
        }
        let object = self.top;
        self.top = new_top;
        memory.fill(object, size as usize, 0)?;
        Ok(object)
    }

    fn klass_field(&self, memory: &Memory, klass: u64, offset: i64, width: Width) -> Result<i64, ExecError> {
        memory.read(klass.wrapping_add(offset as u64), width)
    }

    fn write_header(&self, memory: &mut Memory, object: u64, hub: u64) -> Result<(), ExecError> {
        let layout = &self.config.layout;
        let mark = memory.read_word(hub + self.config.klass.prototype_mark_word_offset as u64)?;
        memory.write_word(object + layout.mark_offset as u64, mark)?;
        if layout.compressed_class_pointers {
            let narrow = hub.wrapping_sub(layout.narrow_klass_base) >> layout.narrow_klass_shift;
            memory.write(object + layout.hub_offset as u64, Width::W32, narrow as i64)
        } else {
            memory.write_word(object + layout.hub_offset as u64, hub)
        }
    }

    fn new_instance(&mut self, memory: &mut Memory, hub: u64) -> Result<u64, ExecError> {
        let raw = self.klass_field(memory, hub, self.config.klass.layout_helper_offset, Width::W32)?;
        let layout_helper = LayoutHelper::from_raw(raw as i32);
        if !layout_helper.is_instance() {
            return Err(ExecError::Exception(format!("InstantiationException: klass {:#x}", hub)));
        }
        let size = u64::from((layout_helper.raw() & !1) as u32);
        let object = self.allocate(memory, size)?;
        self.write_header(memory, object, hub)?;
        Ok(object)
    }

    fn new_array(&mut self, memory: &mut Memory, hub: u64, length: i64) -> Result<u64, ExecError> {
        if length < 0 {
            return Err(ExecError::Exception(format!("NegativeArraySizeException: {}", length)));
        }
        let raw = self.klass_field(memory, hub, self.config.klass.layout_helper_offset, Width::W32)?;
        let layout_helper = LayoutHelper::from_raw(raw as i32);
        if !layout_helper.is_array() {
            return Err(ExecError::Exception(format!("klass {:#x} is not an array klass", hub)));
        }
        let decoded = layout_helper.decode(&self.config.layout);
        let size = (length as u64)
            .checked_mul(1u64 << decoded.log2_element_size)
            .and_then(|body| body.checked_add(u64::from(decoded.header_size)))
            .ok_or(ExecError::OutOfMemory { requested: u64::MAX })?;
        let object = self.allocate(memory, size)?;
        memory.write(object + self.config.layout.array_length_offset() as u64, Width::W32, length)?;
        self.write_header(memory, object, hub)?;
        Ok(object)
    }

    fn new_multi_array(&mut self, memory: &mut Memory, hub: u64, dims: &[i64]) -> Result<u64, ExecError> {
        let (&length, rest) = dims
            .split_first()
            .ok_or_else(|| ExecError::Exception("multi array without dimensions".to_string()))?;
        let array = self.new_array(memory, hub, length)?;
        if rest.is_empty() {
            return Ok(array);
        }

        let component = memory.read_word(hub + self.config.klass.component_klass_offset as u64)?;
        if component == 0 {
            return Err(ExecError::Exception(format!("klass {:#x} has no component klass", hub)));
        }
        let layout_helper = LayoutHelper::from_raw(self.klass_field(memory, hub, self.config.klass.layout_helper_offset, Width::W32)? as i32);
        let decoded = layout_helper.decode(&self.config.layout);
        let element_size = 1u64 << decoded.log2_element_size;
        for i in 0..length as u64 {
            let element = self.new_multi_array(memory, component, rest)?;
            let slot = array + u64::from(decoded.header_size) + i * element_size;
            let width = if element_size == 4 { Width::W32 } else { Width::W64 };
            memory.write(slot, width, element as i64)?;
        }
        Ok(array)
    }

    fn mirror_field(&self, memory: &Memory, mirror: u64, offset: i64) -> Result<u64, ExecError> {
        if mirror == 0 {
            return Err(ExecError::Exception("NullPointerException".to_string()));
        }
        memory.read_word(mirror + offset as u64)
    }

    fn dispatch(&mut self, memory: &mut Memory, call: &FallbackCall) -> Result<u64, ExecError> {
        let arg = |index: usize| {
            call.arg(index).ok_or(ExecError::BadFallbackCall {
                descriptor: call.descriptor,
                found: call.args.len(),
            })
        };
        if call.args.len() != call.descriptor.arity() {
            return Err(ExecError::BadFallbackCall {
                descriptor: call.descriptor,
                found: call.args.len(),
            });
        }

        match call.descriptor {
            FallbackDescriptor::NewInstance => self.new_instance(memory, arg(0)? as u64),
            FallbackDescriptor::NewArray => self.new_array(memory, arg(0)? as u64, arg(1)?),
            FallbackDescriptor::NewMultiArray => {
                let rank = arg(1)?;
                let dims_base = arg(2)? as u64;
                let dims = (0..rank.max(0) as u64)
                    .map(|i| memory.read(dims_base + i * 4, Width::W32))
                    .collect::<Result<Vec<_>, _>>()?;
                self.new_multi_array(memory, arg(0)? as u64, &dims)
            }
            FallbackDescriptor::DynamicNewInstance => {
                let hub = self.mirror_field(memory, arg(0)? as u64, self.config.klass.mirror_klass_offset)?;
                if hub == 0 {
                    return Err(ExecError::Exception("InstantiationException: primitive type".to_string()));
                }
                let flags = self.klass_field(memory, hub, self.config.klass.access_flags_offset, Width::W32)?;
                if flags & (self.config.klass.acc_abstract | self.config.klass.acc_interface) != 0 {
                    return Err(ExecError::Exception(format!("InstantiationException: klass {:#x}", hub)));
                }
                self.new_instance(memory, hub)
            }
            FallbackDescriptor::DynamicNewArray => {
                let klass = self.mirror_field(memory, arg(0)? as u64, self.config.klass.mirror_array_klass_offset)?;
                if klass == 0 {
                    return Err(ExecError::Exception("IllegalArgumentException: no array class".to_string()));
                }
                self.new_array(memory, klass, arg(1)?)
            }
        }
    }
}

impl SlowPathRuntime for EdenRuntime {
    fn call(&mut self, memory: &mut Memory, call: &FallbackCall) -> Result<u64, ExecError> {
        self.calls.lock().push(call.clone());
        let result = self.dispatch(memory, call);
        crate::logging::log_fallback_call(call, result.as_ref().ok().copied());
        result
    }
}
