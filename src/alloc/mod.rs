//! Allocation lowering - turns allocation requests into snippets
//!
//! Design: one entry point per allocation shape. Every shape funnels into
//! one of two shared cores, [`Lowerer::emit_allocate_instance`] and
//! [`Lowerer::emit_allocate_array`]. Values known at compile time enter as
//! constant operands and fold away, so the fixed and dynamic shapes share
//! the same fast path.
//!
//! Outcomes of a lowered snippet:
//! - fast path: bump allocate, format header, fill body, return the address
//! - fallback: call the out-of-line allocator and return its result
//! - deoptimization: a precondition failed at run time

mod bump;
mod fallback;
mod fill;
mod header;
mod profile;
mod request;

#[cfg(test)]
mod tests;

pub use bump::{emit_prefetch, emit_try_allocate, BumpPointers, Exhausted, ThreadAllocationBuffer};
pub use fallback::{emit_fallback, FallbackCall, FallbackDescriptor};
pub use fill::{emit_fill, FillRequest, FillValue, MAX_UNROLLED_STORES, POISON};
pub use header::{emit_format_array, emit_format_object, word_width, ArrayFormat, ObjectFormat};
pub use profile::{AllocationProfiler, CounterProfiler, NoProfiling, ProfileSite, ALLOCATIONS, BYTES_ALLOCATED};
pub use request::{
    AllocationKind, AllocationRequest, DynamicNewArray, DynamicNewInstance, Input, NewArray, NewInstance,
    NewMultiArray, MAX_ARRAY_FAST_PATH_LENGTH,
};

use crate::config::LoweringConfig;
use crate::errors::{LoweringError, Result};
use crate::layout::{emit_array_layout, emit_instance_fast_path_check, ElementKind};
use crate::logging;
use crate::meta::TypeResolver;
use crate::snippet::{Cond, DeoptAction, DeoptReason, Location, Operand, Probability, Snippet, SnippetBuilder, Width};
use std::sync::Arc;

/// Label used for arrays whose type is only known at run time
const DYNAMIC_TYPE_CONTEXT: &str = "dynamic type";

/// Compiler services available while lowering one allocation
#[derive(Clone, Copy)]
pub struct LoweringTool<'a> {
    pub resolver: &'a dyn TypeResolver,
    /// Method containing the allocation
    pub method: &'a str,
}

impl<'a> LoweringTool<'a> {
    pub fn new(resolver: &'a dyn TypeResolver, method: &'a str) -> Self {
        Self { resolver, method }
    }
}

#[derive(Debug, Clone, Copy)]
struct InstanceShape<'a> {
    size: Operand,
    hub: Operand,
    prototype_mark: Operand,
    fill_contents: bool,
    constant_size: bool,
    type_context: &'a str,
}

#[derive(Debug, Clone, Copy)]
struct ArrayShape<'a> {
    hub: Operand,
    length: Operand,
    prototype_mark: Operand,
    header_size: Operand,
    log2_element_size: Operand,
    fill_contents: bool,
    may_unroll: bool,
    /// The length is already known to be non-negative
    skip_negative_check: bool,
    type_context: &'a str,
}

fn deoptimize(b: &mut SnippetBuilder) -> Result<()> {
    b.deoptimize(DeoptAction::None, DeoptReason::RuntimeConstraint);
    Ok(())
}

fn stub_counter(b: &mut SnippetBuilder, config: &LoweringConfig, group: &'static str) {
    if config.snippet_counters {
        b.counter(group, "stub", Operand::Imm(1), None);
    }
}

/// Lowers allocation requests against one configuration snapshot
pub struct Lowerer {
    config: Arc<LoweringConfig>,
    profiler: Box<dyn AllocationProfiler>,
}

impl Lowerer {
    pub fn new(config: impl Into<Arc<LoweringConfig>>) -> Self {
        let config = config.into();
        let profiler = profile::profiler_for(&config);
        Self { config, profiler }
    }

    /// Replace the profiler chosen from the configuration
    pub fn with_profiler(mut self, profiler: Box<dyn AllocationProfiler>) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn config(&self) -> &LoweringConfig {
        &self.config
    }

    /// Lower any request
    pub fn lower(&self, request: &AllocationRequest, tool: &LoweringTool<'_>) -> Result<Snippet> {
        let _perf = logging::perf::track("lower");
        match request {
            AllocationRequest::NewInstance(req) => self.lower_new_instance(req, tool),
            AllocationRequest::DynamicNewInstance(req) => self.lower_dynamic_new_instance(req, tool),
            AllocationRequest::NewArray(req) => self.lower_new_array(req, tool),
            AllocationRequest::DynamicNewArray(req) => self.lower_dynamic_new_array(req, tool),
            AllocationRequest::NewMultiArray(req) => self.lower_new_multi_array(req, tool),
            AllocationRequest::VerifyHeap => self.lower_verify_heap(),
        }
    }

    fn finish(&self, kind: AllocationKind, b: SnippetBuilder) -> Snippet {
        let snippet = b.finish();
        logging::log_lowering(kind, &snippet);
        snippet
    }

    /// Instance of a type known at compile time
    pub fn lower_new_instance(&self, req: &NewInstance, tool: &LoweringTool<'_>) -> Result<Snippet> {
        let mut b = SnippetBuilder::new("allocate_instance");

        let Some(ty) = tool.resolver.resolve(req.type_handle) else {
            emit_fallback(&mut b, FallbackDescriptor::NewInstance, &[Operand::Imm(req.type_handle.0 as i64)])?;
            return Ok(self.finish(AllocationKind::FixedInstance, b));
        };
        if ty.is_array() {
            return Err(LoweringError::NotAnInstance { name: ty.name });
        }

        let hub = Operand::Imm(ty.klass as i64);
        let layout = ty.layout_helper.decode(&self.config.layout);
        if layout.fast_path_eligible {
            let type_context = req.type_context.as_deref().unwrap_or(&ty.name);
            self.emit_allocate_instance(
                &mut b,
                tool,
                InstanceShape {
                    size: Operand::Imm(i64::from(layout.instance_size)),
                    hub,
                    prototype_mark: Operand::Imm(ty.prototype_mark_word as i64),
                    fill_contents: req.fill_contents,
                    constant_size: true,
                    type_context,
                },
            )?;
        } else {
            stub_counter(&mut b, &self.config, "NewInstance");
            emit_fallback(&mut b, FallbackDescriptor::NewInstance, &[hub])?;
        }
        Ok(self.finish(AllocationKind::FixedInstance, b))
    }

    /// Instance of a class given as a runtime mirror
    pub fn lower_dynamic_new_instance(&self, req: &DynamicNewInstance, tool: &LoweringTool<'_>) -> Result<Snippet> {
        let config = &*self.config;
        let mut b = SnippetBuilder::new("allocate_instance_dynamic");
        let class = b.input(&req.class);

        b.if_then(Cond::eq(class, Operand::Imm(0)), Probability::SLOW_PATH, deoptimize)?;
        let hub = b.load(class, config.klass.mirror_klass_offset, Width::W64, Location::ClassHub);
        // primitive mirrors have no hub
        b.if_then(Cond::eq(hub, Operand::Imm(0)), Probability::SLOW_PATH, deoptimize)?;

        let flags = b.load(hub, config.klass.access_flags_offset, Width::W32, Location::AccessFlags);
        let layout_helper = b.load(hub, config.klass.layout_helper_offset, Width::W32, Location::LayoutHelper);
        let uninstantiable = b.and(flags, Operand::Imm(config.klass.acc_abstract | config.klass.acc_interface));
        b.if_then(
            Cond::ne(uninstantiable, Operand::Imm(0)).or(Cond::lt(layout_helper, Operand::Imm(0))),
            Probability::SLOW_PATH,
            deoptimize,
        )?;

        // an uninitialized class goes to DYNAMIC_NEW_INSTANCE, which runs the initializer
        let init_state = b.load(hub, config.klass.init_state_offset, Width::W8, Location::KlassInitState);
        let eligible = emit_instance_fast_path_check(&mut b, layout_helper);
        b.if_then(
            Cond::eq(init_state, Operand::Imm(config.klass.fully_initialized)).and(eligible),
            Probability::FAST_PATH,
            |b| {
                let prototype_mark = b.load(
                    hub,
                    config.klass.prototype_mark_word_offset,
                    word_width(&config.layout),
                    Location::PrototypeMarkWord,
                );
                self.emit_allocate_instance(
                    b,
                    tool,
                    InstanceShape {
                        size: layout_helper,
                        hub,
                        prototype_mark,
                        fill_contents: req.fill_contents,
                        constant_size: false,
                        type_context: "",
                    },
                )
            },
        )?;

        emit_fallback(&mut b, FallbackDescriptor::DynamicNewInstance, &[class])?;
        Ok(self.finish(AllocationKind::DynamicInstance, b))
    }

    /// Array of a type known at compile time
    pub fn lower_new_array(&self, req: &NewArray, tool: &LoweringTool<'_>) -> Result<Snippet> {
        let mut b = SnippetBuilder::new("allocate_array");
        let length = b.input(&req.length);
        let fill = Operand::Imm(i64::from(req.fill_contents));

        let Some(ty) = tool.resolver.resolve(req.type_handle) else {
            let hub = Operand::Imm(req.type_handle.0 as i64);
            emit_fallback(&mut b, FallbackDescriptor::NewArray, &[hub, length, fill])?;
            return Ok(self.finish(AllocationKind::FixedArray, b));
        };
        if !ty.is_array() {
            return Err(LoweringError::NotAnArray { name: ty.name });
        }

        let layout = ty.layout_helper.decode(&self.config.layout);
        let type_context = req.type_context.as_deref().unwrap_or(&ty.name);
        self.emit_allocate_array(
            &mut b,
            tool,
            ArrayShape {
                hub: Operand::Imm(ty.klass as i64),
                length,
                prototype_mark: Operand::Imm(ty.prototype_mark_word as i64),
                header_size: Operand::Imm(i64::from(layout.header_size)),
                log2_element_size: Operand::Imm(i64::from(layout.log2_element_size)),
                fill_contents: req.fill_contents,
                may_unroll: length.is_const(),
                skip_negative_check: false,
                type_context,
            },
        )?;
        Ok(self.finish(AllocationKind::FixedArray, b))
    }

    /// Array whose element class is a runtime mirror
    pub fn lower_dynamic_new_array(&self, req: &DynamicNewArray, tool: &LoweringTool<'_>) -> Result<Snippet> {
        if req.known_element_kind == Some(ElementKind::Void) {
            return Err(LoweringError::VoidElementKind);
        }
        let config = &*self.config;
        let prototype = tool
            .resolver
            .array_class_of(ElementKind::Object)
            .ok_or(LoweringError::UnresolvedArrayClass(ElementKind::Object))?;
        let known_class = req.known_element_kind.map(|kind| tool.resolver.array_class_of(kind));

        let mut b = SnippetBuilder::new("allocate_array_dynamic");
        let element_class = b.input(&req.element_class);
        let length = b.input(&req.length);

        if known_class.is_none() {
            b.if_then(Cond::eq(element_class, Operand::Imm(0)), Probability::SLOW_PATH, deoptimize)?;
        }
        let klass = b.load(element_class, config.klass.mirror_array_klass_offset, Width::W64, Location::ClassArrayKlass);
        b.if_then(
            Cond::eq(klass, Operand::Imm(0)).or(Cond::lt(length, Operand::Imm(0))),
            Probability::NOT_FREQUENT,
            deoptimize,
        )?;

        let layout_helper = match known_class {
            Some(Some(array_class)) => Operand::Imm(i64::from(array_class.layout_helper.raw())),
            Some(None) => {
                emit_fallback(&mut b, FallbackDescriptor::DynamicNewArray, &[element_class, length])?;
                return Ok(self.finish(AllocationKind::DynamicArray, b));
            }
            None => b.load(klass, config.klass.layout_helper_offset, Width::W32, Location::LayoutHelper),
        };
        let decoded = emit_array_layout(&mut b, &config.layout, layout_helper);

        self.emit_allocate_array(
            &mut b,
            tool,
            ArrayShape {
                hub: klass,
                length,
                prototype_mark: Operand::Imm(prototype.prototype_mark_word as i64),
                header_size: decoded.header_size,
                log2_element_size: decoded.log2_element_size,
                fill_contents: req.fill_contents,
                may_unroll: false,
                skip_negative_check: true,
                type_context: DYNAMIC_TYPE_CONTEXT,
            },
        )?;
        Ok(self.finish(AllocationKind::DynamicArray, b))
    }

    /// Multi-dimensional arrays always go to the runtime; only the
    /// dimensions are marshalled
    pub fn lower_new_multi_array(&self, req: &NewMultiArray, tool: &LoweringTool<'_>) -> Result<Snippet> {
        if req.dimensions.is_empty() {
            return Err(LoweringError::InvalidRank);
        }
        let hub = match tool.resolver.resolve(req.type_handle) {
            Some(ty) if !ty.is_array() => return Err(LoweringError::NotAnArray { name: ty.name }),
            Some(ty) => ty.klass,
            None => req.type_handle.0,
        };

        let rank = req.dimensions.len();
        let mut b = SnippetBuilder::new("new_multi_array");
        let dims = b.stack_alloc(rank as u32 * 4);
        for (i, dimension) in req.dimensions.iter().enumerate() {
            let value = b.input(dimension);
            b.store(dims, Operand::Imm(i as i64 * 4), value, Width::W32, Location::Init);
        }
        emit_fallback(
            &mut b,
            FallbackDescriptor::NewMultiArray,
            &[Operand::Imm(hub as i64), Operand::Imm(rank as i64), dims],
        )?;
        Ok(self.finish(AllocationKind::MultiArray, b))
    }

    /// TLAB self-check; empty unless VM assertions are enabled
    pub fn lower_verify_heap(&self) -> Result<Snippet> {
        let config = &*self.config;
        let mut b = SnippetBuilder::new("verify_heap");
        if config.c_assertions {
            let top = b.load(Operand::Thread, config.thread.tlab_top_offset, Width::W64, Location::TlabTop);
            b.if_then(Cond::ne(top, Operand::Imm(0)), Probability::FAST_PATH, |b| {
                let mark = b.load(top, config.layout.mark_offset, word_width(&config.layout), Location::MarkWord);
                b.if_then(Cond::eq(mark, Operand::Imm(0)), Probability::SLOW_PATH, |b| {
                    b.vm_message("overzeroing of TLAB detected");
                    Ok(())
                })
            })?;
        }
        Ok(self.finish(AllocationKind::VerifyHeap, b))
    }

    fn emit_allocate_instance(&self, b: &mut SnippetBuilder, tool: &LoweringTool<'_>, shape: InstanceShape<'_>) -> Result<()> {
        let config = &*self.config;
        self.profiler.profile(
            b,
            &ProfileSite {
                path: "instance",
                size: shape.size,
                type_context: shape.type_context,
                method: tool.method,
            },
        );

        emit_try_allocate(
            b,
            config,
            shape.size,
            None,
            |b, bump| {
                emit_prefetch(b, &config.prefetch, bump.new_top, config.prefetch.instance_lines);
                emit_format_object(
                    b,
                    config,
                    &ObjectFormat {
                        object: bump.top,
                        hub: shape.hub,
                        size: shape.size,
                        prototype_mark: shape.prototype_mark,
                        fill_contents: shape.fill_contents,
                        constant_size: shape.constant_size,
                    },
                )?;
                b.ret(bump.top);
                Ok(())
            },
            |b| {
                stub_counter(b, config, "NewInstance");
                emit_fallback(b, FallbackDescriptor::NewInstance, &[shape.hub]).map(|_| ())
            },
        )
    }

    fn emit_allocate_array(&self, b: &mut SnippetBuilder, tool: &LoweringTool<'_>, shape: ArrayShape<'_>) -> Result<()> {
        let config = &*self.config;
        let align = i64::from(config.layout.word_size);

        let body = b.shl(shape.length, shape.log2_element_size);
        let unaligned = b.add(body, shape.header_size);
        let rounded = b.add(unaligned, Operand::Imm(align - 1));
        let size = b.and(rounded, Operand::Imm(!(align - 1)));

        self.profiler.profile(
            b,
            &ProfileSite {
                path: "array",
                size,
                type_context: shape.type_context,
                method: tool.method,
            },
        );

        let precondition = if shape.skip_negative_check {
            None
        } else {
            Some(Cond::below(shape.length, Operand::Imm(MAX_ARRAY_FAST_PATH_LENGTH)))
        };
        emit_try_allocate(
            b,
            config,
            size,
            precondition,
            |b, bump| {
                emit_prefetch(b, &config.prefetch, bump.new_top, config.prefetch.lines);
                emit_format_array(
                    b,
                    config,
                    &ArrayFormat {
                        object: bump.top,
                        hub: shape.hub,
                        length: shape.length,
                        size,
                        header_size: shape.header_size,
                        prototype_mark: shape.prototype_mark,
                        fill_contents: shape.fill_contents,
                        may_unroll: shape.may_unroll,
                    },
                )?;
                b.ret(bump.top);
                Ok(())
            },
            |b| {
                stub_counter(b, config, "NewArray");
                let fill = Operand::Imm(i64::from(shape.fill_contents));
                emit_fallback(b, FallbackDescriptor::NewArray, &[shape.hub, shape.length, fill]).map(|_| ())
            },
        )
    }
}
