//! Object header formatting
//!
//! Store order is the publication protocol with a concurrent collector: a
//! non-null type pointer means the header is complete. The array length
//! is therefore written first and the type pointer last.

use super::fill::{emit_fill, FillRequest, FillValue};
use crate::config::{LayoutConfig, LoweringConfig};
use crate::errors::Result;
use crate::snippet::{Location, Operand, SnippetBuilder, Width};

/// Width of a full machine word
pub fn word_width(layout: &LayoutConfig) -> Width {
    if layout.word_size == 4 {
        Width::W32
    } else {
        Width::W64
    }
}

/// The mark word to install; read live from the klass under biased locking
pub fn emit_prototype_mark(
    b: &mut SnippetBuilder,
    config: &LoweringConfig,
    hub: Operand,
    compile_time: Operand,
) -> Operand {
    if config.use_biased_locking {
        b.load(
            hub,
            config.klass.prototype_mark_word_offset,
            word_width(&config.layout),
            Location::PrototypeMarkWord,
        )
    } else {
        compile_time
    }
}

/// Mark word, then type pointer
pub fn emit_object_header(b: &mut SnippetBuilder, layout: &LayoutConfig, object: Operand, mark: Operand, hub: Operand) {
    b.store(object, Operand::Imm(layout.mark_offset), mark, word_width(layout), Location::MarkWord);
    if layout.compressed_class_pointers {
        let relative = b.sub(hub, Operand::Imm(layout.narrow_klass_base as i64));
        let narrow = b.sar(relative, Operand::Imm(i64::from(layout.narrow_klass_shift)));
        b.store(object, Operand::Imm(layout.hub_offset), narrow, Width::W32, Location::HubWrite);
    } else {
        b.store(object, Operand::Imm(layout.hub_offset), hub, word_width(layout), Location::HubWrite);
    }
}

/// Zero the body, or poison it when contents are left to the caller
fn emit_body(
    b: &mut SnippetBuilder,
    config: &LoweringConfig,
    fill_contents: bool,
    request: FillRequest,
) -> Result<()> {
    if fill_contents {
        emit_fill(b, config, &request)
    } else if config.assertions {
        emit_fill(b, config, &FillRequest { value: FillValue::Poison, ..request })
    } else {
        Ok(())
    }
}

/// Header and body of a new instance
#[derive(Debug, Clone, Copy)]
pub struct ObjectFormat {
    pub object: Operand,
    pub hub: Operand,
    pub size: Operand,
    /// Compile-time prototype mark word
    pub prototype_mark: Operand,
    pub fill_contents: bool,
    pub constant_size: bool,
}

pub fn emit_format_object(b: &mut SnippetBuilder, config: &LoweringConfig, format: &ObjectFormat) -> Result<()> {
    let mark = emit_prototype_mark(b, config, format.hub, format.prototype_mark);
    emit_object_header(b, &config.layout, format.object, mark, format.hub);
    emit_body(
        b,
        config,
        format.fill_contents,
        FillRequest {
            base: format.object,
            size: format.size,
            start_offset: Operand::Imm(config.layout.instance_header_size()),
            value: FillValue::Zero,
            constant_size: format.constant_size,
            may_unroll: false,
            counter_group: "NewInstance",
        },
    )
}

/// Header and body of a new array
#[derive(Debug, Clone, Copy)]
pub struct ArrayFormat {
    pub object: Operand,
    pub hub: Operand,
    pub length: Operand,
    /// Aligned allocation size in bytes
    pub size: Operand,
    /// Offset of the first element
    pub header_size: Operand,
    pub prototype_mark: Operand,
    pub fill_contents: bool,
    pub may_unroll: bool,
}

pub fn emit_format_array(b: &mut SnippetBuilder, config: &LoweringConfig, format: &ArrayFormat) -> Result<()> {
    b.store(
        format.object,
        Operand::Imm(config.layout.array_length_offset()),
        format.length,
        Width::W32,
        Location::ArrayLength,
    );
    emit_object_header(b, &config.layout, format.object, format.prototype_mark, format.hub);
    emit_body(
        b,
        config,
        format.fill_contents,
        FillRequest {
            base: format.object,
            size: format.size,
            start_offset: format.header_size,
            value: FillValue::Zero,
            constant_size: false,
            may_unroll: format.may_unroll,
            counter_group: "NewArray",
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::Inst;

    fn format_array(config: &LoweringConfig) -> crate::snippet::Snippet {
        let mut b = SnippetBuilder::new("array");
        let object = b.param("object");
        emit_format_array(
            &mut b,
            config,
            &ArrayFormat {
                object,
                hub: Operand::Imm(0x4000_0100),
                length: Operand::Imm(3),
                size: Operand::Imm(32),
                header_size: Operand::Imm(config.layout.array_base_offset(crate::layout::ElementKind::Int)),
                prototype_mark: Operand::Imm(1),
                fill_contents: true,
                may_unroll: true,
            },
        )
        .unwrap();
        b.finish()
    }

    #[test]
    fn test_array_length_before_hub() {
        let snippet = format_array(&LoweringConfig::default());
        let length = snippet.first_store_to(Location::ArrayLength).unwrap();
        let mark = snippet.first_store_to(Location::MarkWord).unwrap();
        let hub = snippet.first_store_to(Location::HubWrite).unwrap();
        let first_init = snippet.first_store_to(Location::Init).unwrap();
        assert!(length < mark && mark < hub && hub < first_init);
    }

    #[test]
    fn test_compressed_hub_is_narrow() {
        let mut config = LoweringConfig::default();
        config.layout.compressed_class_pointers = true;
        config.layout.narrow_klass_base = 0x4000_0000;
        config.layout.narrow_klass_shift = 3;
        let snippet = format_array(&config);
        let hub_store = snippet
            .instructions()
            .into_iter()
            .find(|inst| matches!(inst, Inst::Store { location: Location::HubWrite, .. }))
            .cloned();
        assert_eq!(
            hub_store,
            Some(Inst::Store {
                base: Operand::Var(crate::snippet::Var(0)),
                offset: Operand::Imm(8),
                value: Operand::Imm(0x100 >> 3),
                width: Width::W32,
                location: Location::HubWrite,
            })
        );
    }

    #[test]
    fn test_biased_locking_reads_live_prototype() {
        let config = LoweringConfig { use_biased_locking: true, ..LoweringConfig::default() };
        let mut b = SnippetBuilder::new("instance");
        let object = b.param("object");
        let hub = b.param("hub");
        emit_format_object(
            &mut b,
            &config,
            &ObjectFormat {
                object,
                hub,
                size: Operand::Imm(16),
                prototype_mark: Operand::Imm(1),
                fill_contents: true,
                constant_size: true,
            },
        )
        .unwrap();
        let snippet = b.finish();
        assert!(matches!(
            snippet.body()[0],
            Inst::Load { location: Location::PrototypeMarkWord, offset: 24, .. }
        ));
    }

    #[test]
    fn test_no_fill_without_assertions_leaves_body() {
        let config = LoweringConfig { assertions: false, ..LoweringConfig::default() };
        let mut b = SnippetBuilder::new("instance");
        let object = b.param("object");
        emit_format_object(
            &mut b,
            &config,
            &ObjectFormat {
                object,
                hub: Operand::Imm(0x4000_0000),
                size: Operand::Imm(48),
                prototype_mark: Operand::Imm(1),
                fill_contents: false,
                constant_size: true,
            },
        )
        .unwrap();
        assert!(b.finish().first_store_to(Location::Init).is_none());
    }
}
