//! Layout decoder - interprets the compact per-type layout word
//!
//! The layout word is a signed 32-bit value stored in every klass:
//!
//! * arrays: negative, four bytes `MSB:[tag, hsz, ebt, log2(esz)]:LSB`
//!   where tag is 0xC0 for primitive elements and 0x80 for references,
//!   hsz the header size in bytes, ebt the element basic type
//! * instances: positive, the word-aligned instance size in bytes, low
//!   bit set when instances must be allocated on the slow path
//! * zero: neutral, never eligible for the fast path
//!
//! Decoding exists twice: [`LayoutHelper::decode`] runs at compile time
//! when the word is known, [`emit_array_layout`] emits the same shifts
//! and masks into a snippet when it is only known at run time.

mod kind;

pub use kind::ElementKind;

use crate::config::LayoutConfig;
use crate::snippet::{Cond, Operand, SnippetBuilder};
use std::fmt;

/// Array tag stored in the top two bits of an array layout word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayTag {
    Objects = 0x2,
    Primitives = 0x3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutHelper(i32);

impl LayoutHelper {
    pub const NEUTRAL: LayoutHelper = LayoutHelper(0);

    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Layout word of an instance type of `size` bytes
    pub fn instance(size: u32, slow_path: bool) -> Self {
        debug_assert!(size & 1 == 0, "instance sizes are word aligned");
        Self((size as i32) | i32::from(slow_path))
    }

    /// Layout word of an array type
    pub fn array(
        layout: &LayoutConfig,
        tag: ArrayTag,
        header_size: u32,
        element: ElementKind,
        log2_element_size: u32,
    ) -> Self {
        let raw = ((tag as u32) << layout.lh_array_tag_shift)
            | ((header_size & layout.lh_header_size_mask as u32) << layout.lh_header_size_shift)
            | ((u32::from(element.basic_type()) & layout.lh_element_type_mask as u32)
                << layout.lh_element_type_shift)
            | ((log2_element_size & layout.lh_log2_element_size_mask as u32)
                << layout.lh_log2_element_size_shift);
        Self(raw as i32)
    }

    /// Layout word of `element[]` for this header layout
    pub fn array_of(layout: &LayoutConfig, element: ElementKind) -> Self {
        let tag = if element.is_primitive() { ArrayTag::Primitives } else { ArrayTag::Objects };
        Self::array(
            layout,
            tag,
            layout.array_base_offset(element) as u32,
            element,
            element.log2_size(layout),
        )
    }

    #[inline]
    pub const fn is_array(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn is_instance(self) -> bool {
        self.0 > 0
    }

    /// Element basic type of an array layout word
    pub fn element_kind(self, layout: &LayoutConfig) -> Option<ElementKind> {
        if !self.is_array() {
            return None;
        }
        let code = (self.0 >> layout.lh_element_type_shift) & layout.lh_element_type_mask;
        ElementKind::from_basic_type(code as u8)
    }

    /// Decode the word; pure, so decoding the same word twice is identical
    pub fn decode(self, layout: &LayoutConfig) -> LayoutDescriptor {
        if self.is_array() {
            LayoutDescriptor {
                header_size: ((self.0 >> layout.lh_header_size_shift) & layout.lh_header_size_mask) as u32,
                log2_element_size: ((self.0 >> layout.lh_log2_element_size_shift)
                    & layout.lh_log2_element_size_mask) as u32,
                is_array: true,
                fast_path_eligible: true,
                instance_size: 0,
            }
        } else if self.is_instance() {
            LayoutDescriptor {
                header_size: layout.instance_header_size() as u32,
                log2_element_size: 0,
                is_array: false,
                fast_path_eligible: self.0 & 1 == 0,
                instance_size: (self.0 & !1) as u32,
            }
        } else {
            LayoutDescriptor {
                header_size: 0,
                log2_element_size: 0,
                is_array: false,
                fast_path_eligible: false,
                instance_size: 0,
            }
        }
    }
}

impl fmt::Display for LayoutHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0 as u32)
    }
}

/// Decoded layout word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutDescriptor {
    /// Offset of the first element (arrays) or field (instances)
    pub header_size: u32,
    pub log2_element_size: u32,
    pub is_array: bool,
    pub fast_path_eligible: bool,
    /// Allocation size of an instance, zero for arrays
    pub instance_size: u32,
}

/// Header size and element size of an array, as snippet operands
#[derive(Debug, Clone, Copy)]
pub struct ArrayLayout {
    pub header_size: Operand,
    pub log2_element_size: Operand,
}

/// Emit the array layout decode; folds to constants for a known word
pub fn emit_array_layout(
    b: &mut SnippetBuilder,
    layout: &LayoutConfig,
    layout_helper: Operand,
) -> ArrayLayout {
    let shifted = b.sar(layout_helper, Operand::Imm(i64::from(layout.lh_header_size_shift)));
    let header_size = b.and(shifted, Operand::Imm(i64::from(layout.lh_header_size_mask)));

    let shifted = b.sar(layout_helper, Operand::Imm(i64::from(layout.lh_log2_element_size_shift)));
    let log2_element_size = b.and(shifted, Operand::Imm(i64::from(layout.lh_log2_element_size_mask)));

    ArrayLayout { header_size, log2_element_size }
}

/// Condition that holds when an instance layout word allows the fast path:
/// positive with the slow-path bit clear, as in [`LayoutHelper::decode`]
pub fn emit_instance_fast_path_check(b: &mut SnippetBuilder, layout_helper: Operand) -> Cond {
    let slow_bit = b.and(layout_helper, Operand::Imm(1));
    Cond::lt(Operand::Imm(0), layout_helper).and(Cond::eq(slow_bit, Operand::Imm(0)))
}
