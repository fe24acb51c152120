//! Element kinds of arrays and their storage sizes

use crate::config::LayoutConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    Object,
    Void,
}

impl ElementKind {
    /// Every kind an array can hold
    pub const ARRAYABLE: [ElementKind; 9] = [
        ElementKind::Boolean,
        ElementKind::Byte,
        ElementKind::Char,
        ElementKind::Short,
        ElementKind::Int,
        ElementKind::Float,
        ElementKind::Long,
        ElementKind::Double,
        ElementKind::Object,
    ];

    /// VM basic type code stored in the layout word
    pub const fn basic_type(self) -> u8 {
        match self {
            ElementKind::Boolean => 4,
            ElementKind::Char => 5,
            ElementKind::Float => 6,
            ElementKind::Double => 7,
            ElementKind::Byte => 8,
            ElementKind::Short => 9,
            ElementKind::Int => 10,
            ElementKind::Long => 11,
            ElementKind::Object => 12,
            ElementKind::Void => 14,
        }
    }

    pub fn from_basic_type(code: u8) -> Option<Self> {
        match code {
            4 => Some(ElementKind::Boolean),
            5 => Some(ElementKind::Char),
            6 => Some(ElementKind::Float),
            7 => Some(ElementKind::Double),
            8 => Some(ElementKind::Byte),
            9 => Some(ElementKind::Short),
            10 => Some(ElementKind::Int),
            11 => Some(ElementKind::Long),
            12 | 13 => Some(ElementKind::Object),
            14 => Some(ElementKind::Void),
            _ => None,
        }
    }

    pub fn size_in_bytes(self, layout: &LayoutConfig) -> u32 {
        match self {
            ElementKind::Boolean | ElementKind::Byte => 1,
            ElementKind::Char | ElementKind::Short => 2,
            ElementKind::Int | ElementKind::Float => 4,
            ElementKind::Long | ElementKind::Double => 8,
            ElementKind::Object => layout.heap_oop_size(),
            ElementKind::Void => 0,
        }
    }

    pub fn log2_size(self, layout: &LayoutConfig) -> u32 {
        self.size_in_bytes(layout).max(1).trailing_zeros()
    }

    pub const fn is_primitive(self) -> bool {
        !matches!(self, ElementKind::Object | ElementKind::Void)
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "boolean" | "z" => Some(ElementKind::Boolean),
            "byte" | "b" => Some(ElementKind::Byte),
            "char" | "c" => Some(ElementKind::Char),
            "short" | "s" => Some(ElementKind::Short),
            "int" | "i" => Some(ElementKind::Int),
            "float" | "f" => Some(ElementKind::Float),
            "long" | "j" => Some(ElementKind::Long),
            "double" | "d" => Some(ElementKind::Double),
            "object" | "l" => Some(ElementKind::Object),
            "void" | "v" => Some(ElementKind::Void),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ElementKind::Boolean => "boolean",
            ElementKind::Byte => "byte",
            ElementKind::Char => "char",
            ElementKind::Short => "short",
            ElementKind::Int => "int",
            ElementKind::Float => "float",
            ElementKind::Long => "long",
            ElementKind::Double => "double",
            ElementKind::Object => "Object",
            ElementKind::Void => "void",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
