//! Lowering configuration - an immutable snapshot of VM feature flags
//!
//! Resolved once per compilation and threaded explicitly into every
//! component. Nothing in the crate reads ambient global flags.

use crate::errors::ConfigError;
use crate::layout::ElementKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const CONFIG_FILE_NAMES: [&str; 2] = [".tlabgen.toml", "tlabgen.toml"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoweringConfig {
    /// Bump-allocate from the TLAB; when off every request takes the fallback
    #[serde(default = "default_true")]
    pub use_tlab: bool,

    /// Read the live prototype mark word from the klass instead of the
    /// compile-time one
    #[serde(default = "default_false")]
    pub use_biased_locking: bool,

    /// Snippet-level assertions: alignment checks and poison filling
    #[serde(default = "default_assertions")]
    pub assertions: bool,

    /// VM-level assertions, enables the heap verification probe
    #[serde(default = "default_false")]
    pub c_assertions: bool,

    /// Count which code shape each allocation took
    #[serde(default = "default_false")]
    pub snippet_counters: bool,

    #[serde(default)]
    pub profiling: ProfilingConfig,

    #[serde(default)]
    pub prefetch: PrefetchConfig,

    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub thread: ThreadConfig,

    #[serde(default)]
    pub klass: KlassConfig,
}

/// Granularity of allocation profiling counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileMode {
    /// One counter per allocating call site
    AllocatingMethods,
    /// "instance" vs "array"
    InstanceOrArray,
    /// One counter per allocated type
    AllocatedTypes,
    /// Per allocated type, split by call site
    AllocatedTypesInMethods,
    /// A single aggregate "bytes" counter
    Total,
}

impl Default for ProfileMode {
    fn default() -> Self {
        ProfileMode::AllocatedTypes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingConfig {
    #[serde(default = "default_false")]
    pub enabled: bool,

    #[serde(default)]
    pub mode: ProfileMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// Prefetch style, `<= 0` disables allocation prefetching
    #[serde(default)]
    pub style: i32,

    /// Lines prefetched after an array allocation
    #[serde(default = "default_prefetch_lines")]
    pub lines: u32,

    /// Lines prefetched after an instance allocation
    #[serde(default = "default_instance_prefetch_lines")]
    pub instance_lines: u32,

    #[serde(default = "default_prefetch_step")]
    pub step_size: i64,

    #[serde(default = "default_prefetch_distance")]
    pub distance: i64,
}

/// Object header and layout-word encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_word_size")]
    pub word_size: u32,

    #[serde(default)]
    pub mark_offset: i64,

    #[serde(default = "default_hub_offset")]
    pub hub_offset: i64,

    /// Store the type pointer as a 32-bit narrow klass
    #[serde(default = "default_false")]
    pub compressed_class_pointers: bool,

    #[serde(default)]
    pub narrow_klass_base: u64,

    #[serde(default)]
    pub narrow_klass_shift: u32,

    /// Reference array elements are 32-bit
    #[serde(default = "default_false")]
    pub compressed_oops: bool,

    #[serde(default = "default_lh_header_size_shift")]
    pub lh_header_size_shift: u32,

    #[serde(default = "default_byte_mask")]
    pub lh_header_size_mask: i32,

    #[serde(default)]
    pub lh_log2_element_size_shift: u32,

    #[serde(default = "default_lh_log2_mask")]
    pub lh_log2_element_size_mask: i32,

    #[serde(default = "default_lh_element_type_shift")]
    pub lh_element_type_shift: u32,

    #[serde(default = "default_byte_mask")]
    pub lh_element_type_mask: i32,

    #[serde(default = "default_lh_array_tag_shift")]
    pub lh_array_tag_shift: u32,
}

/// Offsets of the TLAB fields inside the thread block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadConfig {
    #[serde(default = "default_tlab_top_offset")]
    pub tlab_top_offset: i64,

    #[serde(default = "default_tlab_end_offset")]
    pub tlab_end_offset: i64,
}

/// Offsets into klass metadata and class mirrors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlassConfig {
    #[serde(default = "default_layout_helper_offset")]
    pub layout_helper_offset: i64,

    #[serde(default = "default_access_flags_offset")]
    pub access_flags_offset: i64,

    #[serde(default = "default_init_state_offset")]
    pub init_state_offset: i64,

    #[serde(default = "default_prototype_mark_word_offset")]
    pub prototype_mark_word_offset: i64,

    /// Element klass of a reference array klass
    #[serde(default = "default_component_klass_offset")]
    pub component_klass_offset: i64,

    /// Bytes reserved per klass in metaspace
    #[serde(default = "default_klass_size")]
    pub klass_size: u64,

    /// Hub pointer inside a class mirror
    #[serde(default = "default_mirror_klass_offset")]
    pub mirror_klass_offset: i64,

    /// Array klass pointer inside a class mirror
    #[serde(default = "default_mirror_array_klass_offset")]
    pub mirror_array_klass_offset: i64,

    #[serde(default = "default_fully_initialized")]
    pub fully_initialized: i64,

    #[serde(default = "default_acc_abstract")]
    pub acc_abstract: i64,

    #[serde(default = "default_acc_interface")]
    pub acc_interface: i64,

    /// Unlocked, unhashed mark word
    #[serde(default = "default_unlocked_mark")]
    pub unlocked_mark: u64,

    /// Anonymously biased mark word
    #[serde(default = "default_biased_mark")]
    pub biased_mark: u64,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            use_tlab: true,
            use_biased_locking: false,
            assertions: default_assertions(),
            c_assertions: false,
            snippet_counters: false,
            profiling: ProfilingConfig::default(),
            prefetch: PrefetchConfig::default(),
            layout: LayoutConfig::default(),
            thread: ThreadConfig::default(),
            klass: KlassConfig::default(),
        }
    }
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ProfileMode::default(),
        }
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            style: 0,
            lines: default_prefetch_lines(),
            instance_lines: default_instance_prefetch_lines(),
            step_size: default_prefetch_step(),
            distance: default_prefetch_distance(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            word_size: default_word_size(),
            mark_offset: 0,
            hub_offset: default_hub_offset(),
            compressed_class_pointers: false,
            narrow_klass_base: 0,
            narrow_klass_shift: 0,
            compressed_oops: false,
            lh_header_size_shift: default_lh_header_size_shift(),
            lh_header_size_mask: default_byte_mask(),
            lh_log2_element_size_shift: 0,
            lh_log2_element_size_mask: default_lh_log2_mask(),
            lh_element_type_shift: default_lh_element_type_shift(),
            lh_element_type_mask: default_byte_mask(),
            lh_array_tag_shift: default_lh_array_tag_shift(),
        }
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            tlab_top_offset: default_tlab_top_offset(),
            tlab_end_offset: default_tlab_end_offset(),
        }
    }
}

impl Default for KlassConfig {
    fn default() -> Self {
        Self {
            layout_helper_offset: default_layout_helper_offset(),
            access_flags_offset: default_access_flags_offset(),
            init_state_offset: default_init_state_offset(),
            prototype_mark_word_offset: default_prototype_mark_word_offset(),
            component_klass_offset: default_component_klass_offset(),
            klass_size: default_klass_size(),
            mirror_klass_offset: default_mirror_klass_offset(),
            mirror_array_klass_offset: default_mirror_array_klass_offset(),
            fully_initialized: default_fully_initialized(),
            acc_abstract: default_acc_abstract(),
            acc_interface: default_acc_interface(),
            unlocked_mark: default_unlocked_mark(),
            biased_mark: default_biased_mark(),
        }
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_assertions() -> bool { cfg!(debug_assertions) }
fn default_prefetch_lines() -> u32 { 3 }
fn default_instance_prefetch_lines() -> u32 { 1 }
fn default_prefetch_step() -> i64 { 64 }
fn default_prefetch_distance() -> i64 { 192 }
fn default_word_size() -> u32 { 8 }
fn default_hub_offset() -> i64 { 8 }
fn default_lh_header_size_shift() -> u32 { 16 }
fn default_byte_mask() -> i32 { 0xFF }
fn default_lh_log2_mask() -> i32 { 0x1F }
fn default_lh_element_type_shift() -> u32 { 8 }
fn default_lh_array_tag_shift() -> u32 { 30 }
fn default_tlab_top_offset() -> i64 { 0x60 }
fn default_tlab_end_offset() -> i64 { 0x68 }
fn default_layout_helper_offset() -> i64 { 8 }
fn default_access_flags_offset() -> i64 { 12 }
fn default_init_state_offset() -> i64 { 16 }
fn default_prototype_mark_word_offset() -> i64 { 24 }
fn default_component_klass_offset() -> i64 { 32 }
fn default_klass_size() -> u64 { 64 }
fn default_mirror_klass_offset() -> i64 { 16 }
fn default_mirror_array_klass_offset() -> i64 { 24 }
fn default_fully_initialized() -> i64 { 4 }
fn default_acc_abstract() -> i64 { 0x0400 }
fn default_acc_interface() -> i64 { 0x0200 }
fn default_unlocked_mark() -> u64 { 0x1 }
fn default_biased_mark() -> u64 { 0x5 }

impl LayoutConfig {
    /// Bytes occupied by the type pointer
    pub fn hub_size(&self) -> i64 {
        if self.compressed_class_pointers { 4 } else { i64::from(self.word_size) }
    }

    /// The 32-bit array length follows the type pointer
    pub fn array_length_offset(&self) -> i64 {
        self.hub_offset + self.hub_size()
    }

    /// First byte of instance fields
    pub fn instance_header_size(&self) -> i64 {
        self.hub_offset + self.hub_size()
    }

    /// First element of an array, aligned to the element size
    pub fn array_base_offset(&self, kind: ElementKind) -> i64 {
        let unaligned = self.array_length_offset() + 4;
        let align = i64::from(kind.size_in_bytes(self).max(4));
        (unaligned + align - 1) & !(align - 1)
    }

    /// Size of a reference array element
    pub fn heap_oop_size(&self) -> u32 {
        if self.compressed_oops { 4 } else { self.word_size }
    }
}

impl LoweringConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::parse(&content)?;
        crate::logging::log_config_loaded(path);
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Find a configuration file in the current directory or its parents
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            for name in CONFIG_FILE_NAMES {
                let path = dir.join(name);
                if path.exists() {
                    match Self::load(&path) {
                        Ok(config) => return config,
                        Err(err) => {
                            tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable config");
                        }
                    }
                }
            }

            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Reject layouts the lowering cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let layout = &self.layout;
        if layout.word_size != 4 && layout.word_size != 8 {
            return Err(ConfigError::Invalid(format!(
                "word_size must be 4 or 8, got {}",
                layout.word_size
            )));
        }
        if layout.hub_offset < layout.mark_offset + i64::from(layout.word_size) {
            return Err(ConfigError::Invalid(
                "type pointer must follow the mark word".to_string(),
            ));
        }
        if self.thread.tlab_top_offset == self.thread.tlab_end_offset {
            return Err(ConfigError::Invalid(
                "tlab top and end cannot share an offset".to_string(),
            ));
        }
        if self.prefetch.style > 0 && self.prefetch.step_size <= 0 {
            return Err(ConfigError::Invalid(
                "prefetch step size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The mark word a newly allocated object starts with
    pub fn prototype_mark_word(&self) -> u64 {
        if self.use_biased_locking {
            self.klass.biased_mark
        } else {
            self.klass.unlocked_mark
        }
    }
}
