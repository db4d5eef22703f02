// dtypes.rs — Element types, storage classes, schedules and lifetimes
//
// Closed enumerations for everything the graph tags with a string in its
// persisted form. Serialized names follow the document format (`int32`,
// `CPU_Heap`, `GPU_Device`, ...). Schedule nesting and storage accessibility
// are answered by lookup tables here rather than by string comparison at the
// use sites.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Element types ───────────────────────────────────────────────────────────

/// Primitive element type of a data container or symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
}

impl ElementType {
    /// C/C++ spelling of the type.
    pub fn c_type(self) -> &'static str {
        match self {
            ElementType::Bool => "bool",
            ElementType::Int8 => "int8_t",
            ElementType::Int16 => "int16_t",
            ElementType::Int32 => "int",
            ElementType::Int64 => "int64_t",
            ElementType::Uint8 => "uint8_t",
            ElementType::Uint16 => "uint16_t",
            ElementType::Uint32 => "uint32_t",
            ElementType::Uint64 => "uint64_t",
            ElementType::Float32 => "float",
            ElementType::Float64 => "double",
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            ElementType::Bool | ElementType::Int8 | ElementType::Uint8 => 1,
            ElementType::Int16 | ElementType::Uint16 => 2,
            ElementType::Int32 | ElementType::Uint32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::Uint64 | ElementType::Float64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(
            self,
            ElementType::Bool | ElementType::Float32 | ElementType::Float64
        )
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Bool => "bool",
            ElementType::Int8 => "int8",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::Uint8 => "uint8",
            ElementType::Uint16 => "uint16",
            ElementType::Uint32 => "uint32",
            ElementType::Uint64 => "uint64",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
        };
        write!(f, "{name}")
    }
}

// ── Storage ─────────────────────────────────────────────────────────────────

/// Where a container's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StorageType {
    #[default]
    Default,
    Register,
    #[serde(rename = "CPU_Heap")]
    CpuHeap,
    #[serde(rename = "CPU_Pinned")]
    CpuPinned,
    #[serde(rename = "GPU_Global")]
    GpuGlobal,
    #[serde(rename = "GPU_Shared")]
    GpuShared,
}

impl StorageType {
    /// Memory reachable only from host code.
    pub fn is_host_only(self) -> bool {
        matches!(self, StorageType::CpuHeap)
    }

    pub fn is_device(self) -> bool {
        matches!(self, StorageType::GpuGlobal | StorageType::GpuShared)
    }

    /// Which side of the host/device boundary the memory sits on. `Default`
    /// and `Register` follow their context and have no side of their own.
    pub fn side(self) -> Option<MemorySide> {
        match self {
            StorageType::CpuHeap | StorageType::CpuPinned => Some(MemorySide::Host),
            StorageType::GpuGlobal | StorageType::GpuShared => Some(MemorySide::Device),
            StorageType::Default | StorageType::Register => None,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageType::Default => "Default",
            StorageType::Register => "Register",
            StorageType::CpuHeap => "CPU_Heap",
            StorageType::CpuPinned => "CPU_Pinned",
            StorageType::GpuGlobal => "GPU_Global",
            StorageType::GpuShared => "GPU_Shared",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySide {
    Host,
    Device,
}

impl fmt::Display for MemorySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySide::Host => write!(f, "host"),
            MemorySide::Device => write!(f, "device"),
        }
    }
}

/// When a transient container is allocated and freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AllocationLifetime {
    /// Innermost scope in which the container is used.
    #[default]
    Scope,
    State,
    #[serde(rename = "SDFG")]
    Sdfg,
    Global,
    Persistent,
    /// Allocated by the caller; never allocated by generated code.
    External,
}

impl fmt::Display for AllocationLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AllocationLifetime::Scope => "Scope",
            AllocationLifetime::State => "State",
            AllocationLifetime::Sdfg => "SDFG",
            AllocationLifetime::Global => "Global",
            AllocationLifetime::Persistent => "Persistent",
            AllocationLifetime::External => "External",
        };
        write!(f, "{name}")
    }
}

// ── Schedules ───────────────────────────────────────────────────────────────

/// Execution schedule of a map scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScheduleType {
    /// Chosen from the enclosing context; see [`ScheduleType::resolve`].
    #[default]
    Default,
    Sequential,
    #[serde(rename = "CPU_Multicore")]
    CpuMulticore,
    /// One grid launch per map.
    #[serde(rename = "GPU_Device")]
    GpuDevice,
    /// Work of one grid element, split among its threads.
    #[serde(rename = "GPU_ThreadBlock")]
    GpuThreadBlock,
}

impl ScheduleType {
    pub const ALL: [ScheduleType; 5] = [
        ScheduleType::Default,
        ScheduleType::Sequential,
        ScheduleType::CpuMulticore,
        ScheduleType::GpuDevice,
        ScheduleType::GpuThreadBlock,
    ];

    pub fn is_device(self) -> bool {
        matches!(self, ScheduleType::GpuDevice | ScheduleType::GpuThreadBlock)
    }

    /// Concrete schedule for `Default` given the context schedule (`None`
    /// at the top level of a state). Other schedules are returned unchanged.
    pub fn resolve(self, context: Option<ScheduleType>) -> ScheduleType {
        if self != ScheduleType::Default {
            return self;
        }
        match context {
            None => ScheduleType::CpuMulticore,
            Some(ScheduleType::GpuDevice) => ScheduleType::GpuThreadBlock,
            Some(_) => ScheduleType::Sequential,
        }
    }

    /// Whether a scope with schedule `self` may appear in `context`, the
    /// nearest enclosing non-sequential schedule (`None` at the top level).
    pub fn nests_in(self, context: Option<ScheduleType>) -> bool {
        use ScheduleType::*;
        match (context, self.resolve(context)) {
            (_, Sequential) => true,
            (None, CpuMulticore | GpuDevice) => true,
            (None, GpuThreadBlock) => false,
            (Some(CpuMulticore), CpuMulticore) => true,
            (Some(CpuMulticore), GpuDevice | GpuThreadBlock) => false,
            (Some(GpuDevice), GpuThreadBlock) => true,
            (Some(GpuDevice), GpuDevice | CpuMulticore) => false,
            (Some(GpuThreadBlock), _) => false,
            // Contexts are resolved and never `Default` or `Sequential`;
            // a resolved schedule is never `Default`.
            (Some(Default | Sequential), _) | (_, Default) => true,
        }
    }

    /// Whether code running under this (resolved) schedule can dereference
    /// memory of the given storage class. Sequential scopes run wherever
    /// their context runs, so callers pass the effective schedule.
    pub fn can_access(self, storage: StorageType) -> bool {
        match storage.side() {
            None => true,
            Some(MemorySide::Host) => {
                !self.is_device() || storage == StorageType::CpuPinned
            }
            Some(MemorySide::Device) => self.is_device(),
        }
    }

    /// Whether memory of the given storage class may be allocated inside a
    /// scope of this schedule.
    pub fn can_allocate(self, storage: StorageType) -> bool {
        if self.is_device() {
            matches!(
                storage,
                StorageType::Default | StorageType::Register | StorageType::GpuShared
            )
        } else {
            storage != StorageType::GpuShared
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleType::Default => "Default",
            ScheduleType::Sequential => "Sequential",
            ScheduleType::CpuMulticore => "CPU_Multicore",
            ScheduleType::GpuDevice => "GPU_Device",
            ScheduleType::GpuThreadBlock => "GPU_ThreadBlock",
        };
        write!(f, "{name}")
    }
}

/// Language of a tasklet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    Python,
    #[serde(rename = "CPP")]
    Cpp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScheduleType::*;

    #[test]
    fn serialized_names() {
        assert_eq!(serde_json::to_string(&GpuThreadBlock).unwrap(), "\"GPU_ThreadBlock\"");
        assert_eq!(serde_json::to_string(&StorageType::CpuHeap).unwrap(), "\"CPU_Heap\"");
        assert_eq!(serde_json::to_string(&ElementType::Float64).unwrap(), "\"float64\"");
        assert_eq!(
            serde_json::from_str::<AllocationLifetime>("\"SDFG\"").unwrap(),
            AllocationLifetime::Sdfg
        );
        assert_eq!(serde_json::from_str::<Language>("\"CPP\"").unwrap(), Language::Cpp);
    }

    #[test]
    fn display_matches_serialized_names() {
        for s in ScheduleType::ALL {
            assert_eq!(serde_json::to_string(&s).unwrap(), format!("\"{s}\""));
        }
        assert_eq!(ElementType::Uint16.to_string(), "uint16");
    }

    #[test]
    fn subgroup_only_inside_device() {
        assert!(GpuThreadBlock.nests_in(Some(GpuDevice)));
        assert!(!GpuThreadBlock.nests_in(None));
        assert!(!GpuThreadBlock.nests_in(Some(CpuMulticore)));
    }

    #[test]
    fn device_never_inside_device_or_subgroup() {
        assert!(GpuDevice.nests_in(None));
        assert!(!GpuDevice.nests_in(Some(GpuDevice)));
        assert!(!GpuDevice.nests_in(Some(GpuThreadBlock)));
    }

    #[test]
    fn sequential_nests_anywhere() {
        for ctx in [None, Some(CpuMulticore), Some(GpuDevice), Some(GpuThreadBlock)] {
            assert!(Sequential.nests_in(ctx), "{ctx:?}");
            assert!(Default.nests_in(ctx), "{ctx:?}");
        }
    }

    #[test]
    fn default_resolution() {
        assert_eq!(Default.resolve(None), CpuMulticore);
        assert_eq!(Default.resolve(Some(GpuDevice)), GpuThreadBlock);
        assert_eq!(Default.resolve(Some(GpuThreadBlock)), Sequential);
        assert_eq!(GpuDevice.resolve(Some(GpuDevice)), GpuDevice);
    }

    #[test]
    fn storage_tables() {
        assert!(!GpuDevice.can_access(StorageType::CpuHeap));
        assert!(GpuDevice.can_access(StorageType::GpuGlobal));
        assert!(GpuThreadBlock.can_access(StorageType::CpuPinned));
        assert!(!CpuMulticore.can_access(StorageType::GpuShared));
        assert!(!GpuDevice.can_allocate(StorageType::GpuGlobal));
        assert!(GpuThreadBlock.can_allocate(StorageType::GpuShared));
        assert!(Sequential.can_allocate(StorageType::GpuGlobal));
    }
}
