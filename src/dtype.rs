//! Element-type and device tags.
//!
//! `Dtype` is the closed set of element types the evaluator understands. The
//! enum is ordered so that type promotion is simply the larger ordinal:
//! float beats int, wider beats narrower, complex beats real of the same
//! width. `Device` follows the same rule (`Gpu` beats `Cpu`).

use crate::{ArrayError, Result};
use std::fmt;
use std::str::FromStr;

/// Capability flags describing what an element type (or an operator) can do.
///
/// The layout mirrors a requirement bitmap: an operator records which
/// capabilities it needs, a `Dtype` records which it provides, and dispatch
/// checks `needs & !provides == 0` before any kernel runs.
pub mod flags {
    pub const SCALAR_ARITHMETIC: u32 = 1 << 0;
    pub const SCALAR_BITWISE: u32 = 1 << 1;
    pub const SCALAR_LOGICAL: u32 = 1 << 2;
    pub const PACKET_ARITHMETIC: u32 = 1 << 3;
    pub const PACKET_BITWISE: u32 = 1 << 4;
    pub const PACKET_LOGICAL: u32 = 1 << 5;

    /// Every scalar-side capability.
    pub const SCALAR_ALL: u32 = SCALAR_ARITHMETIC | SCALAR_BITWISE | SCALAR_LOGICAL;
    /// Every packet-side capability.
    pub const PACKET_ALL: u32 = PACKET_ARITHMETIC | PACKET_BITWISE | PACKET_LOGICAL;
}

/// Element type of an array.
///
/// The two `None` variants exist so a default-constructed array has a type
/// tag without claiming to be computable; any operation that reaches the
/// evaluator with either of them fails with [`ArrayError::InvalidDtype`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dtype {
    None,
    ValidNone,
    Int32,
    Int64,
    Float32,
    Float64,
    CFloat32,
    CFloat64,
}

impl Dtype {
    /// Size of one element in bytes. The `None` family has no storage.
    pub fn size_of(self) -> usize {
        match self {
            Dtype::None | Dtype::ValidNone => 0,
            Dtype::Int32 => 4,
            Dtype::Int64 => 8,
            Dtype::Float32 => 4,
            Dtype::Float64 => 8,
            Dtype::CFloat32 => 8,
            Dtype::CFloat64 => 16,
        }
    }

    /// Natural SIMD lane count for the type (1 when no packet form exists).
    pub fn lanes(self) -> usize {
        match self {
            Dtype::None | Dtype::ValidNone => 1,
            Dtype::Int32 => 8,
            Dtype::Int64 => 8,
            Dtype::Float32 => 16,
            Dtype::Float64 => 8,
            Dtype::CFloat32 | Dtype::CFloat64 => 1,
        }
    }

    /// Capability bitmap (see [`flags`]).
    pub fn flags(self) -> u32 {
        use flags::*;
        match self {
            Dtype::None | Dtype::ValidNone => 0,
            Dtype::Int32 | Dtype::Int64 => SCALAR_ALL | PACKET_ALL,
            Dtype::Float32 | Dtype::Float64 => {
                SCALAR_ARITHMETIC | SCALAR_LOGICAL | PACKET_ARITHMETIC | PACKET_LOGICAL
            }
            // Complex types run scalar-only.
            Dtype::CFloat32 | Dtype::CFloat64 => SCALAR_ARITHMETIC,
        }
    }

    /// True for the two placeholder variants that cannot be computed with.
    pub fn is_none(self) -> bool {
        matches!(self, Dtype::None | Dtype::ValidNone)
    }

    /// True for `CFloat32` / `CFloat64`.
    pub fn is_complex(self) -> bool {
        matches!(self, Dtype::CFloat32 | Dtype::CFloat64)
    }

    /// True for `Int32` / `Int64`.
    pub fn is_integer(self) -> bool {
        matches!(self, Dtype::Int32 | Dtype::Int64)
    }

    /// Common type of two operands: the larger ordinal.
    pub fn common(self, other: Dtype) -> Dtype {
        self.max(other)
    }

    /// Canonical name, as produced by `Display`.
    pub fn name(self) -> &'static str {
        match self {
            Dtype::None => "none",
            Dtype::ValidNone => "validnone",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
            Dtype::CFloat32 => "cfloat32",
            Dtype::CFloat64 => "cfloat64",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dtype {
    type Err = ArrayError;

    /// Parse a type name or one of its accepted synonyms.
    ///
    /// The synonym table follows the original C-family naming, so e.g.
    /// `"long"` is 32-bit and `"long long"` is 64-bit.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "i32" | "int32" | "int" | "long" => Ok(Dtype::Int32),
            "i" | "i64" | "int64" | "long long" => Ok(Dtype::Int64),
            "f32" | "float32" | "float" => Ok(Dtype::Float32),
            "f" | "f64" | "float64" | "double" => Ok(Dtype::Float64),
            "cf32" | "cfloat32" | "complex float" => Ok(Dtype::CFloat32),
            "c" | "cf" | "cf64" | "cfloat64" | "complex" | "complex double" => Ok(Dtype::CFloat64),
            "n" | "none" | "null" | "void" => Ok(Dtype::None),
            other => Err(ArrayError::InvalidDtype {
                what: other.to_string(),
            }),
        }
    }
}

/// Compute device an array lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl Device {
    /// Binary-op device promotion: if either operand is on the GPU, the
    /// result is on the GPU. Operands are never migrated in place.
    pub fn common(self, other: Device) -> Device {
        self.max(other)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Gpu => f.write_str("gpu"),
        }
    }
}

impl FromStr for Device {
    type Err = ArrayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "gpu" => Ok(Device::Gpu),
            other => Err(ArrayError::InvalidDevice {
                what: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_order() {
        assert_eq!(Dtype::Int32.common(Dtype::Int64), Dtype::Int64);
        assert_eq!(Dtype::Int64.common(Dtype::Float32), Dtype::Float32);
        assert_eq!(Dtype::Float64.common(Dtype::Float32), Dtype::Float64);
        assert_eq!(Dtype::Float64.common(Dtype::CFloat32), Dtype::CFloat32);
        assert_eq!(Dtype::CFloat32.common(Dtype::CFloat64), Dtype::CFloat64);
    }

    #[test]
    fn test_parse_synonyms() {
        for s in ["i32", "int32", "int", "long"] {
            assert_eq!(s.parse::<Dtype>().unwrap(), Dtype::Int32);
        }
        for s in ["i", "i64", "int64", "long long"] {
            assert_eq!(s.parse::<Dtype>().unwrap(), Dtype::Int64);
        }
        for s in ["f32", "float32", "float"] {
            assert_eq!(s.parse::<Dtype>().unwrap(), Dtype::Float32);
        }
        for s in ["f", "f64", "float64", "double"] {
            assert_eq!(s.parse::<Dtype>().unwrap(), Dtype::Float64);
        }
        for s in ["cf32", "cfloat32", "complex float"] {
            assert_eq!(s.parse::<Dtype>().unwrap(), Dtype::CFloat32);
        }
        for s in ["c", "cf", "cf64", "cfloat64", "complex", "complex double"] {
            assert_eq!(s.parse::<Dtype>().unwrap(), Dtype::CFloat64);
        }
        for s in ["n", "none", "null", "void"] {
            assert_eq!(s.parse::<Dtype>().unwrap(), Dtype::None);
        }
        assert!("i16".parse::<Dtype>().is_err());
        assert!("bool".parse::<Dtype>().is_err());
    }

    #[test]
    fn test_parse_device() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("GPU".parse::<Device>().unwrap(), Device::Gpu);
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::Cpu.common(Device::Gpu), Device::Gpu);
    }

    #[test]
    fn test_capability_flags() {
        assert_ne!(Dtype::Int32.flags() & flags::SCALAR_BITWISE, 0);
        assert_eq!(Dtype::Float64.flags() & flags::SCALAR_BITWISE, 0);
        assert_eq!(Dtype::CFloat64.flags() & flags::PACKET_ARITHMETIC, 0);
        assert_eq!(Dtype::None.flags(), 0);
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(Dtype::Int32.size_of(), 4);
        assert_eq!(Dtype::CFloat64.size_of(), 16);
        assert_eq!(Dtype::None.size_of(), 0);
    }
}
