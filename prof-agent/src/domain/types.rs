//! Newtypes for the ids that flow through the instrumentation runtime
//!
//! All three ids are 16 bits wide on the wire. Method and class ids index
//! dense tables assigned by the instrumentor, thread ids are assigned by the
//! thread registry.

use std::fmt;

/// Id of an instrumented method
///
/// Instrumented call sites push the id through a narrow 16-bit instruction
/// operand which the host widens with sign extension. [`MethodId::from_raw`]
/// rebuilds the unsigned index from the low 16 bits; using the widened value
/// directly corrupts every id at or above `0x8000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u16);

impl MethodId {
    /// Rebuild the id from the sign-extended operand of an instrumented call
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_raw(raw: i32) -> Self {
        Self(((raw & 0xff) | (raw & 0xff00)) as u16)
    }

    /// Dense table index
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl From<u16> for MethodId {
    fn from(raw: u16) -> Self {
        Self::from_raw(i32::from(raw))
    }
}

impl From<i16> for MethodId {
    fn from(raw: i16) -> Self {
        Self::from_raw(i32::from(raw))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}", self.0)
    }
}

/// Id of an instrumented class (allocation profiling)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u16);

impl ClassId {
    /// Same low-16-bit reconstruction as [`MethodId::from_raw`]
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_raw(raw: i32) -> Self {
        Self(((raw & 0xff) | (raw & 0xff00)) as u16)
    }

    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl From<u16> for ClassId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Dense id of a thread known to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u16);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_id_above_sign_bit() {
        // 0x8000 pushed through a signed 16-bit operand widens to -32768
        let id = MethodId::from_raw(-32768);
        assert_eq!(id.index(), 32768);
        assert_eq!(MethodId::from(0x8000u16).index(), 32768);
        assert_eq!(MethodId::from(i16::MIN).index(), 32768);
    }

    #[test]
    #[allow(clippy::cast_possible_wrap)]
    fn test_method_id_full_range() {
        for raw in 0..=u16::MAX {
            let widened = i32::from(raw as i16);
            assert_eq!(MethodId::from_raw(widened).index(), usize::from(raw));
            assert_eq!(MethodId::from(raw).0, raw);
        }
    }

    #[test]
    fn test_class_id_masking() {
        assert_eq!(ClassId::from_raw(-1).index(), 0xFFFF);
        assert_eq!(ClassId::from_raw(0x1_0005).index(), 5);
    }

    #[test]
    fn test_display() {
        assert_eq!(ThreadId(7).to_string(), "TID:7");
        assert_eq!(MethodId(3).to_string(), "method#3");
    }
}
