//! Access flags for classes, fields and methods.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Access and property flags, using the container format's bit layout.
    ///
    /// Some bits mean different things for fields and methods
    /// (`VOLATILE`/`BRIDGE`, `TRANSIENT`/`VARARGS`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const BRIDGE = 0x0040;
        const TRANSIENT = 0x0080;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x1_0000;
    }
}

impl AccessFlags {
    #[inline]
    pub fn is_public(self) -> bool {
        self.contains(Self::PUBLIC)
    }

    #[inline]
    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    #[inline]
    pub fn is_protected(self) -> bool {
        self.contains(Self::PROTECTED)
    }

    #[inline]
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    #[inline]
    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }

    #[inline]
    pub fn is_volatile(self) -> bool {
        self.contains(Self::VOLATILE)
    }

    #[inline]
    pub fn is_native(self) -> bool {
        self.contains(Self::NATIVE)
    }

    #[inline]
    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    #[inline]
    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    #[inline]
    pub fn is_constructor(self) -> bool {
        self.contains(Self::CONSTRUCTOR)
    }

    /// Static class initializer (`<clinit>`).
    #[inline]
    pub fn is_class_initializer(self) -> bool {
        self.contains(Self::CONSTRUCTOR | Self::STATIC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_initializer_needs_both_bits() {
        assert!((AccessFlags::STATIC | AccessFlags::CONSTRUCTOR).is_class_initializer());
        assert!(!AccessFlags::CONSTRUCTOR.is_class_initializer());
        assert!(!AccessFlags::STATIC.is_class_initializer());
    }

    #[test]
    fn test_shared_bits() {
        assert_eq!(AccessFlags::VOLATILE.bits(), AccessFlags::BRIDGE.bits());
        assert!(AccessFlags::BRIDGE.is_volatile());
    }
}
