//! Opaque GPU resource handles.
//!
//! Handles are plain integers handed out by a [`GraphicsDevice`](crate::GraphicsDevice).
//! The value `0` is reserved as the invalid/unbound handle; binding it tells the
//! device to unbind the slot.

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// The invalid/unbound handle.
            pub const NONE: Self = Self(0);

            /// Returns `true` if this handle refers to a live resource.
            pub fn is_valid(self) -> bool {
                self.0 != 0
            }

            /// Raw handle value.
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

define_handle!(
    /// A texture image (any shape, any number of layers and mips).
    TextureId
);
define_handle!(
    /// A render target: an ordered set of color images plus an optional depth image.
    TargetId
);
define_handle!(
    /// A compiled shader program.
    ProgramId
);
define_handle!(
    /// An uploaded mesh (vertex + index buffers).
    MeshId
);

/// Any GPU resource, used when reporting deletions to the state cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Texture(TextureId),
    Target(TargetId),
    Program(ProgramId),
    Mesh(MeshId),
}

/// Hands out handle values, reusing freed values first.
///
/// Reuse is what makes stale cache entries dangerous, so both backends
/// allocate through this type.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: u32,
    free: Vec<u32>,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle value. Never returns `0`.
    pub fn allocate(&mut self) -> u32 {
        if let Some(value) = self.free.pop() {
            return value;
        }
        self.next += 1;
        self.next
    }

    /// Return a handle value to the pool.
    pub fn release(&mut self, value: u32) {
        if value != 0 && !self.free.contains(&value) {
            self.free.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_handle_is_invalid() {
        assert!(!TextureId::NONE.is_valid());
        assert!(!ProgramId::default().is_valid());
        assert!(MeshId(3).is_valid());
    }

    #[test]
    fn test_allocator_never_returns_zero() {
        let mut alloc = HandleAllocator::new();
        for _ in 0..16 {
            assert_ne!(alloc.allocate(), 0);
        }
    }

    #[test]
    fn test_allocator_reuses_released_values() {
        let mut alloc = HandleAllocator::new();
        let a = alloc.allocate();
        let _b = alloc.allocate();
        alloc.release(a);
        assert_eq!(alloc.allocate(), a);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(TextureId(7).to_string(), "TextureId#7");
    }
}
