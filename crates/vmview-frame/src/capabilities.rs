//! Optional listener extensions a dispatcher is willing to handle.

bitflags::bitflags! {
    /// Extension operation sets beyond the baseline scanout/update surface.
    ///
    /// Declared once when the dispatcher is built and fixed for the lifetime
    /// of the listener connection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// `ScanoutMap`/`UpdateMap`: shared-memory fd backings.
        const SHARED_MEMORY_MAP = 1 << 0;
        /// `ScanoutDMABUF2`: multi-plane dmabuf backings.
        const MULTI_PLANE = 1 << 1;
    }
}

impl Capabilities {
    pub fn from_flags(shared_memory_map: bool, multi_plane: bool) -> Self {
        let mut caps = Self::empty();
        caps.set(Self::SHARED_MEMORY_MAP, shared_memory_map);
        caps.set(Self::MULTI_PLANE, multi_plane);
        caps
    }
}
