//! Register window access
//!
//! Banks never touch memory directly: they go through [`RegisterIo`], so the
//! same code drives the real MMIO window on hardware and the emulated
//! register file in tests.

/// 32-bit register accessor for the controller's register window
///
/// Reads and writes complete synchronously. The enable-set, enable-clear
/// and sticky registers are write-one-to-set / write-one-to-clear, so
/// concurrent single-bit writes to them need no software lock.
pub trait RegisterIo: Send + Sync {
    /// Read the register at byte offset `offset`
    fn read(&self, offset: usize) -> u32;

    /// Write `value` to the register at byte offset `offset`
    fn write(&self, offset: usize, value: u32);
}

/// Memory-mapped register window
///
/// Provides volatile 32-bit access to a mapped device region
pub struct MmioWindow {
    base: usize,
    size: usize,
}

// SAFETY: the window only hands out volatile accesses to device memory;
// the registers themselves tolerate access from any CPU.
unsafe impl Send for MmioWindow {}
unsafe impl Sync for MmioWindow {}

impl MmioWindow {
    /// Create a new register window
    ///
    /// # Safety
    /// Caller must ensure `base..base + size` is mapped device memory that
    /// stays mapped for the lifetime of the window
    pub unsafe fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Get base address
    pub fn base(&self) -> usize {
        self.base
    }

    /// Get size
    pub fn size(&self) -> usize {
        self.size
    }
}

impl RegisterIo for MmioWindow {
    fn read(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size);
        debug_assert!(offset % 4 == 0);
        // SAFETY: `new` guarantees the window is mapped; the offset is
        // bounds and alignment checked above
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write(&self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.size);
        debug_assert!(offset % 4 == 0);
        // SAFETY: see `read`
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_mmio_window_bounds() {
        unsafe {
            let window = MmioWindow::new(0x1000, 0x150);
            assert_eq!(window.base(), 0x1000);
            assert_eq!(window.size(), 0x150);
        }
    }

    #[test]
    fn test_mmio_window_volatile_access() {
        // Back the window with ordinary memory
        let mut backing = vec![0u32; 0x150 / 4];
        let window = unsafe { MmioWindow::new(backing.as_mut_ptr() as usize, 0x150) };

        window.write(0x78, 0x0000_0005);
        window.write(0x12c, 0xdead_beef);

        assert_eq!(window.read(0x78), 5);
        assert_eq!(window.read(0x12c), 0xdead_beef);
        assert_eq!(window.read(0x30), 0);

        drop(window);
        assert_eq!(backing[0x78 / 4], 5);
    }
}
