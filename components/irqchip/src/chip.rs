//! Bank Controller - per-bank chip operations
//!
//! Every bank of 32 sources implements the same capability set
//! ([`IrqChip`]). The bank lock only protects the read-modify-write of the
//! destination map register; enable, disable and ack are single writes to
//! write-one-to-set / write-one-to-clear registers and need no lock.

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::io::RegisterIo;
use crate::lock::IrqSafeLock;
use crate::regs::{bank_of, bit_of, BankRegs};
use crate::{HwIrq, IrqChipError, Result};

bitflags! {
    /// Interrupt trigger (flow) type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IrqType: u32 {
        const EDGE_RISING = 0x1;
        const EDGE_FALLING = 0x2;
        const EDGE_BOTH = Self::EDGE_RISING.bits() | Self::EDGE_FALLING.bits();
        const LEVEL_HIGH = 0x4;
        const LEVEL_LOW = 0x8;
    }
}

/// Per-source data passed to chip operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqData {
    /// Logical source number
    pub hwirq: HwIrq,

    /// Bit of this source inside its bank register
    pub mask: u32,
}

impl IrqData {
    pub fn new(hwirq: HwIrq) -> Self {
        Self {
            hwirq,
            mask: 1 << bit_of(hwirq),
        }
    }

    /// Index of the bank owning this source
    pub fn bank(&self) -> usize {
        bank_of(self.hwirq)
    }
}

/// Chip operations available on every source line
pub trait IrqChip: Send + Sync {
    /// Chip name for diagnostics
    fn name(&self) -> &'static str;

    /// Route the source to the parent line, acknowledge and unmask it
    fn irq_startup(&self, data: &IrqData) -> Result<()>;

    /// Mask the source and remove its route to the parent line
    fn irq_shutdown(&self, data: &IrqData);

    /// Configure the trigger type
    fn irq_set_type(&self, data: &IrqData, flow: IrqType) -> Result<()>;

    fn irq_mask(&self, data: &IrqData);

    fn irq_unmask(&self, data: &IrqData);

    /// Clear the latched (sticky) pending state
    fn irq_ack(&self, data: &IrqData);
}

/// One 32-source register bank
pub struct Bank {
    /// Bank index, `0..nr_banks`
    index: usize,

    /// Register offsets of this bank
    regs: BankRegs,

    /// Shared register window
    io: Arc<dyn RegisterIo>,

    /// Bits of this bank that are real sources
    valid: u32,

    /// Chip name for diagnostics
    name: &'static str,

    /// Serializes read-modify-write of the map register
    lock: IrqSafeLock<()>,
}

impl Bank {
    /// Create a bank over a register window
    pub fn new(
        index: usize,
        regs: BankRegs,
        io: Arc<dyn RegisterIo>,
        valid: u32,
        name: &'static str,
    ) -> Self {
        Self {
            index,
            regs,
            io,
            valid,
            name,
            lock: IrqSafeLock::new(()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn regs(&self) -> &BankRegs {
        &self.regs
    }

    /// Mask of the bits that correspond to real sources
    pub fn valid_mask(&self) -> u32 {
        self.valid
    }

    /// Disable every source of the bank
    ///
    /// First step of the bank life cycle, before any source is started.
    pub fn init(&self) {
        self.io.write(self.regs.ena_clr, !0);
        log::debug!("{}: bank {} initialized", self.name, self.index);
    }

    /// Disable and acknowledge every source of the bank
    pub fn exit(&self) {
        self.io.write(self.regs.ena_clr, !0);
        self.io.write(self.regs.sticky, !0);
        log::debug!("{}: bank {} shut down", self.name, self.index);
    }

    /// Sources currently asserted and routed to the parent line
    pub fn read_ident(&self) -> u32 {
        self.io.read(self.regs.ident)
    }

    /// Current source to destination routing
    pub fn read_map(&self) -> u32 {
        self.io.read(self.regs.map)
    }

    fn update_map(&self, f: impl FnOnce(u32) -> u32) {
        let _guard = self.lock.lock();
        let map = self.io.read(self.regs.map);
        self.io.write(self.regs.map, f(map));
    }

    fn check_owner(&self, data: &IrqData) {
        debug_assert_eq!(data.bank(), self.index);
        debug_assert!(data.mask & self.valid != 0);
    }
}

impl IrqChip for Bank {
    fn name(&self) -> &'static str {
        self.name
    }

    fn irq_startup(&self, data: &IrqData) -> Result<()> {
        self.check_owner(data);

        // Map the source interrupt to the destination
        self.update_map(|map| map | data.mask);

        self.irq_ack(data);
        self.irq_unmask(data);

        Ok(())
    }

    fn irq_shutdown(&self, data: &IrqData) {
        self.check_owner(data);

        // Mask first so the source cannot fire while it is being unmapped
        self.irq_mask(data);

        self.update_map(|map| map & !data.mask);
    }

    fn irq_set_type(&self, data: &IrqData, flow: IrqType) -> Result<()> {
        if flow != IrqType::LEVEL_HIGH {
            log::error!(
                "{} doesn't support flow type {:#x} (hwirq {})",
                self.name,
                flow.bits(),
                data.hwirq
            );
            return Err(IrqChipError::UnsupportedFlowType { flow: flow.bits() });
        }

        Ok(())
    }

    fn irq_mask(&self, data: &IrqData) {
        self.io.write(self.regs.ena_clr, data.mask);
    }

    fn irq_unmask(&self, data: &IrqData) {
        self.io.write(self.regs.ena_set, data.mask);
    }

    fn irq_ack(&self, data: &IrqData) {
        self.io.write(self.regs.sticky, data.mask);
    }
}
