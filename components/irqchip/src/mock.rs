//! Host emulation of the OIC and its platform
//!
//! # WARNING: This is NOT the real hardware!
//!
//! [`MockOic`] models the register semantics the driver relies on:
//! - enable-set / enable-clear are write-one-to-set / write-one-to-clear on
//!   a hidden enable word
//! - sticky is write-one-to-clear, and re-latches while a level source is
//!   still asserted
//! - identity reads back `sticky & enable & map`
//!
//! Every access is journaled so tests can check exact register sequences.
//! [`MockPlatform`] provides the register window, the parent interrupt, the
//! virq allocator and a recording parent chip, with failure injection for
//! each probe step.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::controller::{IrqPlatform, OicDomain};
use crate::dispatch::{ChainedIrqHandler, ParentIrqChip};
use crate::domain::{LinearVirqAllocator, VirqAllocator};
use crate::io::RegisterIo;
use crate::regs::{bank_of, bit_of, ChipConfig};
use crate::{HwIrq, IrqChipError, ParentIrq, Result};

/// One journaled access or parent chip event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Read(usize),
    Write(usize, u32),
    ChainedEnter,
    ChainedExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reg {
    EnaSet(usize),
    EnaClr(usize),
    Sticky(usize),
    Ident(usize),
    Map(usize),
}

struct MockState {
    enable: Vec<u32>,
    sticky: Vec<u32>,
    map: Vec<u32>,
    level: Vec<u32>,
    ident_noise: Vec<u32>,
    raw: BTreeMap<usize, u32>,
    journal: Vec<Event>,
}

/// Emulated OIC register file
pub struct MockOic {
    config: ChipConfig,
    decode: BTreeMap<usize, Reg>,
    state: Mutex<MockState>,
    map_read_delay: AtomicUsize,
    journaling: AtomicBool,
}

impl MockOic {
    /// Create a register file in its power-on state: every valid source
    /// enabled, nothing pending, nothing routed
    pub fn new(config: ChipConfig) -> Self {
        let nr_banks = config.nr_banks();

        let mut decode = BTreeMap::new();
        for (index, bank) in config.banks.iter().enumerate() {
            decode.insert(bank.ena_set, Reg::EnaSet(index));
            decode.insert(bank.ena_clr, Reg::EnaClr(index));
            decode.insert(bank.sticky, Reg::Sticky(index));
            decode.insert(bank.ident, Reg::Ident(index));
            decode.insert(bank.map, Reg::Map(index));
        }

        let enable = (0..nr_banks).map(|bank| config.valid_mask(bank)).collect();

        Self {
            config,
            decode,
            state: Mutex::new(MockState {
                enable,
                sticky: vec![0; nr_banks],
                map: vec![0; nr_banks],
                level: vec![0; nr_banks],
                ident_noise: vec![0; nr_banks],
                raw: BTreeMap::new(),
                journal: Vec::new(),
            }),
            map_read_delay: AtomicUsize::new(0),
            journaling: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &ChipConfig {
        &self.config
    }

    /// Assert a level source: it latches into sticky until it is lowered
    /// and acknowledged
    pub fn raise(&self, hwirq: HwIrq) {
        let (bank, mask) = (bank_of(hwirq), 1 << bit_of(hwirq));
        let mut state = self.state.lock();
        state.level[bank] |= mask;
        state.sticky[bank] |= mask;
    }

    /// Deassert a level source
    pub fn lower(&self, hwirq: HwIrq) {
        let (bank, mask) = (bank_of(hwirq), 1 << bit_of(hwirq));
        self.state.lock().level[bank] &= !mask;
    }

    /// OR `bits` into every identity read of `bank`, bypassing the
    /// enable/map gating
    pub fn inject_ident(&self, bank: usize, bits: u32) {
        self.state.lock().ident_noise[bank] = bits;
    }

    /// Spin this many iterations inside every map register read, to widen
    /// read-modify-write windows in stress tests
    pub fn set_map_read_delay(&self, spins: usize) {
        self.map_read_delay.store(spins, Ordering::Relaxed);
    }

    /// Turn register access journaling on or off (on by default)
    pub fn set_journaling(&self, on: bool) {
        self.journaling.store(on, Ordering::Relaxed);
    }

    fn record(&self, state: &mut MockState, event: Event) {
        if self.journaling.load(Ordering::Relaxed) {
            state.journal.push(event);
        }
    }

    pub fn enabled(&self, bank: usize) -> u32 {
        self.state.lock().enable[bank]
    }

    pub fn sticky(&self, bank: usize) -> u32 {
        self.state.lock().sticky[bank]
    }

    pub fn map(&self, bank: usize) -> u32 {
        self.state.lock().map[bank]
    }

    pub fn is_enabled(&self, hwirq: HwIrq) -> bool {
        self.enabled(bank_of(hwirq)) & (1 << bit_of(hwirq)) != 0
    }

    pub fn is_pending(&self, hwirq: HwIrq) -> bool {
        self.sticky(bank_of(hwirq)) & (1 << bit_of(hwirq)) != 0
    }

    pub fn is_mapped(&self, hwirq: HwIrq) -> bool {
        self.map(bank_of(hwirq)) & (1 << bit_of(hwirq)) != 0
    }

    /// Record a non-register event in the journal
    pub fn note(&self, event: Event) {
        self.record(&mut self.state.lock(), event);
    }

    pub fn journal(&self) -> Vec<Event> {
        self.state.lock().journal.clone()
    }

    /// Return and clear the journal
    pub fn take_journal(&self) -> Vec<Event> {
        core::mem::take(&mut self.state.lock().journal)
    }

    /// Journaled writes only
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state
            .lock()
            .journal
            .iter()
            .filter_map(|event| match *event {
                Event::Write(offset, value) => Some((offset, value)),
                _ => None,
            })
            .collect()
    }
}

impl RegisterIo for MockOic {
    fn read(&self, offset: usize) -> u32 {
        let value = {
            let mut state = self.state.lock();
            self.record(&mut state, Event::Read(offset));
            match self.decode.get(&offset) {
                Some(Reg::EnaSet(bank)) | Some(Reg::EnaClr(bank)) => state.enable[*bank],
                Some(Reg::Sticky(bank)) => state.sticky[*bank],
                Some(Reg::Map(bank)) => state.map[*bank],
                Some(Reg::Ident(bank)) => {
                    let bank = *bank;
                    (state.sticky[bank] & state.enable[bank] & state.map[bank])
                        | state.ident_noise[bank]
                }
                None => state.raw.get(&offset).copied().unwrap_or(0),
            }
        };

        if matches!(self.decode.get(&offset), Some(Reg::Map(_))) {
            for _ in 0..self.map_read_delay.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }

        value
    }

    fn write(&self, offset: usize, value: u32) {
        let mut state = self.state.lock();
        self.record(&mut state, Event::Write(offset, value));
        match self.decode.get(&offset) {
            Some(Reg::EnaSet(bank)) => {
                let valid = self.config.valid_mask(*bank);
                state.enable[*bank] |= value & valid;
            }
            Some(Reg::EnaClr(bank)) => state.enable[*bank] &= !value,
            Some(Reg::Sticky(bank)) => {
                let bank = *bank;
                state.sticky[bank] &= !value;
                // Level sources still asserted latch again
                let level = state.level[bank];
                state.sticky[bank] |= level;
            }
            Some(Reg::Map(bank)) => state.map[*bank] = value,
            // Read-only
            Some(Reg::Ident(_)) => {}
            None => {
                state.raw.insert(offset, value);
            }
        }
    }
}

/// Parent chip that journals chained entry and exit into the register file
struct MockParentChip<'a> {
    regs: &'a MockOic,
}

impl ParentIrqChip for MockParentChip<'_> {
    fn chained_enter(&self) {
        self.regs.note(Event::ChainedEnter);
    }

    fn chained_exit(&self) {
        self.regs.note(Event::ChainedExit);
    }
}

/// Emulated platform device carrying one OIC
pub struct MockPlatform {
    regs: Arc<MockOic>,
    virqs: Arc<LinearVirqAllocator>,
    parent_irq: Option<ParentIrq>,
    fail_ioremap: AtomicBool,
    fail_domain: AtomicBool,
    handler: Mutex<Option<(ParentIrq, Arc<dyn ChainedIrqHandler>)>>,
    published: Mutex<Option<OicDomain>>,
}

impl MockPlatform {
    /// First virq handed out by the mock allocator
    pub const VIRQ_BASE: u32 = 64;

    /// Parent interrupt of the default platform
    pub const PARENT_IRQ: ParentIrq = 42;

    pub fn new(config: ChipConfig) -> Self {
        Self {
            regs: Arc::new(MockOic::new(config)),
            virqs: Arc::new(LinearVirqAllocator::new(Self::VIRQ_BASE, 256)),
            parent_irq: Some(Self::PARENT_IRQ),
            fail_ioremap: AtomicBool::new(false),
            fail_domain: AtomicBool::new(false),
            handler: Mutex::new(None),
            published: Mutex::new(None),
        }
    }

    /// Platform without a parent interrupt resource
    pub fn without_parent_irq(mut self) -> Self {
        self.parent_irq = None;
        self
    }

    /// Make register window mapping fail
    pub fn fail_ioremap(&self) {
        self.fail_ioremap.store(true, Ordering::Relaxed);
    }

    /// Make domain allocation fail
    pub fn fail_domain_alloc(&self) {
        self.fail_domain.store(true, Ordering::Relaxed);
    }

    pub fn regs(&self) -> &Arc<MockOic> {
        &self.regs
    }

    pub fn virqs(&self) -> &Arc<LinearVirqAllocator> {
        &self.virqs
    }

    /// References to the register window held outside the platform
    pub fn window_refs(&self) -> usize {
        Arc::strong_count(&self.regs) - 1
    }

    /// References to the domain allocator held outside the platform
    pub fn domain_refs(&self) -> usize {
        Arc::strong_count(&self.virqs) - 1
    }

    pub fn chained_handler_attached(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub fn published_domain(&self) -> Option<OicDomain> {
        self.published.lock().clone()
    }

    /// Fire the parent interrupt
    ///
    /// Returns false if no chained handler is attached.
    pub fn fire_parent(&self) -> bool {
        let handler = self.handler.lock().as_ref().map(|(_, h)| h.clone());
        match handler {
            Some(handler) => {
                handler.handle(&MockParentChip { regs: &self.regs });
                true
            }
            None => false,
        }
    }
}

impl IrqPlatform for MockPlatform {
    fn ioremap_resource(&self, index: usize) -> Result<Arc<dyn RegisterIo>> {
        if index != 0 || self.fail_ioremap.load(Ordering::Relaxed) {
            return Err(IrqChipError::MapResource(format!(
                "no memory resource {}",
                index
            )));
        }
        Ok(self.regs.clone())
    }

    fn get_irq(&self, index: usize) -> Result<ParentIrq> {
        match self.parent_irq {
            Some(irq) if index == 0 => Ok(irq),
            _ => Err(IrqChipError::ParentIrq(format!(
                "no interrupt resource {}",
                index
            ))),
        }
    }

    fn alloc_domain(&self, size: usize) -> Result<Arc<dyn VirqAllocator>> {
        if self.fail_domain.load(Ordering::Relaxed) {
            return Err(IrqChipError::DomainCreation { size });
        }
        Ok(self.virqs.clone())
    }

    fn set_chained_handler(&self, irq: ParentIrq, handler: Option<Arc<dyn ChainedIrqHandler>>) {
        *self.handler.lock() = handler.map(|handler| (irq, handler));
    }

    fn publish_domain(&self, domain: OicDomain) {
        *self.published.lock() = Some(domain);
    }

    fn unpublish_domain(&self, _domain: &OicDomain) {
        self.published.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_state() {
        let oic = MockOic::new(ChipConfig::LAN966X);
        assert_eq!(oic.enabled(0), u32::MAX);
        assert_eq!(oic.enabled(2), 0x003f_ffff);
        assert_eq!(oic.sticky(1), 0);
        assert_eq!(oic.map(1), 0);
    }

    #[test]
    fn test_set_clear_semantics() {
        let oic = MockOic::new(ChipConfig::LAN966X);
        oic.write(0x54, !0);
        assert_eq!(oic.enabled(0), 0);

        oic.write(0x60, 1 << 3);
        oic.write(0x60, 1 << 9);
        assert_eq!(oic.enabled(0), (1 << 3) | (1 << 9));

        oic.write(0x54, 1 << 3);
        assert_eq!(oic.enabled(0), 1 << 9);
    }

    #[test]
    fn test_ident_gating_and_relatch() {
        let oic = MockOic::new(ChipConfig::LAN966X);
        oic.raise(35);
        assert_eq!(oic.read(0x108), 0); // not routed yet

        oic.write(0x9c, 1 << 3);
        assert_eq!(oic.read(0x108), 1 << 3);

        // still asserted: ack re-latches
        oic.write(0x34, 1 << 3);
        assert!(oic.is_pending(35));

        oic.lower(35);
        oic.write(0x34, 1 << 3);
        assert!(!oic.is_pending(35));
        assert_eq!(oic.read(0x108), 0);
    }

    #[test]
    fn test_journal() {
        let oic = MockOic::new(ChipConfig::LAN966X);
        oic.write(0x78, 1);
        oic.read(0x78);
        oic.note(Event::ChainedEnter);
        assert_eq!(
            oic.take_journal(),
            vec![Event::Write(0x78, 1), Event::Read(0x78), Event::ChainedEnter]
        );
        assert!(oic.journal().is_empty());
    }

    #[test]
    fn test_platform_failure_injection() {
        let platform = MockPlatform::new(ChipConfig::LAN966X);
        assert!(platform.ioremap_resource(0).is_ok());
        assert!(platform.ioremap_resource(1).is_err());
        assert_eq!(platform.get_irq(0), Ok(MockPlatform::PARENT_IRQ));

        platform.fail_ioremap();
        platform.fail_domain_alloc();
        assert!(platform.ioremap_resource(0).is_err());
        assert!(matches!(
            platform.alloc_domain(86),
            Err(IrqChipError::DomainCreation { size: 86 })
        ));

        let platform = MockPlatform::new(ChipConfig::LAN966X).without_parent_irq();
        assert!(matches!(
            platform.get_irq(0),
            Err(IrqChipError::ParentIrq(_))
        ));
        assert!(!platform.fire_parent());
    }
}
