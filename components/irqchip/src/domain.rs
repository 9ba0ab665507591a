//! IRQ domain - logical source to virtual interrupt mapping
//!
//! The domain is a linear table with one slot per logical source, created
//! at probe with a fixed size. Slots are filled lazily the first time a
//! consumer maps a source and emptied one by one at teardown. Each filled
//! slot holds the descriptor of the virtual interrupt line: its number, its
//! state flags and the consumer's action.
//!
//! # Level flow
//! Mapped sources are serviced as level-triggered lines. On delivery the
//! source is masked and acknowledged, the action runs, and the source is
//! unmasked again unless the consumer disabled it meanwhile.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::chip::{IrqChip, IrqData};
use crate::lock::IrqSafeLock;
use crate::{HwIrq, IrqChipError, Result, Virq};

/// Consumer handler, called with the virtual interrupt number
pub type IrqAction = Arc<dyn Fn(Virq) + Send + Sync>;

bitflags! {
    /// State of a virtual interrupt line
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u32 {
        /// Chip startup has run, the source is routed to the parent
        const STARTED = 1 << 0;
        /// Source is masked at the chip
        const MASKED = 1 << 1;
        /// Consumer disabled the line
        const DISABLED = 1 << 2;
        /// Delivered while it could not be handled
        const PENDING = 1 << 3;
    }
}

/// Allocator for virtual interrupt numbers
///
/// Provided by whoever exposes new interrupt lines to the rest of the
/// system.
pub trait VirqAllocator: Send + Sync {
    /// Allocate a fresh virtual interrupt number
    fn alloc(&self) -> Option<Virq>;

    /// Return a number obtained from `alloc`
    fn free(&self, virq: Virq);
}

/// Virtual interrupt number allocator over a fixed range
///
/// Freed numbers are reused before the range is extended.
pub struct LinearVirqAllocator {
    inner: IrqSafeLock<LinearState>,
}

struct LinearState {
    base: Virq,
    next: Virq,
    end: Virq,
    free: Vec<Virq>,
    allocated: usize,
}

impl LinearVirqAllocator {
    /// Create an allocator handing out `base..base + count`
    pub fn new(base: Virq, count: u32) -> Self {
        Self {
            inner: IrqSafeLock::new(LinearState {
                base,
                next: base,
                end: base.saturating_add(count),
                free: Vec::new(),
                allocated: 0,
            }),
        }
    }

    /// Number of currently allocated virqs
    pub fn allocated(&self) -> usize {
        self.inner.lock().allocated
    }
}

impl VirqAllocator for LinearVirqAllocator {
    fn alloc(&self) -> Option<Virq> {
        let mut state = self.inner.lock();

        // Try to reuse a freed number first
        let virq = match state.free.pop() {
            Some(virq) => virq,
            None => {
                if state.next >= state.end {
                    return None;
                }
                let virq = state.next;
                state.next += 1;
                virq
            }
        };

        state.allocated += 1;
        Some(virq)
    }

    fn free(&self, virq: Virq) {
        let mut state = self.inner.lock();
        if virq < state.base || virq >= state.next || state.free.contains(&virq) {
            log::warn!("virq {} was not allocated here, ignoring free", virq);
            return;
        }
        state.free.push(virq);
        state.allocated -= 1;
    }
}

/// Descriptor of one mapped virtual interrupt line
pub struct IrqDesc {
    virq: Virq,
    data: IrqData,
    flags: AtomicU32,
    action: IrqSafeLock<Option<IrqAction>>,
    count: AtomicUsize,
}

impl IrqDesc {
    fn new(virq: Virq, hwirq: HwIrq) -> Self {
        Self {
            virq,
            data: IrqData::new(hwirq),
            flags: AtomicU32::new(IrqFlags::MASKED.bits()),
            action: IrqSafeLock::new(None),
            count: AtomicUsize::new(0),
        }
    }

    pub fn virq(&self) -> Virq {
        self.virq
    }

    pub fn hwirq(&self) -> HwIrq {
        self.data.hwirq
    }

    pub fn data(&self) -> &IrqData {
        &self.data
    }

    pub fn flags(&self) -> IrqFlags {
        IrqFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Number of times the action ran
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn has_action(&self) -> bool {
        self.action.lock().is_some()
    }

    fn set(&self, flags: IrqFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    fn clear(&self, flags: IrqFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Install the consumer action
    ///
    /// # Errors
    /// Returns `AlreadyRequested` if the line already has an action
    pub fn set_action(&self, action: IrqAction) -> Result<()> {
        let mut slot = self.action.lock();
        if slot.is_some() {
            return Err(IrqChipError::AlreadyRequested {
                hwirq: self.data.hwirq,
            });
        }
        *slot = Some(action);
        Ok(())
    }

    /// Remove the consumer action
    pub fn take_action(&self) -> Option<IrqAction> {
        self.action.lock().take()
    }

    /// Start the line at the chip
    pub fn startup(&self, chip: &dyn IrqChip) -> Result<()> {
        chip.irq_startup(&self.data)?;
        self.clear(IrqFlags::MASKED | IrqFlags::DISABLED | IrqFlags::PENDING);
        self.set(IrqFlags::STARTED);
        Ok(())
    }

    /// Shut the line down at the chip
    pub fn shutdown(&self, chip: &dyn IrqChip) {
        chip.irq_shutdown(&self.data);
        self.clear(IrqFlags::STARTED | IrqFlags::PENDING);
        self.set(IrqFlags::MASKED);
    }

    /// Re-enable a disabled line, starting it if needed
    pub fn enable(&self, chip: &dyn IrqChip) -> Result<()> {
        if !self.flags().contains(IrqFlags::STARTED) {
            return self.startup(chip);
        }

        self.clear(IrqFlags::DISABLED | IrqFlags::PENDING);
        chip.irq_unmask(&self.data);
        self.clear(IrqFlags::MASKED);
        Ok(())
    }

    /// Disable the line and mask it at the chip
    pub fn disable(&self, chip: &dyn IrqChip) {
        self.set(IrqFlags::DISABLED);
        chip.irq_mask(&self.data);
        self.set(IrqFlags::MASKED);
    }

    /// Service one delivery of a level-triggered line
    pub fn handle_level(&self, chip: &dyn IrqChip) {
        chip.irq_mask(&self.data);
        chip.irq_ack(&self.data);
        self.set(IrqFlags::MASKED);

        // Clone out so the action runs without the slot lock held
        let action = self.action.lock().clone();
        let action = match action {
            Some(action) if !self.flags().contains(IrqFlags::DISABLED) => action,
            _ => {
                // Stays masked until the consumer enables it
                self.set(IrqFlags::PENDING);
                return;
            }
        };

        self.count.fetch_add(1, Ordering::Relaxed);
        action(self.virq);

        if !self.flags().contains(IrqFlags::DISABLED) {
            chip.irq_unmask(&self.data);
            self.clear(IrqFlags::MASKED);
        }
    }
}

struct DomainTable {
    /// hwirq -> descriptor
    linear: Vec<Option<Arc<IrqDesc>>>,

    /// virq -> hwirq
    revmap: BTreeMap<Virq, HwIrq>,
}

/// Linear interrupt domain
pub struct IrqDomain {
    name: &'static str,
    size: usize,
    table: IrqSafeLock<DomainTable>,
    virqs: Arc<dyn VirqAllocator>,
    spurious: AtomicUsize,
}

impl IrqDomain {
    /// Allocate a domain with one slot per logical source
    ///
    /// # Errors
    /// Returns `DomainCreation` if the table cannot be allocated
    pub fn alloc_linear(
        name: &'static str,
        size: usize,
        virqs: Arc<dyn VirqAllocator>,
    ) -> Result<Self> {
        let mut linear = Vec::new();
        linear
            .try_reserve_exact(size)
            .map_err(|_| IrqChipError::DomainCreation { size })?;
        linear.resize(size, None);

        Ok(Self {
            name,
            size,
            table: IrqSafeLock::new(DomainTable {
                linear,
                revmap: BTreeMap::new(),
            }),
            virqs,
            spurious: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of slots (logical sources)
    pub fn size(&self) -> usize {
        self.size
    }

    fn check(&self, hwirq: HwIrq) -> Result<usize> {
        let index = hwirq as usize;
        if index < self.size {
            Ok(index)
        } else {
            Err(IrqChipError::InvalidHwIrq {
                hwirq,
                nr_irqs: self.size,
            })
        }
    }

    /// Map a source to a virtual interrupt, or return the existing mapping
    ///
    /// # Errors
    /// Returns error if `hwirq` is out of range or no virq is left
    pub fn create_mapping(&self, hwirq: HwIrq) -> Result<Arc<IrqDesc>> {
        let index = self.check(hwirq)?;
        let mut table = self.table.lock();

        if let Some(desc) = &table.linear[index] {
            return Ok(desc.clone());
        }

        let virq = self.virqs.alloc().ok_or(IrqChipError::VirqExhausted)?;
        let desc = Arc::new(IrqDesc::new(virq, hwirq));
        table.linear[index] = Some(desc.clone());
        table.revmap.insert(virq, hwirq);

        log::debug!("{}: mapped hwirq {} to virq {}", self.name, hwirq, virq);
        Ok(desc)
    }

    /// Descriptor of a mapped source
    pub fn find(&self, hwirq: HwIrq) -> Option<Arc<IrqDesc>> {
        let index = self.check(hwirq).ok()?;
        self.table.lock().linear[index].clone()
    }

    /// Virtual interrupt of a mapped source
    pub fn find_mapping(&self, hwirq: HwIrq) -> Option<Virq> {
        self.find(hwirq).map(|desc| desc.virq())
    }

    /// Descriptor of a virtual interrupt owned by this domain
    pub fn find_virq(&self, virq: Virq) -> Option<Arc<IrqDesc>> {
        let table = self.table.lock();
        let hwirq = *table.revmap.get(&virq)?;
        table.linear[hwirq as usize].clone()
    }

    /// Drop the mapping of a source and release its virq
    ///
    /// Returns the released virq, or `None` if the source was not mapped.
    pub fn dispose_mapping(&self, hwirq: HwIrq) -> Option<Virq> {
        let index = self.check(hwirq).ok()?;
        let desc = {
            let mut table = self.table.lock();
            let desc = table.linear[index].take()?;
            table.revmap.remove(&desc.virq());
            desc
        };

        desc.take_action();
        self.virqs.free(desc.virq());

        log::debug!("{}: disposed hwirq {} (virq {})", self.name, hwirq, desc.virq());
        Some(desc.virq())
    }

    /// Number of mapped sources
    pub fn mapped_count(&self) -> usize {
        self.table.lock().revmap.len()
    }

    /// Record a delivery for a source with no mapping
    pub(crate) fn note_spurious(&self, hwirq: HwIrq) {
        self.spurious.fetch_add(1, Ordering::Relaxed);
        log::warn!("{}: spurious interrupt on unmapped hwirq {}", self.name, hwirq);
    }

    /// Deliveries that found no mapping
    pub fn spurious_count(&self) -> usize {
        self.spurious.load(Ordering::Relaxed)
    }
}
