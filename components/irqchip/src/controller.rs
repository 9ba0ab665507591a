//! Domain Lifecycle Manager - probe and remove of the controller
//!
//! # Lifecycle
//! ```text
//! Uninitialized ─> Mapped ─> ChipsInitialized ─> ParentWired ─> Published ─> Removed
//! ```
//! - Mapped: register window mapped, mapping table allocated
//! - ChipsInitialized: every bank disabled and set up
//! - ParentWired: parent interrupt attached to the dispatcher
//! - Published: the domain is visible to consumers
//!
//! A probe that fails part way releases whatever it already acquired: the
//! mapping table and the register window are owned values and are dropped
//! on the error path.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::chip::{Bank, IrqChip, IrqType};
use crate::dispatch::ChainedIrqHandler;
use crate::domain::{IrqDesc, IrqDomain, IrqFlags, VirqAllocator};
use crate::io::RegisterIo;
use crate::lock::{IrqSafeLock, IrqSafeLockGuard};
use crate::regs::{bank_of, ChipConfig};
use crate::{HwIrq, IrqChipError, ParentIrq, Result, Virq};

/// Services the controller needs from the surrounding platform
pub trait IrqPlatform: Send + Sync {
    /// Map register window `index` of the device
    fn ioremap_resource(&self, index: usize) -> Result<Arc<dyn RegisterIo>>;

    /// Resolve parent interrupt `index` of the device
    fn get_irq(&self, index: usize) -> Result<ParentIrq>;

    /// Allocate a domain of `size` lines
    ///
    /// Returns the virq allocator backing the domain. Dropping it releases
    /// the domain.
    fn alloc_domain(&self, size: usize) -> Result<Arc<dyn VirqAllocator>>;

    /// Attach (`Some`) or detach (`None`) the chained handler of `irq`
    fn set_chained_handler(&self, irq: ParentIrq, handler: Option<Arc<dyn ChainedIrqHandler>>);

    /// Make the domain visible to consumers
    fn publish_domain(&self, domain: OicDomain);

    /// Withdraw a published domain
    fn unpublish_domain(&self, domain: &OicDomain);
}

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Mapped,
    ChipsInitialized,
    ParentWired,
    Published,
    Removed,
}

/// Banks and mapping table shared by the controller, the dispatcher and
/// consumers
pub(crate) struct OicCore {
    pub(crate) config: ChipConfig,
    pub(crate) banks: Vec<Bank>,
    pub(crate) domain: IrqDomain,

    /// Cleared by teardown. Consumer operations hold it across their whole
    /// map / startup sequence so teardown cannot run in between.
    /// Lock order: `live`, then the domain table, then a bank lock.
    live: IrqSafeLock<bool>,
}

impl OicCore {
    /// Hold the liveness flag, failing if the domain was removed
    fn ensure_live(&self) -> Result<IrqSafeLockGuard<'_, bool>> {
        let live = self.live.lock();
        if *live {
            Ok(live)
        } else {
            Err(IrqChipError::DomainRemoved)
        }
    }
}

/// Consumer handle on the controller's interrupt domain
///
/// Translates logical sources into virtual interrupt lines and drives
/// those lines through the bank chip operations.
#[derive(Clone)]
pub struct OicDomain {
    core: Arc<OicCore>,
}

impl OicDomain {
    pub fn name(&self) -> &'static str {
        self.core.config.name
    }

    /// Number of logical sources
    pub fn size(&self) -> usize {
        self.core.domain.size()
    }

    /// False once the controller has been removed
    pub fn is_live(&self) -> bool {
        *self.core.live.lock()
    }

    /// Bank owning `hwirq`
    pub fn bank_for(&self, hwirq: HwIrq) -> Result<&Bank> {
        self.core.config.check_hwirq(hwirq)?;
        Ok(&self.core.banks[bank_of(hwirq)])
    }

    pub fn banks(&self) -> &[Bank] {
        &self.core.banks
    }

    /// Map `hwirq` to a virtual interrupt
    ///
    /// Returns the existing virq if the source is already mapped.
    pub fn create_mapping(&self, hwirq: HwIrq) -> Result<Virq> {
        let _live = self.core.ensure_live()?;
        Ok(self.core.domain.create_mapping(hwirq)?.virq())
    }

    pub fn find_mapping(&self, hwirq: HwIrq) -> Option<Virq> {
        self.core.domain.find_mapping(hwirq)
    }

    /// Logical source behind a virtual interrupt of this domain
    pub fn hwirq_of(&self, virq: Virq) -> Option<HwIrq> {
        self.core.domain.find_virq(virq).map(|desc| desc.hwirq())
    }

    /// Drop the mapping of `hwirq`
    ///
    /// Returns the released virq, or `None` if the source was not mapped.
    pub fn dispose_mapping(&self, hwirq: HwIrq) -> Result<Option<Virq>> {
        let _live = self.core.ensure_live()?;
        Ok(self.core.domain.dispose_mapping(hwirq))
    }

    pub fn mapped_count(&self) -> usize {
        self.core.domain.mapped_count()
    }

    /// Deliveries of sources that had no mapping
    pub fn spurious_count(&self) -> usize {
        self.core.domain.spurious_count()
    }

    fn desc(&self, virq: Virq) -> Result<(Arc<IrqDesc>, &Bank)> {
        let desc = self
            .core
            .domain
            .find_virq(virq)
            .ok_or(IrqChipError::NotMapped { virq })?;
        let bank = &self.core.banks[desc.data().bank()];
        Ok((desc, bank))
    }

    /// State flags of a virtual interrupt
    pub fn irq_flags(&self, virq: Virq) -> Result<IrqFlags> {
        Ok(self.desc(virq)?.0.flags())
    }

    /// Map `hwirq`, install `handler` and start the line
    ///
    /// # Errors
    /// Returns error if the domain is removed, `hwirq` is out of range, the
    /// source already has a handler, or no virq is left
    pub fn request_irq<F>(&self, hwirq: HwIrq, handler: F) -> Result<Virq>
    where
        F: Fn(Virq) + Send + Sync + 'static,
    {
        let _live = self.core.ensure_live()?;
        let desc = self.core.domain.create_mapping(hwirq)?;
        let bank = &self.core.banks[desc.data().bank()];

        bank.irq_set_type(desc.data(), IrqType::LEVEL_HIGH)?;
        desc.set_action(Arc::new(handler))?;

        if let Err(err) = desc.startup(bank) {
            desc.take_action();
            return Err(err);
        }

        log::debug!(
            "{}: hwirq {} requested as virq {}",
            self.name(),
            hwirq,
            desc.virq()
        );
        Ok(desc.virq())
    }

    /// Shut the line down and drop its handler
    ///
    /// The mapping itself stays until it is disposed.
    pub fn free_irq(&self, virq: Virq) -> Result<()> {
        let _live = self.core.ensure_live()?;
        let (desc, bank) = self.desc(virq)?;
        if desc.flags().contains(IrqFlags::STARTED) {
            desc.shutdown(bank);
        }
        desc.take_action();
        Ok(())
    }

    pub fn enable_irq(&self, virq: Virq) -> Result<()> {
        let _live = self.core.ensure_live()?;
        let (desc, bank) = self.desc(virq)?;
        desc.enable(bank)
    }

    pub fn disable_irq(&self, virq: Virq) -> Result<()> {
        let _live = self.core.ensure_live()?;
        let (desc, bank) = self.desc(virq)?;
        desc.disable(bank);
        Ok(())
    }

    /// Set the trigger type of a line
    ///
    /// # Errors
    /// Returns `UnsupportedFlowType` for anything but `LEVEL_HIGH`
    pub fn set_irq_type(&self, virq: Virq, flow: IrqType) -> Result<()> {
        let _live = self.core.ensure_live()?;
        let (desc, bank) = self.desc(virq)?;
        bank.irq_set_type(desc.data(), flow)
    }
}

/// LAN966x OIC driver instance
pub struct OicController<P: IrqPlatform> {
    platform: Arc<P>,
    core: Option<Arc<OicCore>>,
    parent_irq: ParentIrq,
    state: LifecycleState,
}

impl<P: IrqPlatform> OicController<P> {
    /// Probe the controller
    ///
    /// Maps the register window, allocates the mapping table, resolves the
    /// parent interrupt, disables every bank, attaches the dispatcher to the
    /// parent interrupt and publishes the domain.
    ///
    /// # Errors
    /// - `InvalidConfig` if the bank table does not match the source count
    /// - `MapResource` / `ParentIrq` if the platform cannot provide them
    /// - `DomainCreation` / `ChipAlloc` if allocation fails
    pub fn probe(platform: Arc<P>, config: ChipConfig) -> Result<Self> {
        config.validate()?;
        let name = config.name;
        let mut state = LifecycleState::Uninitialized;

        let regs = platform.ioremap_resource(0).map_err(|err| {
            log::error!("{}: failed to map resource: {}", name, err);
            err
        })?;

        let virqs = platform.alloc_domain(config.nr_irqs).map_err(|err| {
            log::error!("{}: failed to create an IRQ domain: {}", name, err);
            err
        })?;
        let domain = IrqDomain::alloc_linear(name, config.nr_irqs, virqs)?;
        advance(name, &mut state, LifecycleState::Mapped);

        // From here on an error drops `domain` and `regs`
        let parent_irq = platform.get_irq(0).map_err(|err| {
            log::error!("{}: failed to get the IRQ: {}", name, err);
            err
        })?;

        let mut banks = Vec::new();
        banks
            .try_reserve_exact(config.nr_banks())
            .map_err(|_| IrqChipError::ChipAlloc {
                banks: config.nr_banks(),
            })?;
        for (index, bank_regs) in config.banks.iter().enumerate() {
            let bank = Bank::new(
                index,
                *bank_regs,
                regs.clone(),
                config.valid_mask(index),
                name,
            );
            bank.init();
            banks.push(bank);
        }
        advance(name, &mut state, LifecycleState::ChipsInitialized);

        let core = Arc::new(OicCore {
            config,
            banks,
            domain,
            live: IrqSafeLock::new(true),
        });

        let handler: Arc<dyn ChainedIrqHandler> = core.clone();
        platform.set_chained_handler(parent_irq, Some(handler));
        advance(name, &mut state, LifecycleState::ParentWired);

        platform.publish_domain(OicDomain { core: core.clone() });
        advance(name, &mut state, LifecycleState::Published);

        log::info!(
            "{}: {} sources in {} banks, chained to parent irq {}",
            name,
            config.nr_irqs,
            config.nr_banks(),
            parent_irq
        );

        Ok(Self {
            platform,
            core: Some(core),
            parent_irq,
            state,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn parent_irq(&self) -> ParentIrq {
        self.parent_irq
    }

    /// Consumer handle on the domain, `None` once removed
    pub fn domain(&self) -> Option<OicDomain> {
        self.core.as_ref().map(|core| OicDomain { core: core.clone() })
    }

    /// Disable everything, detach from the parent and release the domain
    pub fn remove(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let core = match self.core.take() {
            Some(core) => core,
            None => return,
        };
        let name = core.config.name;

        // Waits for any consumer operation in flight; later ones fail
        *core.live.lock() = false;

        for bank in &core.banks {
            bank.exit();
        }

        self.platform.set_chained_handler(self.parent_irq, None);

        for hwirq in 0..core.config.nr_irqs as HwIrq {
            core.domain.dispose_mapping(hwirq);
        }

        let handle = OicDomain { core };
        self.platform.unpublish_domain(&handle);

        match Arc::try_unwrap(handle.core) {
            Ok(core) => {
                // Chips go first, then the mapping table
                let OicCore { banks, domain, .. } = core;
                for bank in banks {
                    log::debug!("{}: bank {} released", name, bank.index());
                }
                drop(domain);
            }
            Err(core) => {
                log::debug!(
                    "{}: domain still held by {} consumer handles",
                    name,
                    Arc::strong_count(&core) - 1
                );
            }
        }

        advance(name, &mut self.state, LifecycleState::Removed);
        log::info!("{}: removed", name);
    }
}

impl<P: IrqPlatform> Drop for OicController<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn advance(name: &str, state: &mut LifecycleState, next: LifecycleState) {
    log::debug!("{}: {:?} -> {:?}", name, state, next);
    *state = next;
}
