//! LAN966x OIC - Cascaded interrupt demultiplexer for KaaL
//!
//! # Purpose
//! The Microchip LAN966x outbound interrupt controller (OIC) folds 86
//! peripheral interrupt sources onto a single parent interrupt line. This
//! crate drives it: it groups the sources into 32-bit register banks, routes
//! each started source to the parent line, demultiplexes the parent
//! interrupt back into per-source deliveries, and manages the probe/remove
//! lifecycle of the controller.
//!
//! # Integration Points
//! - Depends on: a platform that maps the register window, resolves the
//!   parent interrupt and attaches chained handlers ([`IrqPlatform`])
//! - Provides to: downstream drivers, through a published [`OicDomain`]
//! - Capabilities required: the OIC MMIO region and its parent IRQ
//!
//! # Architecture
//! ```text
//! parent IRQ ──> dispatch (bank 0, 1, 2 IDENT) ──> IrqDomain ──> IrqDesc (level flow)
//!                                                                  │
//!                     Bank (ENA_SET / ENA_CLR / STICKY / MAP) <────┘
//! ```
//!
//! # Testing Strategy
//! - Unit tests: bank register sequences, mapping table, bit iteration
//! - Integration tests: probe/dispatch/remove against the emulated register
//!   file in [`mock`]
//! - Stress tests: concurrent startup of sources sharing a bank

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

use alloc::string::String;

mod chip;
mod controller;
mod dispatch;
mod domain;
mod io;
mod lock;
pub mod regs;

#[cfg(feature = "mock")]
pub mod mock;

pub use chip::{Bank, IrqChip, IrqData, IrqType};
pub use controller::{IrqPlatform, LifecycleState, OicController, OicDomain};
pub use dispatch::{for_each_set_bit, ChainedIrqHandler, ParentIrqChip, SetBits};
pub use domain::{IrqAction, IrqDesc, IrqDomain, IrqFlags, LinearVirqAllocator, VirqAllocator};
pub use io::{MmioWindow, RegisterIo};
pub use lock::{IrqSafeLock, IrqSafeLockGuard};
pub use regs::{
    bank_of, bit_of, BankRegs, ChipConfig, IRQS_PER_BANK, LAN966X_OIC_BANKS, LAN966X_OIC_COMPATIBLE,
    LAN966X_OIC_NAME, LAN966X_OIC_NR_IRQ,
};

use thiserror::Error;

/// Hardware (logical) source number inside the controller, `0..nr_irqs`
pub type HwIrq = u32;

/// Virtual interrupt number handed out to consumers
pub type Virq = u32;

/// Parent (chained) interrupt number on the upstream controller
pub type ParentIrq = u32;

/// Error types for interrupt controller operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrqChipError {
    #[error("failed to map resource: {0}")]
    MapResource(String),

    #[error("failed to get the IRQ: {0}")]
    ParentIrq(String),

    #[error("failed to create an IRQ domain of {size} entries")]
    DomainCreation { size: usize },

    #[error("failed to alloc irq domain gc for {banks} banks")]
    ChipAlloc { banks: usize },

    #[error("flow type {flow:#x} is not supported")]
    UnsupportedFlowType { flow: u32 },

    #[error("invalid chip configuration: {0}")]
    InvalidConfig(String),

    #[error("hwirq {hwirq} out of range (controller has {nr_irqs} sources)")]
    InvalidHwIrq { hwirq: HwIrq, nr_irqs: usize },

    #[error("virq {virq} is not mapped in this domain")]
    NotMapped { virq: Virq },

    #[error("no virtual interrupt numbers left")]
    VirqExhausted,

    #[error("hwirq {hwirq} already has a handler")]
    AlreadyRequested { hwirq: HwIrq },

    #[error("interrupt domain has been removed")]
    DomainRemoved,
}

pub type Result<T> = core::result::Result<T, IrqChipError>;
