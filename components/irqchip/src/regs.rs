//! Register Bank Model - LAN966x OIC register map
//!
//! The OIC exposes its sources in banks of 32. Every bank has its own
//! enable-set, enable-clear, sticky (ack), identity and destination map
//! register. Only destination 0 is used: all started sources are routed to
//! the one parent interrupt this controller is wired to.

use alloc::format;

use static_assertions::const_assert_eq;

use crate::{HwIrq, IrqChipError, Result};

/// Number of sources handled by one bank
pub const IRQS_PER_BANK: usize = 32;

/// Number of sources implemented by the LAN966x OIC
pub const LAN966X_OIC_NR_IRQ: usize = 86;

/// Chip name used in diagnostics
pub const LAN966X_OIC_NAME: &str = "lan966x-oic";

/// Device tree compatible string
pub const LAN966X_OIC_COMPATIBLE: &str = "microchip,lan966x-oic";

// =============================================================================
// Register offsets
// =============================================================================

/// Interrupt sticky status (write 1 to clear)
pub const LAN966X_OIC_INTR_STICKY: usize = 0x30;
pub const LAN966X_OIC_INTR_STICKY1: usize = 0x34;
pub const LAN966X_OIC_INTR_STICKY2: usize = 0x38;

/// Interrupt enable (read back of the current enable state)
pub const LAN966X_OIC_INTR_ENA: usize = 0x48;
pub const LAN966X_OIC_INTR_ENA1: usize = 0x4c;
pub const LAN966X_OIC_INTR_ENA2: usize = 0x50;

/// Atomic clear of interrupt enable
pub const LAN966X_OIC_INTR_ENA_CLR: usize = 0x54;
pub const LAN966X_OIC_INTR_ENA_CLR1: usize = 0x58;
pub const LAN966X_OIC_INTR_ENA_CLR2: usize = 0x5c;

/// Atomic set of interrupt enable
pub const LAN966X_OIC_INTR_ENA_SET: usize = 0x60;
pub const LAN966X_OIC_INTR_ENA_SET1: usize = 0x64;
pub const LAN966X_OIC_INTR_ENA_SET2: usize = 0x68;

/// Mapping of source to destination interrupts (`n = 0..8`)
pub const fn lan966x_oic_dst_intr_map(n: usize) -> usize {
    0x78 + n * 4
}
pub const fn lan966x_oic_dst_intr_map1(n: usize) -> usize {
    0x9c + n * 4
}
pub const fn lan966x_oic_dst_intr_map2(n: usize) -> usize {
    0xc0 + n * 4
}

/// Currently active interrupt sources per destination (`n = 0..8`)
pub const fn lan966x_oic_dst_intr_ident(n: usize) -> usize {
    0xe4 + n * 4
}
pub const fn lan966x_oic_dst_intr_ident1(n: usize) -> usize {
    0x108 + n * 4
}
pub const fn lan966x_oic_dst_intr_ident2(n: usize) -> usize {
    0x12c + n * 4
}

/// Register offsets of one 32-source bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankRegs {
    /// Write 1 to enable (unmask) a source
    pub ena_set: usize,

    /// Write 1 to disable (mask) a source
    pub ena_clr: usize,

    /// Latched pending state, write 1 to acknowledge
    pub sticky: usize,

    /// Currently asserted sources routed to our destination
    pub ident: usize,

    /// Source to destination routing
    pub map: usize,
}

impl BankRegs {
    /// All offsets, in a fixed order
    pub fn offsets(&self) -> [usize; 5] {
        [self.ena_set, self.ena_clr, self.sticky, self.ident, self.map]
    }
}

/// Per-bank register layout of the LAN966x OIC, destination 0
pub const LAN966X_OIC_BANKS: [BankRegs; 3] = [
    BankRegs {
        ena_set: LAN966X_OIC_INTR_ENA_SET,
        ena_clr: LAN966X_OIC_INTR_ENA_CLR,
        sticky: LAN966X_OIC_INTR_STICKY,
        ident: lan966x_oic_dst_intr_ident(0),
        map: lan966x_oic_dst_intr_map(0),
    },
    BankRegs {
        ena_set: LAN966X_OIC_INTR_ENA_SET1,
        ena_clr: LAN966X_OIC_INTR_ENA_CLR1,
        sticky: LAN966X_OIC_INTR_STICKY1,
        ident: lan966x_oic_dst_intr_ident1(0),
        map: lan966x_oic_dst_intr_map1(0),
    },
    BankRegs {
        ena_set: LAN966X_OIC_INTR_ENA_SET2,
        ena_clr: LAN966X_OIC_INTR_ENA_CLR2,
        sticky: LAN966X_OIC_INTR_STICKY2,
        ident: lan966x_oic_dst_intr_ident2(0),
        map: lan966x_oic_dst_intr_map2(0),
    },
];

const_assert_eq!(
    LAN966X_OIC_NR_IRQ.div_ceil(IRQS_PER_BANK),
    LAN966X_OIC_BANKS.len()
);

/// Bank index of a source
#[inline]
pub fn bank_of(hwirq: HwIrq) -> usize {
    hwirq as usize / IRQS_PER_BANK
}

/// Bit position of a source inside its bank
#[inline]
pub fn bit_of(hwirq: HwIrq) -> u32 {
    hwirq % IRQS_PER_BANK as u32
}

/// Static description of a controller instance
#[derive(Debug, Clone, Copy)]
pub struct ChipConfig {
    /// Chip name for diagnostics
    pub name: &'static str,

    /// Total number of logical sources
    pub nr_irqs: usize,

    /// One entry per bank, in bank order
    pub banks: &'static [BankRegs],
}

impl ChipConfig {
    /// The LAN966x OIC: 86 sources over 3 banks
    pub const LAN966X: ChipConfig = ChipConfig {
        name: LAN966X_OIC_NAME,
        nr_irqs: LAN966X_OIC_NR_IRQ,
        banks: &LAN966X_OIC_BANKS,
    };

    /// Number of banks
    pub fn nr_banks(&self) -> usize {
        self.banks.len()
    }

    /// Check the bank table against the source count
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the number of banks does not cover
    /// `nr_irqs` exactly, if there are no sources, or if an offset is not
    /// 32-bit aligned.
    pub fn validate(&self) -> Result<()> {
        if self.nr_irqs == 0 {
            return Err(IrqChipError::InvalidConfig(format!(
                "{}: no interrupt sources",
                self.name
            )));
        }

        let expected = self.nr_irqs.div_ceil(IRQS_PER_BANK);
        if expected != self.banks.len() {
            return Err(IrqChipError::InvalidConfig(format!(
                "{}: {} sources need {} banks, table has {}",
                self.name,
                self.nr_irqs,
                expected,
                self.banks.len()
            )));
        }

        for (index, bank) in self.banks.iter().enumerate() {
            if let Some(off) = bank.offsets().iter().find(|off| **off % 4 != 0) {
                return Err(IrqChipError::InvalidConfig(format!(
                    "{}: bank {} register offset {:#x} is not 32-bit aligned",
                    self.name, index, off
                )));
            }
        }

        Ok(())
    }

    /// Mask of the bits of `bank` that correspond to real sources
    ///
    /// Every bank but the last is full. The high bits of a partial last
    /// bank never map to a source.
    pub fn valid_mask(&self, bank: usize) -> u32 {
        let first = bank * IRQS_PER_BANK;
        let width = self.nr_irqs.saturating_sub(first).min(IRQS_PER_BANK);

        if width == IRQS_PER_BANK {
            u32::MAX
        } else {
            (1u32 << width) - 1
        }
    }

    /// Check that `hwirq` names a real source
    pub fn check_hwirq(&self, hwirq: HwIrq) -> Result<()> {
        if (hwirq as usize) < self.nr_irqs {
            Ok(())
        } else {
            Err(IrqChipError::InvalidHwIrq {
                hwirq,
                nr_irqs: self.nr_irqs,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SHORT_TABLE: [BankRegs; 2] = [LAN966X_OIC_BANKS[0], LAN966X_OIC_BANKS[1]];

    static MISALIGNED: [BankRegs; 1] = [BankRegs {
        ena_set: 0x60,
        ena_clr: 0x54,
        sticky: 0x31,
        ident: 0xe4,
        map: 0x78,
    }];

    #[test]
    fn test_lan966x_layout() {
        assert_eq!(LAN966X_OIC_BANKS[0].ident, 0xe4);
        assert_eq!(LAN966X_OIC_BANKS[1].ident, 0x108);
        assert_eq!(LAN966X_OIC_BANKS[2].ident, 0x12c);
        assert_eq!(LAN966X_OIC_BANKS[0].map, 0x78);
        assert_eq!(LAN966X_OIC_BANKS[1].map, 0x9c);
        assert_eq!(LAN966X_OIC_BANKS[2].map, 0xc0);
        assert_eq!(lan966x_oic_dst_intr_map(8), 0x98);
    }

    #[test]
    fn test_lan966x_config_is_valid() {
        ChipConfig::LAN966X.validate().unwrap();
        assert_eq!(ChipConfig::LAN966X.nr_banks(), 3);
    }

    #[test]
    fn test_bank_count_mismatch() {
        let config = ChipConfig {
            name: "short",
            nr_irqs: LAN966X_OIC_NR_IRQ,
            banks: &SHORT_TABLE,
        };
        assert!(matches!(
            config.validate(),
            Err(IrqChipError::InvalidConfig(_))
        ));

        // 64 sources fit two banks exactly
        let config = ChipConfig {
            nr_irqs: 64,
            ..config
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_and_misaligned_configs() {
        let empty = ChipConfig {
            name: "empty",
            nr_irqs: 0,
            banks: &[],
        };
        assert!(empty.validate().is_err());

        let misaligned = ChipConfig {
            name: "misaligned",
            nr_irqs: 8,
            banks: &MISALIGNED,
        };
        assert!(matches!(
            misaligned.validate(),
            Err(IrqChipError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_valid_mask() {
        let config = ChipConfig::LAN966X;
        assert_eq!(config.valid_mask(0), u32::MAX);
        assert_eq!(config.valid_mask(1), u32::MAX);
        // 86 - 64 = 22 sources in the last bank
        assert_eq!(config.valid_mask(2), 0x003f_ffff);
        assert_eq!(config.valid_mask(3), 0);
    }

    #[test]
    fn test_source_to_bank() {
        assert_eq!((bank_of(0), bit_of(0)), (0, 0));
        assert_eq!((bank_of(31), bit_of(31)), (0, 31));
        assert_eq!((bank_of(32), bit_of(32)), (1, 0));
        assert_eq!((bank_of(85), bit_of(85)), (2, 21));
    }

    #[test]
    fn test_check_hwirq() {
        let config = ChipConfig::LAN966X;
        assert!(config.check_hwirq(85).is_ok());
        assert_eq!(
            config.check_hwirq(86),
            Err(IrqChipError::InvalidHwIrq {
                hwirq: 86,
                nr_irqs: 86
            })
        );
    }
}
