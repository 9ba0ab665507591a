//! Dispatcher - demultiplexing of the parent interrupt
//!
//! When the parent line fires, every bank's identity register is read once,
//! in bank order. Each set bit is delivered to the descriptor of that
//! source, lowest bit first. The dispatcher itself never masks or
//! acknowledges anything: that is the level flow of the delivered line.

use crate::chip::Bank;
use crate::controller::OicCore;
use crate::regs::{bank_of, IRQS_PER_BANK};
use crate::HwIrq;

/// Chip of the upstream controller that delivers the parent interrupt
///
/// `chained_enter` / `chained_exit` bracket one complete demultiplexing
/// pass so the upstream controller can handle priority and re-triggering
/// of the parent line.
pub trait ParentIrqChip {
    fn chained_enter(&self);

    fn chained_exit(&self);
}

/// Handler attached to a parent interrupt line
pub trait ChainedIrqHandler: Send + Sync {
    /// Called in interrupt context each time the parent line fires
    fn handle(&self, parent: &dyn ParentIrqChip);
}

/// Iterator over the set bits of a word, lowest first
#[derive(Debug, Clone, Copy)]
pub struct SetBits(u32);

impl Iterator for SetBits {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(bit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for SetBits {}

/// Iterate the set bits of `word` in ascending order
pub fn for_each_set_bit(word: u32) -> SetBits {
    SetBits(word)
}

impl OicCore {
    fn handle_bank(&self, bank: &Bank) {
        let ident = bank.read_ident() & bank.valid_mask();
        if ident == 0 {
            return;
        }

        let first = (bank.index() * IRQS_PER_BANK) as HwIrq;
        for bit in for_each_set_bit(ident) {
            self.handle_domain_irq(first + bit);
        }
    }

    /// Deliver one logical source through the mapping table
    pub(crate) fn handle_domain_irq(&self, hwirq: HwIrq) {
        match self.domain.find(hwirq) {
            Some(desc) => desc.handle_level(&self.banks[bank_of(hwirq)]),
            None => self.domain.note_spurious(hwirq),
        }
    }
}

impl ChainedIrqHandler for OicCore {
    fn handle(&self, parent: &dyn ParentIrqChip) {
        parent.chained_enter();
        for bank in &self.banks {
            self.handle_bank(bank);
        }
        parent.chained_exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_set_bits_ascending() {
        let bits: Vec<u32> = for_each_set_bit((1 << 2) | (1 << 5) | (1 << 31)).collect();
        assert_eq!(bits, vec![2, 5, 31]);
    }

    #[test]
    fn test_set_bits_edges() {
        assert_eq!(for_each_set_bit(0).next(), None);
        assert_eq!(for_each_set_bit(u32::MAX).len(), 32);
        assert_eq!(for_each_set_bit(1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(for_each_set_bit(1 << 31).collect::<Vec<_>>(), vec![31]);
    }
}
