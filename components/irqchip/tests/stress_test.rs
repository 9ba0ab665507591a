//! Concurrency stress tests for bank map updates
//!
//! Sources of the same bank share one map register. Startup and shutdown
//! on different CPUs must never lose each other's map bits.

use std::sync::Arc;

use kaal_irqchip::mock::{Event, MockPlatform};
use kaal_irqchip::*;

const THREADS: u32 = 8;
const ROUNDS: usize = 200;

fn probe() -> (Arc<MockPlatform>, OicController<MockPlatform>, OicDomain) {
    let platform = Arc::new(MockPlatform::new(ChipConfig::LAN966X));
    let controller =
        OicController::probe(platform.clone(), ChipConfig::LAN966X).expect("probe failed");
    let domain = controller.domain().expect("domain not published");
    (platform, controller, domain)
}

#[test]
fn test_concurrent_startup_same_bank() {
    let (platform, _controller, domain) = probe();
    let regs = platform.regs();
    regs.set_map_read_delay(64);

    // Thread t owns bits t, t + 8, t + 16, t + 24 of bank 1
    crossbeam::scope(|scope| {
        for thread in 0..THREADS {
            let domain = &domain;
            scope.spawn(move |_| {
                for hwirq in (32 + thread..64).step_by(THREADS as usize) {
                    let bank = domain.bank_for(hwirq).unwrap();
                    bank.irq_startup(&IrqData::new(hwirq)).unwrap();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(regs.map(1), u32::MAX);
    assert_eq!(regs.enabled(1), u32::MAX);
    assert_eq!(regs.map(0), 0);
}

#[test]
fn test_concurrent_startup_shutdown_churn() {
    let (platform, _controller, domain) = probe();
    let regs = platform.regs();
    regs.set_map_read_delay(16);

    // Even threads end with their sources started, odd threads shut theirs down
    crossbeam::scope(|scope| {
        for thread in 0..THREADS {
            let domain = &domain;
            scope.spawn(move |_| {
                let data = IrqData::new(thread);
                let bank = domain.bank_for(thread).unwrap();
                for _ in 0..ROUNDS {
                    bank.irq_startup(&data).unwrap();
                    bank.irq_shutdown(&data);
                }
                if thread % 2 == 0 {
                    bank.irq_startup(&data).unwrap();
                }
            });
        }
    })
    .unwrap();

    let expected = (0..THREADS)
        .filter(|thread| thread % 2 == 0)
        .fold(0u32, |acc, thread| acc | (1 << thread));
    assert_eq!(regs.map(0), expected);
    assert_eq!(regs.enabled(0), expected);
}

#[test]
fn test_concurrent_request_irq() {
    let (platform, _controller, domain) = probe();
    platform.regs().set_map_read_delay(32);

    let virqs: Vec<Virq> = crossbeam::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|thread| {
                let domain = domain.clone();
                scope.spawn(move |_| {
                    (64 + thread * 2..64 + thread * 2 + 2)
                        .map(|hwirq| domain.request_irq(hwirq, |_| {}).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    })
    .unwrap();

    // Sources 64..80 of bank 2 all routed, every virq distinct
    assert_eq!(platform.regs().map(2), 0xffff);
    let mut sorted = virqs.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), virqs.len());
    assert_eq!(domain.mapped_count(), 16);
}

#[test]
fn test_dispatch_while_starting() {
    let (platform, _controller, domain) = probe();
    let regs = platform.regs();

    for hwirq in 0..16 {
        domain.request_irq(hwirq, |_| {}).unwrap();
    }

    // Bank 0 lower half is serviced by the dispatcher while the upper half
    // is started from another thread
    crossbeam::scope(|scope| {
        scope.spawn(|_| {
            for _ in 0..ROUNDS {
                regs.raise(3);
                regs.lower(3);
                platform.fire_parent();
            }
        });
        scope.spawn(|_| {
            for hwirq in 16..32 {
                let bank = domain.bank_for(hwirq).unwrap();
                bank.irq_startup(&IrqData::new(hwirq)).unwrap();
            }
        });
    })
    .unwrap();

    assert_eq!(regs.map(0), u32::MAX);
    assert!(regs.is_enabled(3));
    assert_eq!(domain.spurious_count(), 0);
}

#[test]
fn test_remove_waits_for_request_in_flight() {
    let (platform, controller, domain) = probe();
    let regs = platform.regs();
    regs.take_journal();
    regs.set_map_read_delay(50_000_000);

    let requested = crossbeam::scope(|scope| {
        let worker = scope.spawn(|_| domain.request_irq(5, |_| {}));

        // Worker is inside the bank 0 map read-modify-write
        while !regs.journal().contains(&Event::Read(0x78)) {
            std::thread::yield_now();
        }
        controller.remove();

        worker.join().unwrap()
    })
    .unwrap();

    // The request completed first, and remove then quiesced its source
    assert!(requested.is_ok());
    for bank in 0..3 {
        assert_eq!(regs.enabled(bank), 0);
        assert_eq!(regs.sticky(bank), 0);
    }
    assert!(!domain.is_live());
    assert_eq!(domain.mapped_count(), 0);
    assert_eq!(platform.virqs().allocated(), 0);
    assert!(matches!(
        domain.request_irq(6, |_| {}),
        Err(IrqChipError::DomainRemoved)
    ));
}
