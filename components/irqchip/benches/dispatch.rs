//! Parent interrupt demultiplexing cost against the emulated register file

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use kaal_irqchip::mock::MockPlatform;
use kaal_irqchip::{ChipConfig, IrqChip, IrqData, OicController};

fn bench_dispatch(c: &mut Criterion) {
    let platform = Arc::new(MockPlatform::new(ChipConfig::LAN966X));
    platform.regs().set_journaling(false);
    let controller = match OicController::probe(platform.clone(), ChipConfig::LAN966X) {
        Ok(controller) => controller,
        Err(err) => panic!("probe failed: {}", err),
    };
    let domain = controller.domain().unwrap();

    c.bench_function("dispatch_idle", |b| {
        b.iter(|| black_box(platform.fire_parent()))
    });

    for hwirq in [0, 17, 40, 85] {
        domain.request_irq(hwirq, |virq| {
            black_box(virq);
        })
        .unwrap();
    }

    c.bench_function("dispatch_four_sources", |b| {
        b.iter(|| {
            for hwirq in [0, 17, 40, 85] {
                platform.regs().raise(hwirq);
                platform.regs().lower(hwirq);
            }
            black_box(platform.fire_parent())
        })
    });

    c.bench_function("startup_shutdown", |b| {
        let data = IrqData::new(50);
        let bank = domain.bank_for(50).unwrap();
        b.iter(|| {
            bank.irq_startup(&data).unwrap();
            bank.irq_shutdown(&data);
        })
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
