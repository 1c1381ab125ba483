//! AIC 集成测试
//!
//! 测试覆盖:
//! - IACK 优先级与认领屏蔽
//! - 外部中断亲和性与负载分摊
//! - IPI 立即投递、清除与延迟 IPI
//! - 按 CPU 别名访问与寄存器只读视图
//! - 周期更新线程

use std::sync::Arc;
use std::time::{Duration, Instant};

use vm_core::{Config, IrqLevels, MmioDevice};
use vm_device::aic::regs::*;
use vm_device::{Aic, AicConfig, AicCpuMmio};

struct Fixture {
    aic: Arc<Aic>,
    levels: Arc<IrqLevels>,
    cpus: Vec<AicCpuMmio>,
}

fn fixture(num_cpu: usize, num_irq: usize) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let levels = IrqLevels::new(num_cpu);
    let config = AicConfig {
        num_cpu,
        num_irq,
        ..AicConfig::defaults()
    };
    let lines = (0..num_cpu).map(|i| levels.line(i)).collect();
    let aic = Aic::new(&config, lines).expect("create aic");
    let cpus = (0..num_cpu)
        .map(|cpu| aic.cpu_mmio(cpu).expect("cpu view"))
        .collect();
    Fixture { aic, levels, cpus }
}

fn cpu_reg(reg: u64) -> u64 {
    offsets::CPU_BLOCK + reg
}

fn write(view: &mut AicCpuMmio, offset: u64, value: u32) {
    view.write(offset, u64::from(value), 4).expect("mmio write");
}

fn read(view: &AicCpuMmio, offset: u64) -> u32 {
    view.read(offset, 4).expect("mmio read") as u32
}

fn iack(view: &AicCpuMmio) -> u32 {
    read(view, cpu_reg(cpu_offsets::IACK))
}

fn unmask_ipis(view: &mut AicCpuMmio) {
    write(
        view,
        cpu_reg(cpu_offsets::IPI_MASK_CLR),
        AIC_IPI_MASK_NORMAL | AIC_IPI_MASK_SELF,
    );
}

/// 设置亲和性、取消屏蔽并软件置位一个外部中断
fn fire_irq(view: &mut AicCpuMmio, irq: usize, dest: u32) {
    let word = 4 * (irq / 32) as u64;
    let bit = 1 << (irq % 32);
    write(view, offsets::EIR_DEST + 4 * irq as u64, dest);
    write(view, offsets::EIR_MASK_CLR + word, bit);
    write(view, offsets::EIR_SW_SET + word, bit);
}

#[cfg(test)]
mod iack_tests {
    use super::*;

    #[test]
    fn test_iack_priority() {
        let mut f = fixture(2, 32);
        unmask_ipis(&mut f.cpus[0]);
        fire_irq(&mut f.cpus[0], 7, 0b01);
        // CPU1 向 CPU0 发普通 IPI，CPU0 给自己发自身 IPI
        write(&mut f.cpus[1], cpu_reg(cpu_offsets::IPI_SET), 0b01);
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_SET), AIC_IPI_SELF);
        assert!(f.levels.is_raised(0));

        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_IPI_SELF);
        assert!(!f.levels.is_raised(0));
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_IPI_NORMAL);
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_EXT | 7);
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_SPURIOUS);

        let stats = f.aic.stats();
        assert_eq!(stats.iacks, 4);
        assert_eq!(stats.spurious, 1);
    }

    #[test]
    fn test_claim_masks_source() {
        let mut f = fixture(1, 32);
        unmask_ipis(&mut f.cpus[0]);
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_SET), AIC_IPI_SELF);
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_IPI_SELF);
        // 自身 IPI 仍挂起，但已被屏蔽
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_SPURIOUS);
        let mask = read(&f.cpus[0], cpu_reg(cpu_offsets::IPI_MASK_SET));
        assert_eq!(mask & AIC_IPI_MASK_SELF, AIC_IPI_MASK_SELF);

        fire_irq(&mut f.cpus[0], 3, 0b1);
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_EXT | 3);
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_SPURIOUS);
        assert_eq!(read(&f.cpus[0], offsets::EIR_MASK_SET) & (1 << 3), 1 << 3);
        assert_eq!(read(&f.cpus[0], offsets::EIR_INT_RO), 0);

        // 客户机清除挂起并取消屏蔽后才会再次投递
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_CLR), AIC_IPI_SELF);
        unmask_ipis(&mut f.cpus[0]);
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_SPURIOUS);
    }

    #[test]
    fn test_iack_only_claims_own_affinity() {
        let mut f = fixture(2, 32);
        fire_irq(&mut f.cpus[0], 9, 0b10);
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_SPURIOUS);
        assert_eq!(iack(&f.cpus[1]), AIC_EVENT_EXT | 9);
    }
}

#[cfg(test)]
mod distribution_tests {
    use super::*;

    #[test]
    fn test_affinity_fallback_lowest_cpu() {
        let mut f = fixture(4, 32);
        fire_irq(&mut f.cpus[0], 5, 0b1100);
        assert_eq!(f.levels.raised_lines(), vec![2]);
        assert_eq!(iack(&f.cpus[2]), AIC_EVENT_EXT | 5);
    }

    #[test]
    fn test_masked_irq_not_delivered() {
        let mut f = fixture(2, 64);
        write(&mut f.cpus[0], offsets::EIR_DEST + 4 * 40, 0b01);
        write(&mut f.cpus[0], offsets::EIR_SW_SET + 4, 1 << 8);
        assert!(f.levels.raised_lines().is_empty());
        assert_eq!(read(&f.cpus[0], offsets::EIR_SW_SET + 4), 1 << 8);
        assert_eq!(read(&f.cpus[0], offsets::EIR_INT_RO + 4), 0);

        write(&mut f.cpus[0], offsets::EIR_MASK_CLR + 4, 1 << 8);
        assert_eq!(f.levels.raised_lines(), vec![0]);
        assert_eq!(read(&f.cpus[0], offsets::EIR_INT_RO + 4), 1 << 8);
    }

    #[test]
    fn test_second_irq_spreads_to_idle_cpu() {
        let mut f = fixture(2, 32);
        write(&mut f.cpus[0], offsets::EIR_DEST, 0b11);
        write(&mut f.cpus[0], offsets::EIR_DEST + 4, 0b11);
        write(&mut f.cpus[0], offsets::EIR_MASK_CLR, 0b11);
        write(&mut f.cpus[0], offsets::EIR_SW_SET, 0b11);
        assert_eq!(f.levels.raised_lines(), vec![0, 1]);
    }

    #[test]
    fn test_no_affinity_is_never_delivered() {
        let mut f = fixture(2, 32);
        fire_irq(&mut f.cpus[0], 1, 0);
        assert!(f.levels.raised_lines().is_empty());
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_SPURIOUS);
    }

    #[test]
    fn test_input_line_drives_state() {
        let mut f = fixture(1, 32);
        write(&mut f.cpus[0], offsets::EIR_DEST + 4 * 4, 0b1);
        write(&mut f.cpus[0], offsets::EIR_MASK_CLR, 1 << 4);

        let line = f.aic.irq_line(4);
        line.raise();
        assert!(f.levels.is_raised(0));
        assert_eq!(read(&f.cpus[0], offsets::EIR_SW_CLR), 1 << 4);

        line.lower();
        assert_eq!(read(&f.cpus[0], offsets::EIR_SW_CLR), 0);
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_SPURIOUS);
    }

    #[test]
    fn test_sw_clr_drops_pending() {
        let mut f = fixture(1, 32);
        fire_irq(&mut f.cpus[0], 2, 0b1);
        write(&mut f.cpus[0], offsets::EIR_SW_CLR, 1 << 2);
        assert_eq!(iack(&f.cpus[0]), AIC_EVENT_SPURIOUS);
    }
}

#[cfg(test)]
mod ipi_tests {
    use super::*;

    #[test]
    fn test_ipi_raises_target_immediately() {
        let mut f = fixture(2, 32);
        unmask_ipis(&mut f.cpus[1]);
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_SET), 0b10);
        assert_eq!(f.levels.raised_lines(), vec![1]);
        assert_eq!(read(&f.cpus[1], cpu_reg(cpu_offsets::IPI_SET)), 0b01);
        assert_eq!(f.aic.stats().ipis_sent, 1);
    }

    #[test]
    fn test_masked_ipi_waits() {
        let mut f = fixture(2, 32);
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_SET), 0b10);
        assert!(f.levels.raised_lines().is_empty());

        // 取消屏蔽会执行一次更新，挂起的 IPI 随即投递
        write(
            &mut f.cpus[1],
            cpu_reg(cpu_offsets::IPI_MASK_CLR),
            AIC_IPI_MASK_NORMAL,
        );
        assert_eq!(f.levels.raised_lines(), vec![1]);
    }

    #[test]
    fn test_ipi_clear_keeps_line() {
        let mut f = fixture(2, 32);
        unmask_ipis(&mut f.cpus[1]);
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_SET), 0b10);
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_CLR), 0b10);
        assert_eq!(read(&f.cpus[1], cpu_reg(cpu_offsets::IPI_SET)), 0);
        assert!(f.levels.is_raised(1));
        assert_eq!(iack(&f.cpus[1]), AIC_EVENT_SPURIOUS);
        assert!(!f.levels.is_raised(1));
    }

    #[test]
    fn test_deferred_ipi_live_after_update() {
        let mut f = fixture(2, 32);
        unmask_ipis(&mut f.cpus[1]);
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_DEFER_SET), 0b10);
        assert!(f.levels.raised_lines().is_empty());
        assert_eq!(read(&f.cpus[1], cpu_reg(cpu_offsets::IPI_DEFER_SET)), 0b01);

        f.aic.update();
        assert_eq!(f.levels.raised_lines(), vec![1]);
        assert_eq!(read(&f.cpus[1], cpu_reg(cpu_offsets::IPI_DEFER_CLR)), 0);
        assert_eq!(read(&f.cpus[1], cpu_reg(cpu_offsets::IPI_CLR)), 0b01);
        assert_eq!(iack(&f.cpus[1]), AIC_EVENT_IPI_NORMAL);
    }

    #[test]
    fn test_deferred_ipi_cancelled() {
        let mut f = fixture(2, 32);
        unmask_ipis(&mut f.cpus[1]);
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_DEFER_SET), 0b10);
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_DEFER_CLR), 0b10);
        f.aic.update();
        assert!(f.levels.raised_lines().is_empty());
    }

    #[test]
    fn test_alias_block_targets_other_cpu() {
        let mut f = fixture(2, 32);
        let alias = offsets::CPU_ALIAS + offsets::CPU_BLOCK_SIZE;
        assert_eq!(read(&f.cpus[0], alias + cpu_offsets::WHOAMI), 1);
        assert_eq!(read(&f.cpus[0], cpu_reg(cpu_offsets::WHOAMI)), 0);

        write(&mut f.cpus[0], alias + cpu_offsets::IPI_MASK_CLR, AIC_IPI_MASK_SELF);
        let mask = read(&f.cpus[1], cpu_reg(cpu_offsets::IPI_MASK_SET));
        assert_eq!(mask, AIC_IPI_MASK_NORMAL);
    }
}

#[cfg(test)]
mod register_tests {
    use super::*;

    #[test]
    fn test_id_registers() {
        let f = fixture(4, 96);
        assert_eq!(read(&f.cpus[3], offsets::REV), AIC_REV);
        assert_eq!(read(&f.cpus[3], offsets::CAP0) & 0xffff, 96);
        assert_eq!(read(&f.cpus[3], offsets::CAP1), 4);
    }

    #[test]
    fn test_invalid_access_ignored() {
        let mut f = fixture(1, 32);
        assert_eq!(f.cpus[0].read(offsets::REV, 8).expect("read"), 0);
        assert_eq!(read(&f.cpus[0], 0x1000), 0);
        write(&mut f.cpus[0], 0x1000, 0xffff_ffff);
        f.cpus[0]
            .write(offsets::EIR_MASK_CLR, 0xffff_ffff, 2)
            .expect("write");
        assert_eq!(read(&f.cpus[0], offsets::EIR_MASK_SET), u32::MAX);
    }

    #[test]
    fn test_global_config_stored() {
        let mut f = fixture(1, 32);
        write(&mut f.cpus[0], offsets::GLB_CFG, 0x8000_0001);
        assert_eq!(read(&f.cpus[0], offsets::GLB_CFG), 0x8000_0001);
    }
}

#[cfg(test)]
mod ticker_tests {
    use super::*;

    #[test]
    fn test_ticker_applies_deferred_ipi() {
        let mut f = fixture(2, 32);
        unmask_ipis(&mut f.cpus[1]);
        f.aic.start_ticker();
        write(&mut f.cpus[0], cpu_reg(cpu_offsets::IPI_DEFER_SET), 0b10);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !f.levels.is_raised(1) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(f.levels.is_raised(1));
        f.aic.stop_ticker();
    }

    #[test]
    fn test_ticker_stops_with_controller() {
        let f = fixture(1, 32);
        f.aic.start_ticker();
        let Fixture { aic, cpus, .. } = f;
        drop(cpus);
        drop(aic);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_single_irq_goes_to_lowest_affinity_cpu(irq in 0usize..64, dest in 1u32..16) {
            let mut f = fixture(4, 64);
            fire_irq(&mut f.cpus[0], irq, dest);
            let target = dest.trailing_zeros() as usize;
            prop_assert_eq!(f.levels.raised_lines(), vec![target]);
            prop_assert_eq!(iack(&f.cpus[target]), AIC_EVENT_EXT | irq as u32);
        }
    }
}
