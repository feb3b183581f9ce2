//! Tests for mount-time recovery
//!
//! These tests verify:
//! - Torn ATEs and torn data are discarded at mount
//! - Committed entries survive every kind of interruption
//! - Interrupted garbage collection is finished or redone
//! - A failed write is skipped without unmounting
//! - A power cut at every single storage operation is recoverable

use std::collections::HashMap;

use nvstore::{Address, BackendError, Config, MemoryFlash, Nvs, NvsError, StorageParameters};

// =============================================================================
// Helper Functions
// =============================================================================

const SECTOR_SIZE: usize = 256;
const SECTOR_COUNT: u16 = 3;
const ATE_SIZE: usize = 12;

fn params() -> StorageParameters {
    StorageParameters::new(4, 0xff, 256)
}

fn config() -> Config {
    Config::builder()
        .sector_size(SECTOR_SIZE as u32)
        .sector_count(SECTOR_COUNT)
        .lookup_cache_size(8)
        .build()
}

fn setup_flash() -> MemoryFlash {
    MemoryFlash::new(SECTOR_SIZE * usize::from(SECTOR_COUNT), params())
}

fn mount(flash: &MemoryFlash) -> Nvs<MemoryFlash> {
    let nvs = Nvs::new(config(), flash.clone()).unwrap();
    nvs.mount().unwrap();
    nvs
}

/// Byte offset of an address on the chip
fn phys(addr: Address) -> usize {
    usize::from(addr.sector()) * SECTOR_SIZE + addr.offset() as usize
}

fn close_slot(sector: usize) -> usize {
    sector * SECTOR_SIZE + SECTOR_SIZE - ATE_SIZE
}

fn is_power_loss(err: &NvsError) -> bool {
    matches!(err, NvsError::Backend(BackendError::PowerLoss(_)))
}

// =============================================================================
// Torn Entry Tests
// =============================================================================

#[test]
fn test_torn_ate_is_discarded() {
    let flash = setup_flash();
    let (ate_wra, data_wra) = {
        let nvs = mount(&flash);
        nvs.write(1, b"committed").unwrap();
        nvs.write_addresses()
    };

    // Data landed, the ATE was only half programmed.
    flash.poke(phys(data_wra), b"torn");
    flash.poke(phys(ate_wra), &[0x02, 0x00, 0x0c, 0x00, 0x04, 0x00]);

    let nvs = mount(&flash);
    assert_eq!(nvs.read_to_vec(1).unwrap(), b"committed");
    assert!(matches!(nvs.read_to_vec(2), Err(NvsError::NotFound)));

    let (new_ate, new_data) = nvs.write_addresses();
    assert_eq!(new_ate.offset(), ate_wra.offset() - ATE_SIZE as u32);
    assert_eq!(new_data.offset(), data_wra.offset() + 4);

    nvs.write(2, b"after").unwrap();
    drop(nvs);

    let nvs = mount(&flash);
    assert_eq!(nvs.read_to_vec(1).unwrap(), b"committed");
    assert_eq!(nvs.read_to_vec(2).unwrap(), b"after");
}

#[test]
fn test_torn_data_is_skipped() {
    let flash = setup_flash();
    let (ate_wra, data_wra) = {
        let nvs = mount(&flash);
        nvs.write(1, b"abcd").unwrap();
        nvs.write_addresses()
    };

    flash.poke(phys(data_wra), &[0u8; 10]);

    let nvs = mount(&flash);
    let (new_ate, new_data) = nvs.write_addresses();
    assert_eq!(new_ate, ate_wra);
    assert_eq!(new_data.offset(), data_wra.offset() + 12);

    nvs.write(2, b"efgh").unwrap();
    assert_eq!(nvs.read_to_vec(1).unwrap(), b"abcd");
    assert_eq!(nvs.read_to_vec(2).unwrap(), b"efgh");
}

#[test]
fn test_garbage_in_fresh_sector_is_erased() {
    let flash = setup_flash();
    flash.poke(0, b"junk");

    let nvs = mount(&flash);

    assert!(flash.snapshot()[..4].iter().all(|&b| b == 0xff));
    let (ate_wra, data_wra) = nvs.write_addresses();
    assert_eq!(ate_wra, Address::new(0, 220));
    assert_eq!(data_wra, Address::new(0, 0));
}

#[test]
fn test_torn_close_marker_keeps_sector_readable() {
    let flash = setup_flash();
    {
        let nvs = mount(&flash);
        // Three 60-byte values fill sector 0; the fourth closes it.
        for id in 1..=4u16 {
            nvs.write(id, &[id as u8; 60]).unwrap();
        }
    }

    let close = close_slot(0);
    flash.poke(close + 6, &[0xff; 6]);

    let nvs = mount(&flash);
    for id in 1..=4u16 {
        assert_eq!(nvs.read_to_vec(id).unwrap(), vec![id as u8; 60]);
    }

    // Rotate past the damaged sector.
    for i in 0..6u8 {
        nvs.write(4, &[0x40 + i; 60]).unwrap();
    }
    for id in 1..=3u16 {
        assert_eq!(nvs.read_to_vec(id).unwrap(), vec![id as u8; 60]);
    }
    assert_eq!(nvs.read_to_vec(4).unwrap(), vec![0x45; 60]);
}

#[test]
fn test_every_sector_closed_is_corruption() {
    let flash = setup_flash();
    for sector in 0..usize::from(SECTOR_COUNT) {
        flash.poke(close_slot(sector), &[0u8; ATE_SIZE]);
    }

    let nvs = Nvs::new(config(), flash).unwrap();
    assert!(matches!(nvs.mount(), Err(NvsError::Corruption(_))));
    assert!(!nvs.is_ready());
}

// =============================================================================
// Failed Write Tests
// =============================================================================

#[test]
fn test_torn_ate_write_keeps_instance_usable() {
    let flash = setup_flash();
    let nvs = mount(&flash);
    nvs.write(1, b"kept").unwrap();

    // Data write succeeds, the ATE write is torn.
    flash.cut_power_after(1);
    let err = nvs.write(2, b"lostdata").unwrap_err();
    assert!(is_power_loss(&err));
    flash.restore_power();

    assert!(nvs.is_ready());
    assert_eq!(nvs.read_to_vec(1).unwrap(), b"kept");
    assert!(matches!(nvs.read_to_vec(2), Err(NvsError::NotFound)));

    nvs.write(2, b"retried!").unwrap();
    assert_eq!(nvs.read_to_vec(2).unwrap(), b"retried!");
    let addresses = nvs.write_addresses();
    drop(nvs);

    // A remount rebuilds the same write addresses.
    let nvs = mount(&flash);
    assert_eq!(nvs.write_addresses(), addresses);
    assert_eq!(nvs.read_to_vec(1).unwrap(), b"kept");
    assert_eq!(nvs.read_to_vec(2).unwrap(), b"retried!");
}

#[test]
fn test_torn_data_write_keeps_instance_usable() {
    let flash = setup_flash();
    let nvs = mount(&flash);
    nvs.write(1, b"kept").unwrap();
    let (ate_wra, data_wra) = nvs.write_addresses();

    // Only half of the data reaches the chip.
    flash.cut_power_after(0);
    let err = nvs.write(2, b"lostdata").unwrap_err();
    assert!(is_power_loss(&err));
    flash.restore_power();

    assert!(nvs.is_ready());
    let (new_ate, new_data) = nvs.write_addresses();
    assert_eq!(new_ate, ate_wra);
    assert_eq!(new_data.offset(), data_wra.offset() + 8);

    nvs.write(3, b"next").unwrap();
    assert_eq!(nvs.read_to_vec(1).unwrap(), b"kept");
    assert!(matches!(nvs.read_to_vec(2), Err(NvsError::NotFound)));
    assert_eq!(nvs.read_to_vec(3).unwrap(), b"next");
    drop(nvs);

    let nvs = mount(&flash);
    assert_eq!(nvs.read_to_vec(1).unwrap(), b"kept");
    assert!(matches!(nvs.read_to_vec(2), Err(NvsError::NotFound)));
    assert_eq!(nvs.read_to_vec(3).unwrap(), b"next");
}

// =============================================================================
// Interrupted Garbage Collection Tests
// =============================================================================

/// Leaves sector 0 closed holding ids 1-3, and sector 1 active and full
/// with ids 4, 5 and a newer id 1. The next 60-byte write collects
/// sector 0, moving ids 2 and 3 and dropping the stale id 1.
fn setup_before_collection() -> MemoryFlash {
    let flash = setup_flash();
    let nvs = mount(&flash);
    for id in 1..=5u16 {
        nvs.write(id, &[id as u8; 60]).unwrap();
    }
    nvs.write(1, &[9; 60]).unwrap();
    flash
}

fn assert_collected_ids(nvs: &Nvs<MemoryFlash>) {
    assert_eq!(nvs.read_to_vec(1).unwrap(), vec![9; 60]);
    for id in 2..=5u16 {
        assert_eq!(nvs.read_to_vec(id).unwrap(), vec![id as u8; 60]);
    }
}

#[test]
fn test_unerased_victim_is_erased_at_mount() {
    let flash = setup_before_collection();
    let before = flash.snapshot();
    {
        let nvs = mount(&flash);
        nvs.write(6, &[6; 60]).unwrap();
    }
    assert!(flash.snapshot()[..SECTOR_SIZE].iter().all(|&b| b == 0xff));

    // Power lost before the collected sector was erased.
    flash.poke(0, &before[..SECTOR_SIZE]);

    let nvs = mount(&flash);
    assert!(flash.snapshot()[..SECTOR_SIZE].iter().all(|&b| b == 0xff));
    assert_collected_ids(&nvs);
    assert_eq!(nvs.read_to_vec(6).unwrap(), vec![6; 60]);
}

#[test]
fn test_collection_is_redone_without_gc_done_marker() {
    let flash = setup_before_collection();
    let before = flash.snapshot();
    {
        let nvs = mount(&flash);
        nvs.write(6, &[6; 60]).unwrap();
    }
    let after = flash.snapshot();

    // Power lost right after sector 1 was closed.
    let mut image = before;
    let close = close_slot(1);
    image[close..close + ATE_SIZE].copy_from_slice(&after[close..close + ATE_SIZE]);
    let flash = MemoryFlash::with_data(image, params());

    let nvs = mount(&flash);
    assert!(flash.snapshot()[..SECTOR_SIZE].iter().all(|&b| b == 0xff));
    assert_collected_ids(&nvs);
    assert!(matches!(nvs.read_to_vec(6), Err(NvsError::NotFound)));

    nvs.write(6, &[6; 60]).unwrap();
    assert_eq!(nvs.read_to_vec(6).unwrap(), vec![6; 60]);
}

#[test]
fn test_two_sector_ring_prefers_compaction_target() {
    let params = params();
    let config = Config::builder()
        .sector_size(SECTOR_SIZE as u32)
        .sector_count(2)
        .build();
    let flash = MemoryFlash::new(2 * SECTOR_SIZE, params);
    let before = {
        let nvs = Nvs::new(config.clone(), flash.clone()).unwrap();
        nvs.mount().unwrap();
        // Four 52-byte versions fill sector 0.
        for i in 1..=4u8 {
            nvs.write(1, &[i; 40]).unwrap();
        }
        let before = flash.snapshot();
        // The fifth compacts sector 0 into sector 1.
        nvs.write(1, &[5; 40]).unwrap();
        before
    };

    // Power lost while sector 0 was being erased: its close marker is gone
    // and its data only partly erased, the ATEs are still there.
    let mut image = flash.snapshot();
    image[..SECTOR_SIZE].copy_from_slice(&before[..SECTOR_SIZE]);
    image[..128].fill(0xff);
    // Sector 1 holds only the moved entry and its gc-done marker.
    let newest = SECTOR_SIZE + SECTOR_SIZE - 4 * ATE_SIZE;
    image[newest..newest + ATE_SIZE].fill(0xff);
    image[SECTOR_SIZE + 40..SECTOR_SIZE + 80].fill(0xff);
    let flash = MemoryFlash::with_data(image, params);

    let nvs = Nvs::new(config, flash.clone()).unwrap();
    nvs.mount().unwrap();

    assert_eq!(nvs.write_addresses().0.sector(), 1);
    assert!(flash.snapshot()[..SECTOR_SIZE].iter().all(|&b| b == 0xff));
    assert_eq!(nvs.read_to_vec(1).unwrap(), vec![4; 40]);

    nvs.write(1, &[6; 40]).unwrap();
    assert_eq!(nvs.read_to_vec(1).unwrap(), vec![6; 40]);
}

// =============================================================================
// Power Cut Sweep
// =============================================================================

const SWEEP_IDS: u16 = 4;
const SWEEP_STEPS: usize = 24;

fn sweep_value(step: usize) -> Vec<u8> {
    vec![step as u8 + 1; 20 + (step % 3) * 4]
}

#[test]
fn test_power_cut_at_every_operation() {
    let mut cut = 0;
    loop {
        assert!(cut < 1000, "sweep did not finish");

        let flash = setup_flash();
        let nvs = mount(&flash);

        let mut acked: HashMap<u16, Vec<u8>> = HashMap::new();
        for id in 0..SWEEP_IDS {
            let value = vec![0xa0 + id as u8; 16];
            nvs.write(id, &value).unwrap();
            acked.insert(id, value);
        }

        flash.cut_power_after(cut);
        let mut in_flight = None;
        for step in 0..SWEEP_STEPS {
            let id = step as u16 % SWEEP_IDS;
            let value = sweep_value(step);
            match nvs.write(id, &value) {
                Ok(_) => {
                    acked.insert(id, value);
                }
                Err(err) => {
                    assert!(is_power_loss(&err), "cut {}: {}", cut, err);
                    in_flight = Some((id, value));
                    break;
                }
            }
        }
        drop(nvs);
        flash.restore_power();

        let nvs = mount(&flash);
        for id in 0..SWEEP_IDS {
            let stored = nvs.read_to_vec(id).unwrap();
            match &in_flight {
                Some((flight_id, value)) if *flight_id == id => {
                    assert!(
                        stored == acked[&id] || stored == *value,
                        "cut {}: id {} holds neither old nor new value",
                        cut,
                        id
                    );
                }
                _ => assert_eq!(stored, acked[&id], "cut {}: id {}", cut, id),
            }
        }

        // The recovered instance keeps working across another remount.
        nvs.write(9, b"post-recovery").unwrap();
        drop(nvs);
        let nvs = mount(&flash);
        assert_eq!(nvs.read_to_vec(9).unwrap(), b"post-recovery");

        if in_flight.is_none() {
            break;
        }
        cut += 1;
    }
}
