mod common;

use common::{CountingAccelerator, MockEngine, MockTraining, new_log};
use rand::RngCore;
use rollout_sync::accelerator::{Accelerator, HostAccelerator};
use rollout_sync::distributed::{CollectiveBackend, CpuBackend, DeviceMesh};
use rollout_sync::memory::MemoryPool;
use rollout_sync::sharding::{FsdpInferenceShardingManager, ShardingManager, generation_seed};
use std::sync::Arc;

fn draws(accel: &HostAccelerator, n: usize) -> Vec<u64> {
    accel.with_rng(|rng| (0..n).map(|_| rng.next_u64()).collect())
}

fn manager_on<A: Accelerator>(
    accel: A,
    mesh: Option<&DeviceMesh>,
) -> FsdpInferenceShardingManager<MockTraining, MockEngine, A, CpuBackend> {
    common::init_tracing();
    let pool = Arc::new(MemoryPool::new());
    let log = new_log();
    let backend = CpuBackend::cluster(1).pop().unwrap();
    let engine = MockEngine::new(backend.world_group(), pool.clone(), log.clone());
    FsdpInferenceShardingManager::new(MockTraining::new(pool, log), engine, accel, backend, mesh).unwrap()
}

#[test]
fn test_cycles_leave_training_stream_untouched() {
    let mesh = DeviceMesh::new(&[("dp", 2), ("tp", 1)], 1).unwrap();
    let accel = Arc::new(HostAccelerator::new(0, 2024));
    let mut manager = manager_on(accel.clone(), Some(&mesh));

    let before = draws(&accel, 3);
    for _ in 0..5 {
        manager.run_in_scope(|_| Ok(())).unwrap();
    }
    let after = draws(&accel, 3);

    let reference = HostAccelerator::new(0, 2024);
    assert_eq!(before, draws(&reference, 3));
    assert_eq!(after, draws(&reference, 3));
}

#[test]
fn test_training_draws_resume_where_they_left_off() {
    let mesh = DeviceMesh::new(&[("dp", 1)], 0).unwrap();
    let accel = Arc::new(HostAccelerator::new(0, 9));
    let mut manager = manager_on(accel.clone(), Some(&mesh));

    let mut observed = draws(&accel, 2);
    manager
        .run_in_scope(|_| {
            // Generation-side sampling does not advance the training stream.
            draws(&accel, 16);
            Ok(())
        })
        .unwrap();
    observed.extend(draws(&accel, 2));

    assert_eq!(observed, draws(&HostAccelerator::new(0, 9), 4));
}

#[test]
fn test_generation_stream_continues_across_scopes() {
    let mesh = DeviceMesh::new(&[("dp", 4)], 2).unwrap();
    let accel = Arc::new(HostAccelerator::new(0, 1));
    let mut manager = manager_on(accel.clone(), Some(&mesh));

    let mut sampled = Vec::new();
    for _ in 0..3 {
        manager
            .run_in_scope(|_| {
                sampled.extend(draws(&accel, 2));
                Ok(())
            })
            .unwrap();
    }

    let unit = HostAccelerator::new(0, generation_seed(2, 1000));
    assert_eq!(sampled, draws(&unit, 6));
}

#[test]
fn test_generation_state_is_shared_within_a_unit() {
    // dp=2 x tp=2: ranks 0 and 1 form unit 0, ranks 2 and 3 form unit 1.
    let samples: Vec<Vec<u64>> = (0..4)
        .map(|rank| {
            let mesh = DeviceMesh::new(&[("dp", 2), ("tp", 2)], rank).unwrap();
            // Training seeds are rank-unique.
            let accel = Arc::new(HostAccelerator::new(rank, 100 + rank as u64));
            let mut manager = manager_on(accel.clone(), Some(&mesh));
            manager.enter().unwrap();
            let sample = draws(&accel, 4);
            manager.exit().unwrap();
            sample
        })
        .collect();

    assert_eq!(samples[0], samples[1]);
    assert_eq!(samples[2], samples[3]);
    assert_ne!(samples[0], samples[2]);
}

#[test]
fn test_unit_seeds_are_pairwise_distinct() {
    let states: Vec<_> = (0..4)
        .map(|unit| {
            let mesh = DeviceMesh::new(&[("dp", 4)], unit).unwrap();
            let manager = manager_on(HostAccelerator::new(0, 0), Some(&mesh));
            assert_eq!(manager.unit_rank(), Some(unit));
            manager.rng().generation_state().cloned().unwrap()
        })
        .collect();

    for i in 0..states.len() {
        for j in i + 1..states.len() {
            assert_ne!(states[i], states[j], "units {} and {} share a generation state", i, j);
        }
    }
}

#[test]
fn test_single_rank_never_touches_rng_register() {
    let accel = Arc::new(CountingAccelerator::new(HostAccelerator::new(0, 3)));
    let mut manager = manager_on(accel.clone(), None);
    assert!(!manager.rng().is_enabled());

    accel.reset();
    for _ in 0..3 {
        manager.enter().unwrap();
        manager.exit().unwrap();
    }
    assert_eq!(accel.rng_accesses(), 0);
}

#[test]
fn test_backend_rank_is_independent_of_unit() {
    let mesh = DeviceMesh::new(&[("dp", 2)], 1).unwrap();
    let manager = manager_on(HostAccelerator::new(0, 0), Some(&mesh));
    assert_eq!(manager.backend().rank(), 0);
    assert_eq!(manager.unit_rank(), Some(1));
}
