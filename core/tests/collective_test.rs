use rollout_sync::distributed::{CollectiveBackend, CpuBackend, DeviceMesh, ProcessGroup};
use rollout_sync::tensor::{Cpu, Tensor};
use std::thread;

fn on_every_rank<R, F>(world_size: usize, body: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(CpuBackend) -> R + Send + Copy + 'static,
{
    let handles: Vec<_> = CpuBackend::cluster(world_size)
        .into_iter()
        .map(|backend| thread::spawn(move || body(backend)))
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_ring_all_gather_rows() {
    let results = on_every_rank(4, |backend| {
        // Rank r contributes a [2, 3] block filled with r.
        let rank = backend.rank() as f32;
        let tensor = Tensor::<f32, 2, Cpu>::new(vec![rank; 6], [2, 3]).unwrap();
        backend.all_gather(&tensor, &backend.world_group(), 0).unwrap()
    });

    for gathered in results {
        assert_eq!(gathered.shape(), &[8, 3]);
        for (row, values) in gathered.data().chunks(3).enumerate() {
            let expected = (row / 2) as f32;
            assert!(values.iter().all(|&v| v == expected));
        }
    }
}

#[test]
fn test_ring_all_gather_columns() {
    let results = on_every_rank(3, |backend| {
        let rank = backend.rank() as i32;
        let tensor = Tensor::<i32, 2>::new(vec![rank, rank + 10], [2, 1]).unwrap();
        backend.all_gather(&tensor, &backend.world_group(), 1).unwrap()
    });

    for gathered in results {
        assert_eq!(gathered.shape(), &[2, 3]);
        assert_eq!(gathered.data(), &[0, 1, 2, 10, 11, 12]);
    }
}

#[test]
fn test_all_gather_object_preserves_group_order() {
    let results = on_every_rank(4, |backend| {
        let payload = vec![format!("rank-{}", backend.rank()); backend.rank() + 1];
        backend.all_gather_object(&payload, &backend.world_group()).unwrap()
    });

    for gathered in results {
        assert_eq!(gathered.len(), 4);
        for (peer, payload) in gathered.iter().enumerate() {
            assert_eq!(payload.len(), peer + 1);
            assert!(payload.iter().all(|p| *p == format!("rank-{}", peer)));
        }
    }
}

#[test]
fn test_disjoint_groups_gather_concurrently() {
    let results = on_every_rank(6, |backend| {
        let mesh = DeviceMesh::new(&[("dp", 2), ("tp", 3)], backend.rank()).unwrap();
        let tp = mesh.group("tp").unwrap();
        let dp = mesh.group("dp").unwrap();
        let t = Tensor::<i64, 2>::new(vec![backend.rank() as i64], [1, 1]).unwrap();

        let across_tp = backend.all_gather(&t, &tp, 0).unwrap();
        let across_dp = backend.all_gather(&t, &dp, 0).unwrap();
        (backend.rank(), across_tp.data().to_vec(), across_dp.data().to_vec())
    });

    for (rank, across_tp, across_dp) in results {
        let base = (rank / 3) as i64 * 3;
        assert_eq!(across_tp, vec![base, base + 1, base + 2]);
        let column = (rank % 3) as i64;
        assert_eq!(across_dp, vec![column, column + 3]);
    }
}

#[test]
fn test_group_order_follows_group_not_world() {
    let results = on_every_rank(2, |backend| {
        let reversed = ProcessGroup::new(vec![1, 0]).unwrap();
        let t = Tensor::<u8, 2>::new(vec![backend.rank() as u8], [1, 1]).unwrap();
        backend.all_gather(&t, &reversed, 0).unwrap().data().to_vec()
    });
    assert!(results.iter().all(|r| r == &vec![1, 0]));
}
