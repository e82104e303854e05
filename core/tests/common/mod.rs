#![allow(dead_code)]

use rollout_sync::accelerator::{Accelerator, HostAccelerator, Placement, RngState};
use rollout_sync::distributed::{ProcessGroup, StateDictType, TrainingReplica};
use rollout_sync::memory::{Allocation, MemoryPool};
use rollout_sync::protocol::Batch;
use rollout_sync::rollout::{InferenceEngine, SleepLevel};
use rollout_sync::tensor::{Cpu, Device, Tensor, TensorElem};
use rollout_sync::{Error, Result, StateDict};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

pub type Log = Arc<Mutex<Vec<String>>>;

/// Routes the crate's tracing events to the test harness. Set `RUST_LOG=rollout_sync=debug`
/// to see the memory checkpoints.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// A training replica holding its parameters unsharded.
pub struct MockTraining {
    pub params: Vec<(String, Tensor<f32, 2, Cpu>)>,
    pub pool: Arc<MemoryPool>,
    pub log: Log,
    pub state_dict_type: Option<StateDictType>,
}

impl MockTraining {
    pub fn new(pool: Arc<MemoryPool>, log: Log) -> Self {
        let params = vec![
            ("embed.weight".to_string(), Tensor::ones([4, 2])),
            ("layers.0.attn.qkv.weight".to_string(), Tensor::zeros([6, 2])),
            ("lm_head.weight".to_string(), Tensor::ones([4, 2])),
        ];
        Self {
            params,
            pool,
            log,
            state_dict_type: None,
        }
    }

    pub fn full_bytes(&self) -> u64 {
        self.params.iter().map(|(_, t)| t.nbytes() as u64).sum()
    }
}

impl TrainingReplica for MockTraining {
    type Elem = f32;
    type Device = Cpu;

    fn set_state_dict_type(&mut self, kind: StateDictType) {
        push(&self.log, format!("set_state_dict_type({:?})", kind));
        self.state_dict_type = Some(kind);
    }

    fn state_dict(&self) -> Result<StateDict<f32>> {
        push(&self.log, "state_dict");
        let allocation = self.pool.allocate(self.full_bytes())?;
        let mut sd = StateDict::new().with_allocation(allocation);
        for (name, t) in &self.params {
            sd.insert(name.clone(), t.clone());
        }
        Ok(sd)
    }

    fn train(&mut self) -> Result<()> {
        push(&self.log, "train");
        Ok(())
    }
}

/// An engine that reserves `working_bytes` while awake and records what it was given.
pub struct MockEngine {
    pub group: ProcessGroup,
    pub pool: Arc<MemoryPool>,
    pub log: Log,
    pub working_bytes: u64,
    pub working: Option<Allocation>,
    pub loaded: Vec<String>,
    pub fail_sleep: bool,
}

impl MockEngine {
    pub fn new(group: ProcessGroup, pool: Arc<MemoryPool>, log: Log) -> Self {
        Self {
            group,
            pool,
            log,
            working_bytes: 0,
            working: None,
            loaded: Vec::new(),
            fail_sleep: false,
        }
    }
}

impl InferenceEngine<f32> for MockEngine {
    fn wake_up(&mut self) -> Result<()> {
        push(&self.log, "wake_up");
        self.working = Some(self.pool.allocate(self.working_bytes)?);
        Ok(())
    }

    fn sleep(&mut self, level: SleepLevel) -> Result<()> {
        push(&self.log, format!("sleep({:?})", level));
        self.working = None;
        if self.fail_sleep {
            return Err(Error::Engine("offload failed".into()));
        }
        Ok(())
    }

    fn load_weights(&mut self, weights: &StateDict<f32>) -> Result<()> {
        push(&self.log, "load_weights");
        self.loaded.extend(weights.names().map(String::from));
        Ok(())
    }

    fn tensor_parallel_group(&self) -> &ProcessGroup {
        &self.group
    }
}

/// Counts RNG register accesses on top of a host accelerator.
#[derive(Debug)]
pub struct CountingAccelerator {
    pub inner: HostAccelerator,
    pub rng_reads: AtomicUsize,
    pub rng_writes: AtomicUsize,
    pub device_copies: AtomicUsize,
}

impl CountingAccelerator {
    pub fn new(inner: HostAccelerator) -> Self {
        Self {
            inner,
            rng_reads: AtomicUsize::new(0),
            rng_writes: AtomicUsize::new(0),
            device_copies: AtomicUsize::new(0),
        }
    }

    pub fn rng_accesses(&self) -> usize {
        self.rng_reads.load(Ordering::SeqCst) + self.rng_writes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.rng_reads.store(0, Ordering::SeqCst);
        self.rng_writes.store(0, Ordering::SeqCst);
        self.device_copies.store(0, Ordering::SeqCst);
    }
}

impl Accelerator for CountingAccelerator {
    fn current_device(&self) -> Placement {
        self.inner.current_device()
    }

    fn to_device<T: TensorElem, D: Device>(
        &self,
        tensor: &Tensor<T, 2, D>,
        placement: Placement,
    ) -> Result<Tensor<T, 2, D>> {
        self.device_copies.fetch_add(1, Ordering::SeqCst);
        self.inner.to_device(tensor, placement)
    }

    fn get_rng_state(&self) -> RngState {
        self.rng_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_rng_state()
    }

    fn set_rng_state(&self, state: &RngState) -> Result<()> {
        self.rng_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_rng_state(state)
    }

    fn manual_seed(&self, seed: u64) {
        self.rng_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.manual_seed(seed)
    }

    fn memory_pool(&self) -> &Arc<MemoryPool> {
        self.inner.memory_pool()
    }
}

/// A request batch whose row `i` carries the id `first_id + i` in every field.
pub fn request_batch(first_id: i64, rows: usize) -> Batch<i64> {
    let ids: Vec<i64> = (first_id..first_id + rows as i64).collect();

    let mut tensors = BTreeMap::new();
    tensors.insert(
        "input_ids".to_string(),
        Tensor::new(ids.iter().flat_map(|&id| [id, id * 10, id * 100]).collect(), [rows, 3]).unwrap(),
    );
    tensors.insert(
        "attention_mask".to_string(),
        Tensor::new(vec![1; rows * 3], [rows, 3]).unwrap(),
    );

    let mut non_tensors = BTreeMap::new();
    non_tensors.insert(
        "uid".to_string(),
        ids.iter().map(|id| json!(format!("uid-{}", id))).collect(),
    );
    non_tensors.insert("raw_prompt_ids".to_string(), ids.iter().map(|&id| json!([id])).collect());

    Batch::new(tensors, non_tensors).unwrap()
}
