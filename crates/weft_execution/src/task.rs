use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use tracing::debug;
use weft_error::{Result, WeftError};

use crate::execution::operators::sink::BatchConsumer;
use crate::plan::PlanNodeId;

/// Byte accounting shared between a task and the buffering structures it
/// owns.
///
/// Reservations must be balanced by releases of the same size.
#[derive(Debug, Default)]
pub struct MemoryPool {
    reserved: AtomicUsize,
}

impl MemoryPool {
    pub fn reserve(&self, bytes: usize) {
        self.reserved.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn release(&self, bytes: usize) {
        self.reserved.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct BatchQueue {
    queue: VecDeque<RecordBatch>,
    finished: bool,
}

impl BatchQueue {
    fn new() -> Self {
        BatchQueue {
            queue: VecDeque::new(),
            finished: false,
        }
    }
}

/// Channel carrying the sorted output of one upstream driver into a
/// local-merge operator.
///
/// The producing pipeline's sink enqueues, the local-merge operator drains.
/// Enqueued bytes count against the task's memory pool until drained.
#[derive(Debug)]
pub struct LocalMergeSource {
    schema: SchemaRef,
    pool: Arc<MemoryPool>,
    state: Mutex<BatchQueue>,
}

impl LocalMergeSource {
    fn new(schema: SchemaRef, pool: Arc<MemoryPool>) -> Self {
        LocalMergeSource {
            schema,
            pool,
            state: Mutex::new(BatchQueue::new()),
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn enqueue(&self, batch: RecordBatch) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(WeftError::new(
                "Cannot enqueue into a finished local merge source",
            ));
        }
        self.pool.reserve(batch.get_array_memory_size());
        state.queue.push_back(batch);
        Ok(())
    }

    pub fn finish(&self) {
        self.state.lock().finished = true;
    }

    pub fn poll_batch(&self) -> Option<RecordBatch> {
        let batch = self.state.lock().queue.pop_front();
        if let Some(batch) = &batch {
            self.pool.release(batch.get_array_memory_size());
        }
        batch
    }

    /// True once the producer finished and everything has been drained.
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state.finished && state.queue.is_empty()
    }

    /// True once the producer called `finish`, regardless of pending batches.
    pub fn producer_finished(&self) -> bool {
        self.state.lock().finished
    }
}

impl BatchConsumer for LocalMergeSource {
    fn consume(&self, batch: RecordBatch) -> Result<()> {
        self.enqueue(batch)
    }

    fn finish(&self) -> Result<()> {
        LocalMergeSource::finish(self);
        Ok(())
    }
}

/// Channel carrying the secondary side of a merge join, fed by the sink of
/// its own pipeline and drained by the merge-join operator.
#[derive(Debug, Default)]
pub struct MergeJoinSource {
    state: Mutex<BatchQueue>,
}

impl MergeJoinSource {
    fn new() -> Self {
        MergeJoinSource {
            state: Mutex::new(BatchQueue::new()),
        }
    }

    pub fn enqueue(&self, batch: RecordBatch) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(WeftError::new(
                "Cannot enqueue into a finished merge join source",
            ));
        }
        state.queue.push_back(batch);
        Ok(())
    }

    pub fn finish(&self) {
        self.state.lock().finished = true;
    }

    pub fn poll_batch(&self) -> Option<RecordBatch> {
        self.state.lock().queue.pop_front()
    }

    pub fn producer_finished(&self) -> bool {
        self.state.lock().finished
    }
}

impl BatchConsumer for MergeJoinSource {
    fn consume(&self, batch: RecordBatch) -> Result<()> {
        self.enqueue(batch)
    }

    fn finish(&self) -> Result<()> {
        MergeJoinSource::finish(self);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct JoinBridgeState {
    batches: Vec<RecordBatch>,
    producers: usize,
    finished_producers: usize,
}

/// Rendezvous between the build side and the probe side of a join.
///
/// Build drivers publish their buffered batches; the probe blocks until all
/// registered producers have published.
#[derive(Debug, Default)]
pub struct JoinBridge {
    state: Mutex<JoinBridgeState>,
}

impl JoinBridge {
    pub fn register_producer(&self) {
        self.state.lock().producers += 1;
    }

    pub fn publish(&self, batches: Vec<RecordBatch>) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished_producers >= state.producers {
            return Err(WeftError::new(
                "Join bridge received more publishes than registered producers",
            ));
        }
        state.batches.extend(batches);
        state.finished_producers += 1;
        Ok(())
    }

    /// The complete build side, or `None` while producers are outstanding.
    pub fn build_side(&self) -> Option<Vec<RecordBatch>> {
        let state = self.state.lock();
        if state.producers > 0 && state.finished_producers == state.producers {
            Some(state.batches.clone())
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct LocalExchangeState {
    queues: Vec<VecDeque<RecordBatch>>,
    next_queue: usize,
    producers: usize,
    finished_producers: usize,
}

/// Queues pairing the sink side of a local partition with the source
/// operators of its consuming pipeline, one queue per consumer driver.
#[derive(Debug)]
pub struct LocalExchange {
    state: Mutex<LocalExchangeState>,
}

impl LocalExchange {
    fn new() -> Self {
        LocalExchange {
            state: Mutex::new(LocalExchangeState {
                queues: Vec::new(),
                next_queue: 0,
                producers: 0,
                finished_producers: 0,
            }),
        }
    }

    /// Size the exchange for its consumer drivers. Idempotent for a matching
    /// count.
    pub fn ensure_queues(&self, num_consumers: usize) -> Result<()> {
        let mut state = self.state.lock();
        if state.queues.is_empty() {
            state.queues = (0..num_consumers).map(|_| VecDeque::new()).collect();
            Ok(())
        } else if state.queues.len() == num_consumers {
            Ok(())
        } else {
            Err(WeftError::new(format!(
                "Local exchange already sized for {} consumers, requested {num_consumers}",
                state.queues.len()
            )))
        }
    }

    pub fn num_queues(&self) -> usize {
        self.state.lock().queues.len()
    }

    pub fn register_producer(&self) {
        self.state.lock().producers += 1;
    }

    pub fn finish_producer(&self) {
        self.state.lock().finished_producers += 1;
    }

    /// Push to an explicit queue, or round-robin across queues when `None`.
    pub fn push(&self, queue: Option<usize>, batch: RecordBatch) -> Result<()> {
        let mut state = self.state.lock();
        if state.queues.is_empty() {
            return Err(WeftError::new(
                "Local exchange has not been sized for its consumers",
            ));
        }
        let idx = match queue {
            Some(idx) => {
                if idx >= state.queues.len() {
                    return Err(WeftError::new(format!(
                        "Queue index {idx} out of bounds for local exchange with {} queues",
                        state.queues.len()
                    )));
                }
                idx
            }
            None => {
                let idx = state.next_queue;
                state.next_queue = (state.next_queue + 1) % state.queues.len();
                idx
            }
        };
        state.queues[idx].push_back(batch);
        Ok(())
    }

    pub fn poll_batch(&self, consumer: usize) -> Result<Option<RecordBatch>> {
        let mut state = self.state.lock();
        match state.queues.get_mut(consumer) {
            Some(queue) => Ok(queue.pop_front()),
            None => Err(WeftError::new(format!(
                "Consumer index {consumer} out of bounds for local exchange with {} queues",
                state.queues.len()
            ))),
        }
    }

    pub fn is_finished(&self, consumer: usize) -> bool {
        let state = self.state.lock();
        state.producers > 0
            && state.finished_producers == state.producers
            && state
                .queues
                .get(consumer)
                .map(|q| q.is_empty())
                .unwrap_or(true)
    }

    pub fn has_pending(&self, consumer: usize) -> bool {
        let state = self.state.lock();
        state
            .queues
            .get(consumer)
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }
}

/// Buffer receiving a task's partitioned output for remote consumers.
///
/// The transport that drains it lives outside this crate.
pub trait OutputBuffer: Debug + Send + Sync {
    fn num_partitions(&self) -> usize;

    fn enqueue(&self, partition: usize, batch: RecordBatch) -> Result<()>;

    /// No further batches will be enqueued.
    fn no_more_data(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct TaskState {
    local_merge_sources: Vec<Arc<LocalMergeSource>>,
    merge_join_sources: HashMap<PlanNodeId, Arc<MergeJoinSource>>,
    join_bridges: HashMap<PlanNodeId, Arc<JoinBridge>>,
    local_exchanges: HashMap<PlanNodeId, Arc<LocalExchange>>,
    output_buffer: Option<Arc<dyn OutputBuffer>>,
}

/// Runtime state shared by all drivers of one query on this worker.
///
/// Holds the cross-pipeline structures the driver materializer registers:
/// local-merge sources, merge-join sources, join bridges, and local exchange
/// queues.
#[derive(Debug, Default)]
pub struct Task {
    pool: Arc<MemoryPool>,
    state: Mutex<TaskState>,
}

impl Task {
    pub fn new() -> Arc<Self> {
        Arc::new(Task::default())
    }

    pub fn memory_pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    /// Allocate one merge source per upstream driver feeding a local merge.
    ///
    /// May only be called once per task; a second call is a planning bug.
    pub fn create_local_merge_sources(
        &self,
        num_sources: usize,
        schema: SchemaRef,
        pool: Arc<MemoryPool>,
    ) -> Result<Vec<Arc<LocalMergeSource>>> {
        let mut state = self.state.lock();
        if !state.local_merge_sources.is_empty() {
            return Err(WeftError::new(
                "Local merge sources already created for task",
            ));
        }
        debug!(num_sources, "creating local merge sources");
        state.local_merge_sources = (0..num_sources)
            .map(|_| Arc::new(LocalMergeSource::new(schema.clone(), pool.clone())))
            .collect();
        Ok(state.local_merge_sources.clone())
    }

    pub fn get_local_merge_source(&self, driver_id: usize) -> Result<Arc<LocalMergeSource>> {
        let state = self.state.lock();
        state
            .local_merge_sources
            .get(driver_id)
            .cloned()
            .ok_or_else(|| {
                WeftError::new(format!("No local merge source for driver {driver_id}"))
            })
    }

    /// Register the source feeding a merge join. Duplicate registration for
    /// the same node is an error.
    pub fn create_merge_join_source(&self, plan_node_id: &PlanNodeId) -> Result<Arc<MergeJoinSource>> {
        let mut state = self.state.lock();
        if state.merge_join_sources.contains_key(plan_node_id) {
            return Err(WeftError::new(format!(
                "Merge join source already registered for plan node {plan_node_id}"
            )));
        }
        debug!(%plan_node_id, "creating merge join source");
        let source = Arc::new(MergeJoinSource::new());
        state
            .merge_join_sources
            .insert(plan_node_id.clone(), source.clone());
        Ok(source)
    }

    pub fn get_merge_join_source(&self, plan_node_id: &PlanNodeId) -> Result<Arc<MergeJoinSource>> {
        let state = self.state.lock();
        state
            .merge_join_sources
            .get(plan_node_id)
            .cloned()
            .ok_or_else(|| {
                WeftError::new(format!(
                    "No merge join source registered for plan node {plan_node_id}"
                ))
            })
    }

    /// Bridge between the build and probe sides of a join. Either side may
    /// arrive first.
    pub fn get_or_create_join_bridge(&self, plan_node_id: &PlanNodeId) -> Arc<JoinBridge> {
        let mut state = self.state.lock();
        state
            .join_bridges
            .entry(plan_node_id.clone())
            .or_default()
            .clone()
    }

    pub fn local_exchange(&self, plan_node_id: &PlanNodeId) -> Arc<LocalExchange> {
        let mut state = self.state.lock();
        state
            .local_exchanges
            .entry(plan_node_id.clone())
            .or_insert_with(|| Arc::new(LocalExchange::new()))
            .clone()
    }

    pub fn set_output_buffer(&self, buffer: Arc<dyn OutputBuffer>) {
        self.state.lock().output_buffer = Some(buffer);
    }

    pub fn output_buffer(&self) -> Result<Arc<dyn OutputBuffer>> {
        self.state
            .lock()
            .output_buffer
            .clone()
            .ok_or_else(|| WeftError::new("No output buffer set for task"))
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn test_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]))
    }

    fn test_batch() -> RecordBatch {
        RecordBatch::try_new(test_schema(), vec![Arc::new(Int32Array::from(vec![1, 2]))]).unwrap()
    }

    #[test]
    fn local_merge_sources_create_then_get() {
        let task = Task::new();
        let sources = task
            .create_local_merge_sources(2, test_schema(), task.memory_pool().clone())
            .unwrap();
        assert_eq!(2, sources.len());

        task.get_local_merge_source(0).unwrap();
        task.get_local_merge_source(1).unwrap();
        task.get_local_merge_source(2).unwrap_err();
    }

    #[test]
    fn local_merge_sources_duplicate_create() {
        let task = Task::new();
        task.create_local_merge_sources(1, test_schema(), task.memory_pool().clone())
            .unwrap();
        let err = task
            .create_local_merge_sources(1, test_schema(), task.memory_pool().clone())
            .unwrap_err();
        assert_eq!(
            "Local merge sources already created for task",
            err.to_string()
        );
    }

    #[test]
    fn merge_source_tracks_pool_bytes() {
        let task = Task::new();
        let sources = task
            .create_local_merge_sources(1, test_schema(), task.memory_pool().clone())
            .unwrap();

        sources[0].enqueue(test_batch()).unwrap();
        assert!(task.memory_pool().reserved_bytes() > 0);

        sources[0].poll_batch().unwrap();
        assert_eq!(0, task.memory_pool().reserved_bytes());

        assert!(!sources[0].is_finished());
        sources[0].finish();
        assert!(sources[0].is_finished());
    }

    #[test]
    fn merge_join_source_duplicate_registration() {
        let task = Task::new();
        let id = PlanNodeId::from("7");
        task.create_merge_join_source(&id).unwrap();
        let err = task.create_merge_join_source(&id).unwrap_err();
        assert_eq!(
            "Merge join source already registered for plan node 7",
            err.to_string()
        );

        task.get_merge_join_source(&id).unwrap();
        task.get_merge_join_source(&PlanNodeId::from("8")).unwrap_err();
    }

    #[test]
    fn join_bridge_waits_for_all_producers() {
        let bridge = JoinBridge::default();
        bridge.register_producer();
        bridge.register_producer();
        assert!(bridge.build_side().is_none());

        bridge.publish(vec![test_batch()]).unwrap();
        assert!(bridge.build_side().is_none());

        bridge.publish(vec![test_batch()]).unwrap();
        let batches = bridge.build_side().unwrap();
        assert_eq!(2, batches.len());
    }

    #[test]
    fn local_exchange_round_robin() {
        let exchange = LocalExchange::new();
        exchange.ensure_queues(2).unwrap();
        exchange.register_producer();

        exchange.push(None, test_batch()).unwrap();
        exchange.push(None, test_batch()).unwrap();
        exchange.push(None, test_batch()).unwrap();

        assert!(exchange.poll_batch(0).unwrap().is_some());
        assert!(exchange.poll_batch(0).unwrap().is_some());
        assert!(exchange.poll_batch(0).unwrap().is_none());
        assert!(exchange.poll_batch(1).unwrap().is_some());

        assert!(!exchange.is_finished(0));
        exchange.finish_producer();
        assert!(exchange.is_finished(0));
    }

    #[test]
    fn local_exchange_size_mismatch() {
        let exchange = LocalExchange::new();
        exchange.ensure_queues(2).unwrap();
        exchange.ensure_queues(2).unwrap();
        exchange.ensure_queues(3).unwrap_err();
    }
}
