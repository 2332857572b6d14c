use std::collections::VecDeque;

use crate::error::CoreError;

/// Where the synchronizer lands data. The four methods are the venue-varying
/// pieces of the protocol: what a batch's syncpoint is, how batches compare
/// against a snapshot's syncpoint, and how batches and snapshots are applied.
///
/// Syncpoints are venue-defined monotone values (a server timestamp, an
/// updateId, or a sequence number) normalized to u64.
pub trait SyncSink {
    type Update;
    type Snapshot;

    /// The batch's syncpoint, if it carries one.
    fn syncpoint_of(&self, update: &Self::Update) -> Option<u64>;

    /// Whether the batch carries data newer than `syncpoint`.
    fn newer_than(&self, syncpoint: u64, update: &Self::Update) -> bool;

    /// Apply a live batch (side effects).
    fn apply_update(&mut self, update: Self::Update) -> Result<(), CoreError>;

    /// Apply a snapshot (side effects) and return its syncpoint.
    fn apply_snapshot(&mut self, snapshot: Self::Snapshot) -> Result<u64, CoreError>;
}

/// Handler state: buffering until the snapshot lands, streaming afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Buffering,
    Streaming,
}

/// Reconciles an out-of-band snapshot with a concurrently arriving
/// incremental stream:
///
///   1. stream data is buffered while no snapshot has been seen;
///   2. when the snapshot arrives, its syncpoint is recorded;
///   3. buffered batches at or before the syncpoint are dropped, the rest
///      are replayed in arrival order;
///   4. the first applied batch switches the handler to streaming, after
///      which batches apply directly.
///
/// A later snapshot always wins: it is applied in full and the syncpoint
/// moves to it.
pub struct StreamSynchronizer<S: SyncSink> {
    sink: S,
    state: SyncState,
    syncpoint: Option<u64>,
    queue: VecDeque<S::Update>,
    /// When set, the first batch replayed after a snapshot must continue the
    /// sequence exactly; a hole is reported as GapDetected.
    dense: bool,
}

impl<S: SyncSink> StreamSynchronizer<S> {
    pub fn new(sink: S) -> Self {
        StreamSynchronizer {
            sink,
            state: SyncState::Buffering,
            syncpoint: None,
            queue: VecDeque::new(),
            dense: false,
        }
    }

    /// Require dense sequencing during replay.
    pub fn dense(mut self) -> Self {
        self.dense = true;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn syncpoint(&self) -> Option<u64> {
        self.syncpoint
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Number of batches currently buffered.
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    /// Submit a batch from the live stream.
    pub fn submit_stream(&mut self, update: S::Update) -> Result<(), CoreError> {
        match self.state {
            SyncState::Streaming => self.sink.apply_update(update),
            SyncState::Buffering => {
                self.queue.push_back(update);
                if self.syncpoint.is_some() {
                    self.replay()
                } else {
                    tracing::debug!(buffered = self.queue.len(), "queued pre-sync batch");
                    Ok(())
                }
            }
        }
    }

    /// Submit the out-of-band snapshot; applies it and replays the buffer.
    pub fn submit_sync(&mut self, snapshot: S::Snapshot) -> Result<(), CoreError> {
        let syncpoint = self.sink.apply_snapshot(snapshot)?;
        tracing::debug!(syncpoint, "snapshot applied");
        self.syncpoint = Some(syncpoint);
        self.replay()
    }

    fn replay(&mut self) -> Result<(), CoreError> {
        let syncpoint = self.syncpoint.expect("replay without syncpoint");
        while let Some(update) = self.queue.pop_front() {
            if !self.sink.newer_than(syncpoint, &update) {
                tracing::debug!("dropping pre-sync batch");
                continue;
            }
            if self.dense
                && self.state == SyncState::Buffering
                && let Some(first) = self.sink.syncpoint_of(&update)
                && first > syncpoint + 1
            {
                return Err(CoreError::GapDetected {
                    expected: syncpoint + 1,
                    got: first,
                });
            }
            self.state = SyncState::Streaming;
            self.sink.apply_update(update)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that records applied batches; an update is (min_rts, label),
    /// a snapshot is its syncpoint.
    struct RecordingSink {
        applied: Vec<u64>,
        snapshots: Vec<u64>,
    }

    impl RecordingSink {
        fn new() -> Self {
            RecordingSink {
                applied: Vec::new(),
                snapshots: Vec::new(),
            }
        }
    }

    impl SyncSink for RecordingSink {
        type Update = u64;
        type Snapshot = u64;

        fn syncpoint_of(&self, update: &u64) -> Option<u64> {
            Some(*update)
        }

        fn newer_than(&self, syncpoint: u64, update: &u64) -> bool {
            *update > syncpoint
        }

        fn apply_update(&mut self, update: u64) -> Result<(), CoreError> {
            self.applied.push(update);
            Ok(())
        }

        fn apply_snapshot(&mut self, snapshot: u64) -> Result<u64, CoreError> {
            self.snapshots.push(snapshot);
            Ok(snapshot)
        }
    }

    #[test]
    fn test_race_drops_batches_at_or_before_syncpoint() {
        // Stream is live before the snapshot lands: rts 5..=8 buffered,
        // snapshot arrives at 6; only 7 and 8 survive.
        let mut sync = StreamSynchronizer::new(RecordingSink::new());
        for rts in [5, 6, 7, 8] {
            sync.submit_stream(rts).unwrap();
        }
        assert_eq!(sync.state(), SyncState::Buffering);
        assert_eq!(sync.buffered(), 4);

        sync.submit_sync(6).unwrap();
        assert_eq!(sync.state(), SyncState::Streaming);
        assert_eq!(sync.sink().applied, vec![7, 8]);
        assert_eq!(sync.sink().snapshots, vec![6]);
    }

    #[test]
    fn test_snapshot_before_any_stream_data() {
        let mut sync = StreamSynchronizer::new(RecordingSink::new());
        sync.submit_sync(100).unwrap();
        // Empty buffer: still buffering until the first live batch arrives.
        assert_eq!(sync.state(), SyncState::Buffering);

        sync.submit_stream(101).unwrap();
        assert_eq!(sync.state(), SyncState::Streaming);
        assert_eq!(sync.sink().applied, vec![101]);
    }

    #[test]
    fn test_streaming_applies_directly() {
        let mut sync = StreamSynchronizer::new(RecordingSink::new());
        sync.submit_sync(10).unwrap();
        sync.submit_stream(11).unwrap();
        sync.submit_stream(12).unwrap();
        assert_eq!(sync.sink().applied, vec![11, 12]);
        assert_eq!(sync.buffered(), 0);
    }

    #[test]
    fn test_binance_style_replay() {
        // lastUpdateId = 100; buffered u in {98, 99, 101, 102}:
        // 98 and 99 dropped, 101 and 102 applied.
        let mut sync = StreamSynchronizer::new(RecordingSink::new());
        for u in [98, 99, 101, 102] {
            sync.submit_stream(u).unwrap();
        }
        sync.submit_sync(100).unwrap();
        assert_eq!(sync.sink().applied, vec![101, 102]);
    }

    #[test]
    fn test_dense_mode_reports_gap() {
        let mut sync = StreamSynchronizer::new(RecordingSink::new()).dense();
        sync.submit_stream(103).unwrap();
        let err = sync.submit_sync(100).unwrap_err();
        assert_eq!(
            err,
            CoreError::GapDetected {
                expected: 101,
                got: 103
            }
        );
    }

    #[test]
    fn test_dense_mode_contiguous_ok() {
        let mut sync = StreamSynchronizer::new(RecordingSink::new()).dense();
        for u in [99, 101, 102] {
            sync.submit_stream(u).unwrap();
        }
        sync.submit_sync(100).unwrap();
        assert_eq!(sync.sink().applied, vec![101, 102]);
    }

    #[test]
    fn test_later_snapshot_wins() {
        let mut sync = StreamSynchronizer::new(RecordingSink::new());
        sync.submit_sync(10).unwrap();
        sync.submit_stream(11).unwrap();
        sync.submit_sync(20).unwrap();
        assert_eq!(sync.sink().snapshots, vec![10, 20]);
        assert_eq!(sync.syncpoint(), Some(20));
    }
}
