//! Forked, append-only, compacting trajectory store.
//!
//! A `DiscreteTrajectory` is a tree of segments held in an arena and
//! addressed by `SegmentId`. The root segment is the trunk (history);
//! children are forks (alternate futures, predictions) whose first
//! sample aliases a retained sample of the parent at the fork time, so
//! children never copy parent data. Samples are only appended at the
//! tail and deleted at the head, never mutated in place.
//!
//! When enough raw samples accumulate, a segment compacts them into a
//! cubic Hermite span, provided the fit deviates from every buffered
//! sample by no more than the fitting tolerance; otherwise the window is
//! flushed uncompacted. The stored trajectory therefore never deviates
//! from the integrated path by more than the tolerance.

mod hermite;

#[cfg(test)]
mod proptest_trajectory;

pub use hermite::Hermite3;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::types::{Sample, State};

/// Identifies one segment within a trajectory tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SegmentId(usize);

/// Compaction policy for a trajectory.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownsamplingParameters {
    /// Raw intervals buffered before a fit is attempted.
    pub dense_interval_count: usize,
    /// Maximum position deviation of the stored representation from the
    /// raw samples, in meters.
    pub fitting_tolerance: f64,
}

impl Default for DownsamplingParameters {
    fn default() -> Self {
        Self {
            dense_interval_count: 16,
            fitting_tolerance: 10.0,
        }
    }
}

#[derive(Clone, Debug)]
struct Segment {
    /// Parent segment and fork time; `None` for the root.
    parent: Option<(SegmentId, f64)>,
    children: Vec<SegmentId>,
    /// Retained raw samples, strictly increasing in time.
    samples: Vec<Sample>,
    /// Compacted sub-ranges, disjoint and time-ordered. Span endpoints
    /// remain present in `samples`.
    spans: Vec<Hermite3>,
    /// Index into `samples` where the uncompacted tail window begins.
    dense_start: usize,
    /// Lower bound installed by `forget_before`.
    forgotten_before: Option<f64>,
}

impl Segment {
    fn new(parent: Option<(SegmentId, f64)>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            samples: Vec::new(),
            spans: Vec::new(),
            dense_start: 0,
            forgotten_before: None,
        }
    }

    /// Last time on this segment's own timeline, including the fork
    /// point when no sample has been appended yet.
    fn last_time(&self) -> Option<f64> {
        self.samples
            .last()
            .map(|s| s.time)
            .or(self.parent.map(|(_, ft)| ft))
    }
}

/// A forked, compacting, append-only time series of states.
#[derive(Clone, Debug)]
pub struct DiscreteTrajectory {
    arena: Vec<Option<Segment>>,
    free: Vec<usize>,
    downsampling: Option<DownsamplingParameters>,
}

impl DiscreteTrajectory {
    pub fn new(downsampling: Option<DownsamplingParameters>) -> Self {
        Self {
            arena: vec![Some(Segment::new(None))],
            free: Vec::new(),
            downsampling,
        }
    }

    pub fn root(&self) -> SegmentId {
        SegmentId(0)
    }

    /// Turns off compaction for all future appends. Existing spans are
    /// kept. Useful when the raw path must be preserved exactly.
    pub fn disable_downsampling(&mut self) {
        self.downsampling = None;
    }

    fn segment(&self, id: SegmentId) -> &Segment {
        self.arena[id.0].as_ref().expect("stale segment id")
    }

    fn segment_mut(&mut self, id: SegmentId) -> &mut Segment {
        self.arena[id.0].as_mut().expect("stale segment id")
    }

    /// Appends a sample to `segment`. The time must strictly exceed the
    /// segment's last visible time (the fork time for a fresh fork).
    pub fn append(&mut self, segment: SegmentId, time: f64, state: State) -> Result<(), Error> {
        let last = self.segment(segment).last_time().unwrap_or(f64::NEG_INFINITY);
        if time <= last {
            return Err(Error::NonMonotonicTime { time, last });
        }
        self.segment_mut(segment).samples.push(Sample::new(time, state));
        if let Some(parameters) = self.downsampling {
            self.maybe_compact(segment, parameters);
        }
        Ok(())
    }

    /// Attempts to replace the dense tail window with a Hermite span.
    fn maybe_compact(&mut self, id: SegmentId, parameters: DownsamplingParameters) {
        let seg = self.segment(id);
        let window_len = seg.samples.len() - seg.dense_start;
        if window_len <= parameters.dense_interval_count {
            return;
        }
        let first = seg.samples[seg.dense_start];
        let last = seg.samples[seg.samples.len() - 1];

        // A fork aliasing a sample inside the window pins the raw data:
        // compaction would disconnect it.
        let window_pinned = seg
            .children
            .iter()
            .map(|&c| self.fork_time(c))
            .any(|ft| ft > first.time && ft < last.time);

        let seg = self.segment_mut(id);
        let flush_to = seg.samples.len() - 1;
        if window_pinned {
            seg.dense_start = flush_to;
            return;
        }

        let fit = Hermite3::new(first, last);
        let interior = &seg.samples[seg.dense_start + 1..flush_to];
        if fit.max_position_error(interior) <= parameters.fitting_tolerance {
            seg.samples.drain(seg.dense_start + 1..flush_to);
            seg.spans.push(fit);
            seg.dense_start += 1;
        } else {
            // Fit rejected: keep the raw window and start a new one.
            seg.dense_start = flush_to;
        }
    }

    fn fork_time(&self, id: SegmentId) -> f64 {
        self.segment(id)
            .parent
            .map(|(_, ft)| ft)
            .unwrap_or(f64::NEG_INFINITY)
    }

    /// Creates a child segment rooted at the retained sample of
    /// `segment`'s timeline at exactly `at_time`.
    pub fn fork(&mut self, segment: SegmentId, at_time: f64) -> Result<SegmentId, Error> {
        // The fork point must be a retained sample visible from here.
        self.sample_at(segment, at_time)?;
        let child = Segment::new(Some((segment, at_time)));
        let id = match self.free.pop() {
            Some(index) => {
                self.arena[index] = Some(child);
                SegmentId(index)
            }
            None => {
                self.arena.push(Some(child));
                SegmentId(self.arena.len() - 1)
            }
        };
        self.segment_mut(segment).children.push(id);
        Ok(id)
    }

    /// Discards a forked segment and all its descendants, freeing their
    /// arena slots. Panics if asked to discard the root.
    pub fn discard(&mut self, segment: SegmentId) {
        assert!(segment != self.root(), "cannot discard the root segment");
        if let Some((parent, _)) = self.segment(segment).parent {
            self.segment_mut(parent).children.retain(|&c| c != segment);
        }
        let mut stack = vec![segment];
        while let Some(id) = stack.pop() {
            if let Some(seg) = self.arena[id.0].take() {
                stack.extend(seg.children);
                self.free.push(id.0);
            }
        }
    }

    /// Removes samples strictly before `time` from the root segment.
    /// Refuses, deleting nothing, if a live fork's attachment sample
    /// lies in the removed range.
    pub fn forget_before(&mut self, time: f64) -> Result<(), Error> {
        // Any fork whose attachment sample physically lives on the root
        // and predates `time` would be severed.
        let live: Vec<SegmentId> = (0..self.arena.len())
            .filter(|&i| self.arena[i].is_some())
            .map(SegmentId)
            .collect();
        for id in live {
            let Some((_, ft)) = self.segment(id).parent else {
                continue;
            };
            if ft < time && self.fork_sample_owner(id) == self.root() {
                return Err(Error::WouldSeverFork {
                    time,
                    fork_time: ft,
                });
            }
        }

        let root = self.root();
        let seg = self.segment_mut(root);
        seg.spans.retain(|span| span.t1() >= time);
        let cut = seg.samples.partition_point(|s| s.time < time);
        seg.samples.drain(0..cut);
        seg.dense_start = seg.dense_start.saturating_sub(cut);
        let floor = seg.forgotten_before.unwrap_or(f64::NEG_INFINITY);
        if time > floor {
            seg.forgotten_before = Some(time);
        }
        debug!(time, removed = cut, "forgot trajectory samples");
        Ok(())
    }

    /// The segment physically holding the sample that `segment` forked
    /// from.
    fn fork_sample_owner(&self, segment: SegmentId) -> SegmentId {
        let Some((mut owner, ft)) = self.segment(segment).parent else {
            return segment;
        };
        loop {
            match self.segment(owner).parent {
                Some((up, parent_ft)) if ft <= parent_ft => owner = up,
                _ => return owner,
            }
        }
    }

    /// Earliest evaluable time of the tree (the root's lower bound).
    pub fn t_min(&self) -> Option<f64> {
        let root = self.segment(self.root());
        let raw = match (root.spans.first(), root.samples.first()) {
            (Some(span), Some(sample)) => span.t0().min(sample.time),
            (Some(span), None) => span.t0(),
            (None, Some(sample)) => sample.time,
            (None, None) => return None,
        };
        Some(raw.max(root.forgotten_before.unwrap_or(f64::NEG_INFINITY)))
    }

    /// Latest time visible from `segment`.
    pub fn t_max(&self, segment: SegmentId) -> Option<f64> {
        let mut cur = segment;
        loop {
            let seg = self.segment(cur);
            if let Some(t) = seg.last_time() {
                // last_time is the fork time when the segment is empty;
                // that time is a real sample of an ancestor.
                return Some(t);
            }
            match seg.parent {
                Some((p, _)) => cur = p,
                None => return None,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.t_max(self.root()).is_none()
    }

    /// Last visible sample of `segment`'s timeline.
    pub fn last(&self, segment: SegmentId) -> Option<Sample> {
        let seg = self.segment(segment);
        if let Some(sample) = seg.samples.last() {
            return Some(*sample);
        }
        let (parent, ft) = seg.parent?;
        self.sample_at(parent, ft).ok()
    }

    /// The retained sample at exactly `time` on `segment`'s timeline.
    fn sample_at(&self, segment: SegmentId, time: f64) -> Result<Sample, Error> {
        let seg = self.segment(segment);
        if let Ok(i) = seg
            .samples
            .binary_search_by(|s| s.time.total_cmp(&time))
        {
            return Ok(seg.samples[i]);
        }
        match seg.parent {
            Some((p, ft)) if time <= ft => self.sample_at(p, time),
            _ => Err(Error::NoSuchForkPoint { time }),
        }
    }

    /// Interpolated state at `time` on `segment`'s timeline. Uses the
    /// compacted polynomial where one covers `time`, pairwise Hermite
    /// interpolation between retained samples elsewhere.
    pub fn evaluate(&self, segment: SegmentId, time: f64) -> Result<State, Error> {
        let t_min = self.t_min().unwrap_or(f64::NAN);
        let t_max = self.t_max(segment).unwrap_or(f64::NAN);
        if !(time >= t_min && time <= t_max) {
            return Err(Error::OutOfRange { time, t_min, t_max });
        }

        // Route to the segment owning this part of the timeline.
        let mut cur = segment;
        loop {
            match self.segment(cur).parent {
                Some((p, ft)) if time <= ft => cur = p,
                _ => break,
            }
        }
        self.evaluate_local(cur, time)
    }

    fn evaluate_local(&self, id: SegmentId, time: f64) -> Result<State, Error> {
        let seg = self.segment(id);

        // Compacted span covering `time`?
        let i = seg.spans.partition_point(|span| span.t0() <= time);
        if i > 0 && seg.spans[i - 1].contains(time) {
            return Ok(seg.spans[i - 1].evaluate(time));
        }

        match seg.samples.binary_search_by(|s| s.time.total_cmp(&time)) {
            Ok(i) => Ok(seg.samples[i].state),
            Err(0) => {
                // Before the first own sample: bracket with the aliased
                // fork-point sample of the parent.
                let (parent, ft) = seg.parent.ok_or(Error::OutOfRange {
                    time,
                    t_min: self.t_min().unwrap_or(f64::NAN),
                    t_max: self.t_max(id).unwrap_or(f64::NAN),
                })?;
                let left = self.sample_at(parent, ft)?;
                Ok(Hermite3::new(left, seg.samples[0]).evaluate(time))
            }
            Err(i) => {
                let left = seg.samples[i - 1];
                let right = seg.samples[i];
                Ok(Hermite3::new(left, right).evaluate(time))
            }
        }
    }

    /// A finite, restartable, time-ordered walk over the retained
    /// samples visible from `segment`: each ancestor's range up to the
    /// fork time, then the segment's own samples.
    pub fn iterate(&self, segment: SegmentId) -> impl Iterator<Item = Sample> + '_ {
        let mut parts: Vec<(&Segment, f64)> = Vec::new();
        let mut cur = segment;
        let mut cutoff = f64::INFINITY;
        loop {
            let seg = self.segment(cur);
            parts.push((seg, cutoff));
            match seg.parent {
                Some((p, ft)) => {
                    cutoff = ft;
                    cur = p;
                }
                None => break,
            }
        }
        parts.reverse();
        parts.into_iter().flat_map(|(seg, cutoff)| {
            seg.samples
                .iter()
                .take_while(move |s| s.time <= cutoff)
                .copied()
        })
    }

    /// Number of retained samples visible from `segment`.
    pub fn sample_count(&self, segment: SegmentId) -> usize {
        self.iterate(segment).count()
    }

    /// Exports the full tree (samples, spans, fork structure) for an
    /// external persistence layer.
    pub fn snapshot(&self) -> TrajectorySnapshot {
        // Densify arena indices, root first.
        let mut order = Vec::new();
        let mut remap = vec![usize::MAX; self.arena.len()];
        let mut queue = vec![self.root()];
        while let Some(id) = queue.pop() {
            remap[id.0] = order.len();
            order.push(id);
            queue.extend(self.segment(id).children.iter().copied());
        }
        let segments = order
            .iter()
            .map(|&id| {
                let seg = self.segment(id);
                SegmentSnapshot {
                    parent: seg.parent.map(|(p, ft)| (remap[p.0], ft)),
                    samples: seg.samples.clone(),
                    spans: seg.spans.clone(),
                    dense_start: seg.dense_start,
                    forgotten_before: seg.forgotten_before,
                }
            })
            .collect();
        TrajectorySnapshot {
            segments,
            downsampling: self.downsampling,
        }
    }

    pub fn from_snapshot(snapshot: TrajectorySnapshot) -> Result<Self, Error> {
        if snapshot.segments.is_empty() {
            return Err(Error::InvalidSnapshot("no segments".to_string()));
        }
        if snapshot.segments[0].parent.is_some() {
            return Err(Error::InvalidSnapshot(
                "first segment must be the root".to_string(),
            ));
        }
        let mut arena: Vec<Option<Segment>> = Vec::with_capacity(snapshot.segments.len());
        for (i, s) in snapshot.segments.iter().enumerate() {
            if i > 0 {
                match s.parent {
                    Some((p, _)) if p < i => {}
                    _ => {
                        return Err(Error::InvalidSnapshot(format!(
                            "segment {i} has an invalid parent"
                        )));
                    }
                }
            }
            if s.samples.windows(2).any(|w| w[1].time <= w[0].time) {
                return Err(Error::InvalidSnapshot(format!(
                    "segment {i} has non-increasing sample times"
                )));
            }
            arena.push(Some(Segment {
                parent: s.parent.map(|(p, ft)| (SegmentId(p), ft)),
                children: Vec::new(),
                samples: s.samples.clone(),
                spans: s.spans.clone(),
                dense_start: s.dense_start.min(s.samples.len()),
                forgotten_before: s.forgotten_before,
            }));
        }
        for i in 1..snapshot.segments.len() {
            if let Some((p, _)) = snapshot.segments[i].parent {
                if let Some(parent) = arena[p].as_mut() {
                    parent.children.push(SegmentId(i));
                }
            }
        }
        Ok(Self {
            arena,
            free: Vec::new(),
            downsampling: snapshot.downsampling,
        })
    }
}

/// Serializable image of a trajectory tree; the concrete wire format is
/// chosen by the embedding application.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrajectorySnapshot {
    segments: Vec<SegmentSnapshot>,
    downsampling: Option<DownsamplingParameters>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SegmentSnapshot {
    parent: Option<(usize, f64)>,
    samples: Vec<Sample>,
    spans: Vec<Hermite3>,
    dense_start: usize,
    forgotten_before: Option<f64>,
}
