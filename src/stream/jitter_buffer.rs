//! reorder/concealment buffer between the network and playback
//!
//! Converts the best effort, out of order, lossy packet stream into an in
//! order, steady cadence frame stream.  Packets are slotted into a bounded
//! window keyed by sequence number.  A playback tick runs once per packet
//! duration and either releases the next expected packet, waits out a hole,
//! or declares the hole lost and conceals it with silence.
//!
//! Wraparound is handled by treating the forward half of the u32 space from
//! the expected pointer as "ahead".  A gap bigger than the resync limit means
//! the sender restarted or renumbered, so the window throws its state away
//! and re-anchors on the new sequence.
//!
//! Shared between the receive thread (insert) and the playback thread (tick)
//! behind a mutex.  Neither side ever blocks on the other for more than one
//! slot operation: insert drops on overflow, tick conceals on underflow.
use log::{debug, info};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::common::timing::StreamStat;

use super::frame::{AudioFrame, StreamFormat};

const HALF_SEQ_SPACE: u32 = 0x8000_0000;
/// extra packets allowed past the target depth before drop-oldest kicks in
const DEPTH_SLACK: usize = 2;

pub struct JitterBuffer {
    slots: BTreeMap<u32, Vec<AudioFrame>>,
    expected: u32,
    anchored: bool,
    filling: bool,
    target_depth: usize,
    loss_tolerance: u32,
    resync_limit: u32,
    hole_ticks: u32,
    /// shape of the last released packet, used to size concealment
    conceal_shape: Option<(StreamFormat, usize, usize)>,
    depth_stats: StreamStat,
    puts: usize,
    gets: usize,
    lost: usize,
    concealed: usize,
    dup_drops: usize,
    stale_drops: usize,
    overruns: usize,
    underruns: usize,
    resyncs: usize,
}

impl JitterBuffer {
    /// target_depth is the look ahead in packets (latency vs concealment
    /// trade off).  loss_tolerance is how many ticks a hole may age before
    /// it is declared lost.  resync_limit is the forward gap that counts as
    /// a stream restart.
    pub fn build(target_depth: usize, loss_tolerance: u32, resync_limit: u32) -> JitterBuffer {
        JitterBuffer {
            slots: BTreeMap::new(),
            expected: 0,
            anchored: false,
            filling: true,
            target_depth: target_depth.max(1),
            loss_tolerance: loss_tolerance.max(1),
            resync_limit: resync_limit.max(2),
            hole_ticks: 0,
            conceal_shape: None,
            depth_stats: StreamStat::build(50),
            puts: 0,
            gets: 0,
            lost: 0,
            concealed: 0,
            dup_drops: 0,
            stale_drops: 0,
            overruns: 0,
            underruns: 0,
            resyncs: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }
    pub fn is_filling(&self) -> bool {
        self.filling
    }
    pub fn expected_sequence(&self) -> u32 {
        self.expected
    }
    pub fn get_lost(&self) -> usize {
        self.lost
    }
    pub fn get_concealed(&self) -> usize {
        self.concealed
    }
    pub fn get_overruns(&self) -> usize {
        self.overruns
    }
    pub fn get_underruns(&self) -> usize {
        self.underruns
    }
    pub fn get_resyncs(&self) -> usize {
        self.resyncs
    }
    pub fn get_stale_drops(&self) -> usize {
        self.stale_drops
    }
    pub fn avg_depth(&self) -> f64 {
        self.depth_stats.get_mean()
    }

    /// slot an arriving packet's frames into the window
    pub fn insert(&mut self, sequence: u32, frames: Vec<AudioFrame>) -> () {
        self.puts += 1;
        if frames.is_empty() {
            return;
        }
        if !self.anchored {
            // first packet after build or reset anchors the window
            self.expected = sequence;
            self.anchored = true;
        }
        let mut ahead = sequence.wrapping_sub(self.expected);
        if ahead >= HALF_SEQ_SPACE {
            if self.filling {
                // nothing has played yet; a slower packet moves the window
                // start back instead of getting dropped
                self.expected = sequence;
                ahead = 0;
            } else {
                // behind the expected pointer, already played or concealed
                self.stale_drops += 1;
                return;
            }
        }
        if ahead >= self.resync_limit {
            // sender restart or renumbering.  Throw the window away and
            // re-anchor on what just arrived.
            info!(
                "jitter resync: expected {} got {} ({} ahead)",
                self.expected, sequence, ahead
            );
            self.slots.clear();
            self.expected = sequence;
            self.filling = true;
            self.hole_ticks = 0;
            self.resyncs += 1;
        }
        if self.slots.contains_key(&sequence) {
            self.dup_drops += 1;
            return;
        }
        self.slots.insert(sequence, frames);

        // sender running fast or reordering collapsed: drop oldest to keep
        // the latency budget instead of letting depth grow without bound
        let mut dropped = false;
        while self.slots.len() > self.target_depth + DEPTH_SLACK {
            let Some(oldest) = self.oldest_sequence() else {
                break;
            };
            self.slots.remove(&oldest);
            self.overruns += 1;
            dropped = true;
        }
        if dropped {
            if let Some(oldest) = self.oldest_sequence() {
                debug!("jitter overflow: expected moves {} -> {}", self.expected, oldest);
                self.expected = oldest;
                self.hole_ticks = 0;
            }
        }
    }

    /// one playback clock tick.  Returns the frames to play now; empty while
    /// the window refills or a hole is still inside the loss tolerance.
    pub fn tick(&mut self) -> Vec<AudioFrame> {
        self.gets += 1;
        self.depth_stats.add_sample(self.slots.len() as f64);

        if self.filling {
            if self.slots.len() < self.target_depth {
                return Vec::new();
            }
            self.filling = false;
            if let Some(oldest) = self.oldest_sequence() {
                self.expected = oldest;
            }
        }

        if let Some(frames) = self.slots.remove(&self.expected) {
            self.expected = self.expected.wrapping_add(1);
            self.hole_ticks = 0;
            if let Some(first) = frames.first() {
                self.conceal_shape = Some((first.format, first.sample_frames(), frames.len()));
            }
            return frames;
        }

        if self.slots.is_empty() {
            // nothing buffered at all, go back to filling
            self.underruns += 1;
            self.filling = true;
            self.hole_ticks = 0;
            return Vec::new();
        }

        // a hole with newer data behind it
        if self.hole_ticks < self.loss_tolerance {
            self.hole_ticks += 1;
            return Vec::new();
        }

        // the hole has aged out.  Declare the sequence lost, conceal it with
        // silence and move on.  hole_ticks stays saturated so the rest of a
        // multi-packet gap conceals on consecutive ticks.
        self.lost += 1;
        debug!("jitter loss: concealing sequence {}", self.expected);
        self.expected = self.expected.wrapping_add(1);
        let frames = self.concealment_frames();
        self.concealed += frames.len();
        frames
    }

    /// discard all ordering state; the next packet re-anchors the window.
    /// Used by the coordinator during recovery and on a peer resync request.
    pub fn reset(&mut self) -> () {
        self.slots.clear();
        self.anchored = false;
        self.filling = true;
        self.hole_ticks = 0;
    }

    fn oldest_sequence(&self) -> Option<u32> {
        let expected = self.expected;
        self.slots
            .keys()
            .min_by_key(|seq| seq.wrapping_sub(expected))
            .copied()
    }

    fn concealment_frames(&self) -> Vec<AudioFrame> {
        match self.conceal_shape {
            Some((format, sample_frames, count)) => (0..count)
                .map(|_| AudioFrame::silence(format, sample_frames))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn as_json(&self) -> Value {
        json!({
            "depth": self.slots.len(),
            "avgDepth": self.depth_stats.get_mean(),
            "puts": self.puts,
            "gets": self.gets,
            "lost": self.lost,
            "concealed": self.concealed,
            "dupDrops": self.dup_drops,
            "staleDrops": self.stale_drops,
            "overruns": self.overruns,
            "underruns": self.underruns,
            "resyncs": self.resyncs,
        })
    }
}

impl fmt::Display for JitterBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ depth: {}, avg: {:.2}, lost: {}, overruns: {}, underruns: {}, resyncs: {} }}",
            self.slots.len(),
            self.depth_stats.get_mean(),
            self.lost,
            self.overruns,
            self.underruns,
            self.resyncs
        )
    }
}

#[cfg(test)]
mod test_jitter_buffer {
    use super::*;
    use rand::seq::SliceRandom;

    fn fmt() -> StreamFormat {
        StreamFormat::new(48_000, 2)
    }

    /// one-frame packet whose samples encode the sequence number
    fn packet(seq: u32) -> Vec<AudioFrame> {
        vec![AudioFrame::new(fmt(), vec![seq as f32; 8])]
    }

    fn seq_of(frames: &[AudioFrame]) -> u32 {
        frames[0].samples[0] as u32
    }

    #[test]
    fn build() {
        let buf = JitterBuffer::build(5, 2, 512);
        assert_eq!(buf.depth(), 0);
        assert!(buf.is_filling());
    }

    #[test]
    fn in_order_release() {
        let mut buf = JitterBuffer::build(3, 2, 512);
        for seq in 0..3 {
            buf.insert(seq, packet(seq));
        }
        for seq in 0..3 {
            let frames = buf.tick();
            assert_eq!(frames.len(), 1);
            assert_eq!(seq_of(&frames), seq);
        }
        assert_eq!(buf.get_concealed(), 0);
        assert_eq!(buf.get_lost(), 0);
    }

    #[test]
    fn reorder_inside_depth() {
        // depth 5, packets 1,2,4,5,3 must play back 1..5 with no concealment
        let mut buf = JitterBuffer::build(5, 2, 512);
        for seq in [1, 2, 4, 5, 3] {
            buf.insert(seq, packet(seq));
        }
        let mut released = Vec::new();
        for _ in 0..5 {
            let frames = buf.tick();
            assert_eq!(frames.len(), 1);
            released.push(seq_of(&frames));
        }
        assert_eq!(released, vec![1, 2, 3, 4, 5]);
        assert_eq!(buf.get_concealed(), 0);
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut buf = JitterBuffer::build(2, 2, 512);
        buf.insert(7, packet(7));
        buf.insert(7, packet(7));
        buf.insert(8, packet(8));
        assert_eq!(buf.depth(), 2);
        assert_eq!(seq_of(&buf.tick()), 7);
        assert_eq!(seq_of(&buf.tick()), 8);
    }

    #[test]
    fn gap_conceals_exactly_g_frames() {
        // sequences 3 and 4 never arrive; after the loss tolerance ages out
        // we should get exactly two silent frames and then clean ordering
        let mut buf = JitterBuffer::build(3, 2, 512);
        for seq in [0, 1, 2] {
            buf.insert(seq, packet(seq));
        }
        assert_eq!(seq_of(&buf.tick()), 0);
        for seq in [5, 6, 7] {
            buf.insert(seq, packet(seq));
        }
        assert_eq!(seq_of(&buf.tick()), 1);
        assert_eq!(seq_of(&buf.tick()), 2);
        // hole at 3: two empty ticks inside the tolerance
        assert!(buf.tick().is_empty());
        assert!(buf.tick().is_empty());
        // then one silence per missing sequence on consecutive ticks
        let c1 = buf.tick();
        assert_eq!(c1.len(), 1);
        assert!(c1[0].is_silent());
        let c2 = buf.tick();
        assert_eq!(c2.len(), 1);
        assert!(c2[0].is_silent());
        assert_eq!(buf.get_concealed(), 2);
        assert_eq!(buf.get_lost(), 2);
        // ordering resumes where the gap closed
        assert_eq!(seq_of(&buf.tick()), 5);
        assert_eq!(seq_of(&buf.tick()), 6);
        assert_eq!(seq_of(&buf.tick()), 7);
    }

    #[test]
    fn large_jump_triggers_resync() {
        let mut buf = JitterBuffer::build(2, 2, 64);
        buf.insert(10, packet(10));
        buf.insert(11, packet(11));
        assert_eq!(seq_of(&buf.tick()), 10);
        // sender restarted and renumbered far ahead of the window
        buf.insert(5000, packet(5000));
        assert_eq!(buf.get_resyncs(), 1);
        assert_eq!(buf.expected_sequence(), 5000);
        buf.insert(5001, packet(5001));
        assert_eq!(seq_of(&buf.tick()), 5000);
        assert_eq!(seq_of(&buf.tick()), 5001);
    }

    #[test]
    fn wraparound_orders_correctly() {
        // ...0xFFFFFFFE, 0xFFFFFFFF, 0, 1... is a normal forward walk, not a
        // massive backward jump
        let mut buf = JitterBuffer::build(4, 2, 512);
        let seqs = [0xFFFF_FFFEu32, 0xFFFF_FFFF, 0, 1];
        for seq in seqs {
            buf.insert(seq, packet(seq));
        }
        assert_eq!(buf.get_resyncs(), 0);
        for seq in seqs {
            let frames = buf.tick();
            assert_eq!(frames.len(), 1, "missing release for {}", seq);
            assert_eq!(seq_of(&frames), seq);
        }
    }

    #[test]
    fn stale_sequences_are_dropped() {
        let mut buf = JitterBuffer::build(2, 2, 512);
        buf.insert(100, packet(100));
        buf.insert(101, packet(101));
        assert_eq!(seq_of(&buf.tick()), 100);
        // a late straggler from before the expected pointer
        buf.insert(99, packet(99));
        assert_eq!(buf.get_stale_drops(), 1);
        assert_eq!(seq_of(&buf.tick()), 101);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut buf = JitterBuffer::build(3, 2, 512);
        // never tick, keep stuffing: depth must stay bounded at D + slack
        for seq in 0..20 {
            buf.insert(seq, packet(seq));
        }
        assert!(buf.depth() <= 3 + DEPTH_SLACK);
        assert!(buf.get_overruns() > 0);
        // what remains still plays in order
        let first = buf.tick();
        assert_eq!(first.len(), 1);
        let mut last = seq_of(&first);
        loop {
            let frames = buf.tick();
            if frames.is_empty() {
                break;
            }
            let seq = seq_of(&frames);
            assert!(seq > last);
            last = seq;
        }
        assert_eq!(last, 19);
    }

    #[test]
    fn underrun_goes_back_to_filling() {
        let mut buf = JitterBuffer::build(2, 2, 512);
        buf.insert(0, packet(0));
        buf.insert(1, packet(1));
        assert_eq!(seq_of(&buf.tick()), 0);
        assert_eq!(seq_of(&buf.tick()), 1);
        assert!(buf.tick().is_empty());
        assert!(buf.is_filling());
        assert_eq!(buf.get_underruns(), 1);
        // refill resumes from the live stream
        buf.insert(2, packet(2));
        buf.insert(3, packet(3));
        assert_eq!(seq_of(&buf.tick()), 2);
    }

    #[test]
    fn reset_reanchors_on_next_packet() {
        let mut buf = JitterBuffer::build(2, 2, 512);
        buf.insert(40, packet(40));
        buf.insert(41, packet(41));
        assert_eq!(seq_of(&buf.tick()), 40);
        buf.reset();
        assert_eq!(buf.depth(), 0);
        buf.insert(9000, packet(9000));
        buf.insert(9001, packet(9001));
        assert_eq!(seq_of(&buf.tick()), 9000);
    }

    #[test]
    fn shuffled_arrival_plays_monotonic_exactly_once() {
        // any delivery order inside the window must come out monotonic with
        // every non-lost sequence exactly once
        let mut seqs: Vec<u32> = (0..30).collect();
        seqs.shuffle(&mut rand::thread_rng());
        let mut buf = JitterBuffer::build(30, 2, 512);
        for seq in seqs {
            buf.insert(seq, packet(seq));
        }
        let mut released = Vec::new();
        for _ in 0..30 {
            let frames = buf.tick();
            assert_eq!(frames.len(), 1);
            released.push(seq_of(&frames));
        }
        let expected: Vec<u32> = (0..30).collect();
        assert_eq!(released, expected);
        assert_eq!(buf.get_concealed(), 0);
    }

    #[test]
    fn stats_json() {
        let mut buf = JitterBuffer::build(2, 2, 512);
        buf.insert(0, packet(0));
        let stats = buf.as_json();
        assert_eq!(stats["puts"], 1);
        assert_eq!(stats["depth"], 1);
    }
}
