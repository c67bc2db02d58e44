// Vorbis decoder written in Rust
//
// Copyright (c) 2016 est31 <MTest31@outlook.com>
// and contributors. All rights reserved.
// Licensed under MIT license, or Apache 2 license,
// at your option. Please see the LICENSE file
// attached to this source distribution for details.

/*!
Streaming decode statistics.

The decoder itself is single-consumer (see the crate-level docs), but the
small set of counters tracked here is the one piece of state that is safe
to read from a thread other than the one driving `read`/`seek` calls, e.g.
a UI thread polling for a progress display. It is guarded by a plain
`Mutex` rather than atomics, since a snapshot is taken as one consistent
unit, not field by field.
*/

use std::sync::Mutex;

/// A consistent point-in-time copy of a decoder's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
	/// Number of audio packets successfully decoded into samples.
	pub packets_decoded: u64,
	/// Number of audio packets dropped as corrupt and windowed to silence.
	pub packets_dropped: u64,
	/// Total PCM frames (per channel) handed back to the caller so far.
	pub frames_produced: u64,
	/// Total packet payload bytes consumed so far (header and audio).
	pub bytes_consumed: u64,
}

/// Lock-guarded counter block owned by a decoder instance.
///
/// `DecoderStats` is `Sync`: a `&DecoderStats` obtained while holding a
/// reference to the decoder may be handed to another thread and polled
/// with `snapshot()` while decoding continues elsewhere.
#[derive(Debug, Default)]
pub struct DecoderStats {
	inner: Mutex<StatsSnapshot>,
}

impl DecoderStats {
	pub fn new() -> Self {
		DecoderStats { inner: Mutex::new(StatsSnapshot::default()) }
	}

	/// Returns a consistent copy of the current counters.
	pub fn snapshot(&self) -> StatsSnapshot {
		*self.inner.lock().unwrap()
	}

	pub(crate) fn record_decoded(&self, bytes: usize, frames: usize) {
		let mut s = self.inner.lock().unwrap();
		s.packets_decoded += 1;
		s.frames_produced += frames as u64;
		s.bytes_consumed += bytes as u64;
	}

	pub(crate) fn record_dropped(&self, bytes: usize) {
		let mut s = self.inner.lock().unwrap();
		s.packets_dropped += 1;
		s.bytes_consumed += bytes as u64;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn snapshot_accumulates() {
		let stats = DecoderStats::new();
		stats.record_decoded(128, 1024);
		stats.record_decoded(64, 512);
		stats.record_dropped(32);

		let snap = stats.snapshot();
		assert_eq!(snap.packets_decoded, 2);
		assert_eq!(snap.packets_dropped, 1);
		assert_eq!(snap.frames_produced, 1536);
		assert_eq!(snap.bytes_consumed, 224);
	}

	#[test]
	fn fresh_stats_are_zero() {
		assert_eq!(DecoderStats::new().snapshot(), StatsSnapshot::default());
	}
}
