//! Audio block storage and the borrowed view handed through the tree.
//!
//! `ProcessData` is the in-place render view: a set of mutable channel
//! slices plus the event list for the block. Containers that need
//! private copies (split branches, oversampled lanes) own a
//! `BlockBuffer` sized at prepare time, so the render path itself never
//! heap-allocates; transient slice vectors stay inline via `SmallVec`.

use smallvec::SmallVec;

use crate::event::Event;

/// Upper bound on channels the engine will route.
pub const MAX_CHANNELS: usize = 16;

/// Per-call vector of channel slices, inline up to [`MAX_CHANNELS`].
pub type ChannelSlices<'a> = SmallVec<[&'a mut [f32]; MAX_CHANNELS]>;

/// Owned planar audio storage used for scratch copies.
#[derive(Debug, Clone, Default)]
pub struct BlockBuffer {
    channels: Vec<Vec<f32>>,
}

impl BlockBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(channels: usize, frames: usize) -> Self {
        let mut buffer = Self::new();
        buffer.resize(channels, frames);
        buffer
    }

    pub fn resize(&mut self, channels: usize, frames: usize) {
        self.channels.resize_with(channels, Vec::new);
        for channel in &mut self.channels {
            channel.resize(frames, 0.0);
        }
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    /// Copies as much of `data` as fits (channel and frame counts are
    /// clamped to this buffer's size).
    pub fn copy_from(&mut self, data: &ProcessData<'_, '_>) {
        let channels = self.channels.len().min(data.num_channels());
        for ch in 0..channels {
            let frames = self.channels[ch].len().min(data.frames());
            self.channels[ch][..frames].copy_from_slice(&data.channel(ch)[..frames]);
        }
    }

    /// Copies as much of `other` as fits into this buffer.
    pub fn copy_channels(&mut self, other: &BlockBuffer) {
        let channels = self.channels.len().min(other.num_channels());
        for ch in 0..channels {
            let src = other.channel(ch);
            let dst = &mut self.channels[ch];
            let frames = dst.len().min(src.len());
            dst[..frames].copy_from_slice(&src[..frames]);
        }
    }

    /// Borrows the first `channels` channels, `frames` frames each.
    pub fn slices(&mut self, channels: usize, frames: usize) -> ChannelSlices<'_> {
        self.channels
            .iter_mut()
            .take(channels)
            .map(|ch| &mut ch[..frames])
            .collect()
    }
}

/// Borrowed in/out channel data plus the block's event stream.
pub struct ProcessData<'a, 'b> {
    channels: &'a mut [&'b mut [f32]],
    events: &'a [Event],
}

impl<'a, 'b> ProcessData<'a, 'b> {
    pub fn new(channels: &'a mut [&'b mut [f32]], events: &'a [Event]) -> Self {
        Self { channels, events }
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, |ch| ch.len())
    }

    #[inline]
    pub fn events(&self) -> &'a [Event] {
        self.events
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels[index]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        self.channels[index]
    }

    pub fn fill(&mut self, value: f32) {
        for channel in self.channels.iter_mut() {
            channel.fill(value);
        }
    }

    /// Adds `buffer` sample-wise onto this data.
    pub fn add_from(&mut self, buffer: &BlockBuffer) {
        let channels = self.num_channels().min(buffer.num_channels());
        for ch in 0..channels {
            let src = buffer.channel(ch);
            let dst = &mut self.channels[ch];
            let frames = dst.len().min(src.len());
            for frame in 0..frames {
                dst[frame] += src[frame];
            }
        }
    }

    /// Overwrites this data with the contents of `buffer`.
    pub fn copy_from_buffer(&mut self, buffer: &BlockBuffer) {
        let channels = self.num_channels().min(buffer.num_channels());
        for ch in 0..channels {
            let src = buffer.channel(ch);
            let dst = &mut self.channels[ch];
            let frames = dst.len().min(src.len());
            dst[..frames].copy_from_slice(&src[..frames]);
        }
    }

    /// Reborrows a contiguous channel range as its own view.
    pub fn channel_range(&mut self, start: usize, len: usize) -> ProcessData<'_, 'b> {
        ProcessData {
            channels: &mut self.channels[start..start + len],
            events: self.events,
        }
    }

    /// Collects reborrowed per-channel subslices for one frame range.
    /// The caller wraps them in a fresh `ProcessData` for the chunk.
    pub fn frame_slices(&mut self, start: usize, end: usize) -> ChannelSlices<'_> {
        self.channels
            .iter_mut()
            .map(|ch| &mut ch[start..end])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_channels(frames: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0; frames], vec![0.0; frames]]
    }

    #[test]
    fn buffer_resize_and_clear() {
        let mut buffer = BlockBuffer::with_size(2, 64);
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.frames(), 64);
        buffer.channel_mut(0)[5] = 1.0;
        buffer.clear();
        assert_eq!(buffer.channel(0)[5], 0.0);
    }

    #[test]
    fn copy_and_add_round_trip() {
        let mut storage = make_channels(8);
        let mut refs: Vec<&mut [f32]> = storage.iter_mut().map(|c| c.as_mut_slice()).collect();
        let mut data = ProcessData::new(&mut refs, &[]);
        data.fill(0.25);

        let mut scratch = BlockBuffer::with_size(2, 8);
        scratch.copy_from(&data);
        data.add_from(&scratch);
        assert!((data.channel(0)[0] - 0.5).abs() < 1e-6);
        assert!((data.channel(1)[7] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn channel_range_views_subset() {
        let mut storage = make_channels(4);
        let mut refs: Vec<&mut [f32]> = storage.iter_mut().map(|c| c.as_mut_slice()).collect();
        let mut data = ProcessData::new(&mut refs, &[]);

        let mut lower = data.channel_range(1, 1);
        assert_eq!(lower.num_channels(), 1);
        lower.fill(1.0);
        assert_eq!(data.channel(0)[0], 0.0);
        assert_eq!(data.channel(1)[0], 1.0);
    }

    #[test]
    fn frame_slices_cover_chunks() {
        let mut storage = make_channels(8);
        let mut refs: Vec<&mut [f32]> = storage.iter_mut().map(|c| c.as_mut_slice()).collect();
        let mut data = ProcessData::new(&mut refs, &[]);

        {
            let mut chunk = data.frame_slices(4, 8);
            let mut sub = ProcessData::new(&mut chunk, &[]);
            assert_eq!(sub.frames(), 4);
            sub.fill(2.0);
        }
        assert_eq!(data.channel(0)[3], 0.0);
        assert_eq!(data.channel(0)[4], 2.0);
    }
}
