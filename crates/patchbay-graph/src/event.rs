//! Event stream entries handed to the graph alongside audio blocks.
//!
//! Events carry a sample offset into the current block. The graph
//! splits rendering at event boundaries so nodes observe each event
//! before the samples that follow it.

use std::ops::Range;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    Controller { channel: u8, controller: u8, value: u8 },
    PitchBend { channel: u8, value: i16 },
}

/// A timed event inside one render block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub sample_offset: u32,
}

impl Event {
    pub fn note_on(channel: u8, note: u8, velocity: u8, sample_offset: u32) -> Self {
        Self {
            kind: EventKind::NoteOn {
                channel,
                note,
                velocity,
            },
            sample_offset,
        }
    }

    pub fn note_off(channel: u8, note: u8, sample_offset: u32) -> Self {
        Self {
            kind: EventKind::NoteOff { channel, note },
            sample_offset,
        }
    }

    pub fn controller(channel: u8, controller: u8, value: u8, sample_offset: u32) -> Self {
        Self {
            kind: EventKind::Controller {
                channel,
                controller,
                value,
            },
            sample_offset,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self.kind, EventKind::NoteOn { .. })
    }
}

/// Walks a block in segments separated by event offsets.
///
/// Each step yields the events due at the segment start and the frame
/// range to render before the next event. Events must be sorted by
/// offset; events at or past the block end are delivered with an empty
/// final segment.
pub struct BlockSegments<'a> {
    events: &'a [Event],
    frames: u32,
    cursor: u32,
    done: bool,
}

impl<'a> BlockSegments<'a> {
    pub fn new(events: &'a [Event], frames: u32) -> Self {
        debug_assert!(events.windows(2).all(|w| w[0].sample_offset <= w[1].sample_offset));
        Self {
            events,
            frames,
            cursor: 0,
            done: false,
        }
    }

    pub fn next_segment(&mut self) -> Option<(&'a [Event], Range<u32>)> {
        if self.done {
            return None;
        }
        let due_len = self
            .events
            .iter()
            .take_while(|e| e.sample_offset.min(self.frames) <= self.cursor)
            .count();
        let (due, rest) = self.events.split_at(due_len);
        self.events = rest;
        let end = rest
            .first()
            .map(|e| e.sample_offset.min(self.frames))
            .unwrap_or(self.frames);
        let range = self.cursor..end;
        self.cursor = end;
        if end >= self.frames && self.events.is_empty() {
            self.done = true;
        }
        Some((due, range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_events_yields_one_full_segment() {
        let mut segments = BlockSegments::new(&[], 128);
        let (due, range) = segments.next_segment().unwrap();
        assert!(due.is_empty());
        assert_eq!(range, 0..128);
        assert!(segments.next_segment().is_none());
    }

    #[test]
    fn events_split_the_block() {
        let events = [
            Event::note_on(0, 60, 100, 0),
            Event::note_off(0, 60, 64),
        ];
        let mut segments = BlockSegments::new(&events, 128);

        let (due, range) = segments.next_segment().unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].is_note_on());
        assert_eq!(range, 0..64);

        let (due, range) = segments.next_segment().unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(range, 64..128);
        assert!(segments.next_segment().is_none());
    }

    #[test]
    fn trailing_events_get_an_empty_segment() {
        let events = [Event::controller(0, 1, 64, 200)];
        let mut segments = BlockSegments::new(&events, 128);

        let (due, range) = segments.next_segment().unwrap();
        assert!(due.is_empty());
        assert_eq!(range, 0..128);

        let (due, range) = segments.next_segment().unwrap();
        assert_eq!(due.len(), 1);
        assert!(range.is_empty());
        assert!(segments.next_segment().is_none());
    }

    #[test]
    fn coincident_events_arrive_together() {
        let events = [
            Event::note_on(0, 60, 100, 32),
            Event::note_on(0, 64, 100, 32),
        ];
        let mut segments = BlockSegments::new(&events, 64);
        let (due, range) = segments.next_segment().unwrap();
        assert!(due.is_empty());
        assert_eq!(range, 0..32);
        let (due, range) = segments.next_segment().unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(range, 32..64);
    }
}
