//! Cooperative scheduler
//!
//! One logical thread of control per node. Periodic work is expressed as
//! timers; radio receptions and button presses arrive as events. Whatever
//! [`Scheduler::pop_ready`] hands out runs to completion before the next
//! item is taken, so node state never sees concurrent mutation.
//!
//! Queued events are served before due timers. Timers due at the same
//! instant fire in the order they were scheduled.

use crate::mesh::cipher::WireFrame;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

/// Node push buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Force a send of the latest readings
    A,
    /// Cycle display verbosity
    B,
}

/// Periodic node work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Task {
    /// Read the sensor and refresh the display
    Measure,
    /// First half of the transmit cycle
    TransmitTemperature,
    /// Second half of the transmit cycle
    TransmitHumidity,
}

/// Something for the node to handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A wire frame arrived
    Radio(WireFrame),
    /// A button was pressed
    Button(Button),
    /// A timer fired
    Timer(Task),
}

/// Timer heap plus external event queue
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: BinaryHeap<Reverse<(u64, u64, Task)>>,
    events: VecDeque<Event>,
    seq: u64,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `task` at absolute time `due` (ms)
    pub fn schedule_at(&mut self, due: u64, task: Task) {
        self.seq += 1;
        self.timers.push(Reverse((due, self.seq, task)));
    }

    /// Fire `task` `delay` after `now`
    pub fn schedule_in(&mut self, now: u64, delay: Duration, task: Task) {
        self.schedule_at(now.saturating_add(delay.as_millis() as u64), task);
    }

    /// Queue an external event
    pub fn push_event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Due time of the earliest timer
    pub fn next_due(&self) -> Option<u64> {
        self.timers.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Check for queued external events
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Number of armed timers
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Take the next thing to run at time `now`
    pub fn pop_ready(&mut self, now: u64) -> Option<Event> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        match self.timers.peek() {
            Some(Reverse((due, _, _))) if *due <= now => {
                self.timers.pop().map(|Reverse((_, _, task))| Event::Timer(task))
            }
            _ => None,
        }
    }

    /// Drop all timers and queued events
    pub fn clear(&mut self) {
        self.timers.clear();
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timers_fire_in_due_order() {
        let mut sched = Scheduler::new();
        sched.schedule_at(300, Task::TransmitHumidity);
        sched.schedule_at(100, Task::Measure);
        sched.schedule_in(100, Duration::from_millis(100), Task::TransmitTemperature);

        assert_eq!(sched.next_due(), Some(100));
        assert_eq!(sched.pop_ready(50), None);
        assert_eq!(sched.pop_ready(100), Some(Event::Timer(Task::Measure)));
        assert_eq!(sched.pop_ready(100), None);
        assert_eq!(sched.pop_ready(1000), Some(Event::Timer(Task::TransmitTemperature)));
        assert_eq!(sched.pop_ready(1000), Some(Event::Timer(Task::TransmitHumidity)));
        assert_eq!(sched.next_due(), None);
    }

    #[test]
    fn test_same_instant_is_fifo() {
        let mut sched = Scheduler::new();
        sched.schedule_at(10, Task::TransmitHumidity);
        sched.schedule_at(10, Task::Measure);
        assert_eq!(sched.pop_ready(10), Some(Event::Timer(Task::TransmitHumidity)));
        assert_eq!(sched.pop_ready(10), Some(Event::Timer(Task::Measure)));
    }

    #[test]
    fn test_events_before_timers() {
        let mut sched = Scheduler::new();
        sched.schedule_at(0, Task::Measure);
        sched.push_event(Event::Button(Button::A));
        sched.push_event(Event::Button(Button::B));

        assert!(sched.has_events());
        assert_eq!(sched.pop_ready(0), Some(Event::Button(Button::A)));
        assert_eq!(sched.pop_ready(0), Some(Event::Button(Button::B)));
        assert_eq!(sched.pop_ready(0), Some(Event::Timer(Task::Measure)));
    }

    #[test]
    fn test_clear() {
        let mut sched = Scheduler::new();
        sched.schedule_at(5, Task::Measure);
        sched.push_event(Event::Button(Button::A));
        sched.clear();
        assert_eq!(sched.pending_timers(), 0);
        assert_eq!(sched.pop_ready(u64::MAX), None);
    }
}
