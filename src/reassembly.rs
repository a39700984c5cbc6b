//! Reassembly of PUBLISH payloads delivered in fragments.
//!
//! A fragment is identified by its byte offset into the logical message and
//! the message's declared total length. A fragment at offset 0 always starts
//! a new message, discarding whatever was in flight (last writer wins).

use alloc::vec::Vec;

/// One piece of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    /// Byte offset of `data` within the whole message; `0` starts a message.
    pub offset: usize,
    /// Declared length of the whole message; `0` when the transport does not know.
    pub total: usize,
    pub data: &'a [u8],
}

impl<'a> Fragment<'a> {
    /// A message that arrived in one piece.
    pub fn whole(data: &'a [u8]) -> Self {
        Self {
            offset: 0,
            total: data.len(),
            data,
        }
    }

    pub fn is_whole(&self) -> bool {
        self.offset == 0 && (self.total == 0 || self.data.len() >= self.total)
    }
}

/// Result of feeding one fragment.
#[derive(Debug, PartialEq, Eq)]
pub enum Reassembly {
    /// More fragments are expected.
    Pending,
    /// The message is complete; the buffer has been handed over.
    Complete(Vec<u8>),
    /// The fragment could not be used and any partial message was discarded.
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DropReason {
    /// A continuation arrived with no message in flight.
    NoActiveBuffer,
    /// A continuation did not start where the previous fragment ended.
    OutOfOrder,
    /// The declared total exceeds the configured limit.
    TooLarge,
}

#[derive(Debug)]
struct InFlight {
    accumulated: Vec<u8>,
    expected_total: usize,
    received_count: usize,
}

/// Accumulation state for one fragmenting topic.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    in_flight: Option<InFlight>,
    max_len: usize,
}

impl ReassemblyBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            in_flight: None,
            max_len,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Drops any partially received message.
    pub fn clear(&mut self) {
        self.in_flight = None;
    }

    pub fn push(&mut self, fragment: &Fragment<'_>) -> Reassembly {
        if fragment.offset == 0 {
            if self.in_flight.take().is_some() {
                debug!("reassembly: new message preempts incomplete one");
            }
            // An unknown total means the first fragment is the whole message.
            let expected_total = if fragment.total == 0 {
                fragment.data.len()
            } else {
                fragment.total
            };
            if expected_total > self.max_len {
                warn!("reassembly: declared length {} over limit", expected_total);
                return Reassembly::Dropped(DropReason::TooLarge);
            }
            let mut accumulated = Vec::with_capacity(expected_total);
            accumulated.extend_from_slice(fragment.data);
            self.in_flight = Some(InFlight {
                received_count: fragment.data.len(),
                accumulated,
                expected_total,
            });
        } else {
            let Some(in_flight) = self.in_flight.as_mut() else {
                debug!("reassembly: fragment at {} with no message in flight", fragment.offset);
                return Reassembly::Dropped(DropReason::NoActiveBuffer);
            };
            if fragment.offset != in_flight.received_count
                || in_flight.received_count + fragment.data.len() > self.max_len
            {
                debug!("reassembly: gap at offset {}, discarding", fragment.offset);
                self.in_flight = None;
                return Reassembly::Dropped(DropReason::OutOfOrder);
            }
            in_flight.accumulated.extend_from_slice(fragment.data);
            in_flight.received_count += fragment.data.len();
        }

        match self.in_flight.take() {
            Some(done) if done.received_count >= done.expected_total => {
                Reassembly::Complete(done.accumulated)
            }
            pending => {
                self.in_flight = pending;
                Reassembly::Pending
            }
        }
    }
}
